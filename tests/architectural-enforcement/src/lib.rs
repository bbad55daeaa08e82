//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! over the pulse sources:
//! - No blocking sleeps in async production code
//! - Errors propagate instead of panicking
//! - The stream core stays independent of the HTTP layer
//!
//! The checks live in `tests/`.
