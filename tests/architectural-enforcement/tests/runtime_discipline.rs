//! Integration Test: Runtime Discipline
//!
//! **Policy**: Production code in the stream core and the daemon runs on the
//! Tokio runtime and must never block a worker thread.
//!
//! - No `std::thread::sleep` anywhere in production code
//! - `tokio::time::sleep` only for stage pacing in the producer module; periodic
//!   work uses `tokio::time::interval`
//! - No `.unwrap()` / `.expect(` in production code; errors propagate
//! - The core never depends on the HTTP layer
//!
//! Test code (everything after `#[cfg(test)]`) is exempt.

use std::fs;
use std::path::{Path, PathBuf};

/// Files allowed to pace output with `tokio::time::sleep`
const PACING_ALLOWED: &[&str] = &["streaming/producer.rs"];

#[derive(Clone, Copy)]
struct Policy {
    forbid_http: bool,
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

#[test]
fn test_no_blocking_in_production_code() {
    let mut violations = Vec::new();

    check_directory("pulse/core/src", &mut violations, Policy { forbid_http: true });
    check_directory("pulse/daemon/src", &mut violations, Policy { forbid_http: false });

    if !violations.is_empty() {
        eprintln!("\n❌ Runtime discipline violations in production code:\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ ACCEPTABLE:");
        eprintln!("  - tokio::time::interval for periodic ticks");
        eprintln!("  - tokio::time::sleep for stage pacing in streaming/producer.rs");
        eprintln!("  - Anything inside #[cfg(test)] modules");

        panic!("\nFound {} violation(s). Fix these before merging!", violations.len());
    }
}

#[test]
fn test_source_directories_exist() {
    for dir in ["pulse/core/src", "pulse/daemon/src"] {
        assert!(workspace_root().join(dir).is_dir(), "{dir} missing");
    }
}

fn check_directory(dir: &str, violations: &mut Vec<String>, policy: Policy) {
    let path = workspace_root().join(dir);
    if !path.exists() {
        return;
    }

    for entry in walkdir::WalkDir::new(&path)
        .into_iter()
        .filter_map(Result::ok)
    {
        if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
            if let Ok(content) = fs::read_to_string(entry.path()) {
                let display = entry.path().display().to_string();
                violations.extend(check_source(&display, &content, policy));
            }
        }
    }
}

fn check_source(path: &str, content: &str, policy: Policy) -> Vec<String> {
    let mut violations = Vec::new();
    let pacing_allowed = PACING_ALLOWED.iter().any(|allowed| path.ends_with(allowed));

    for (idx, line) in content.lines().enumerate() {
        if line.trim_start().starts_with("#[cfg(test)]") {
            break;
        }

        // Skip comments
        let code = line.split("//").next().unwrap_or(line);
        let mut report = |why: &str| {
            violations.push(format!("{path}:{} - {why}: {}", idx + 1, line.trim()));
        };

        if code.contains("thread::sleep") {
            report("blocking sleep");
        } else if code.contains("::sleep(") && !pacing_allowed {
            report("sleep outside stage pacing");
        }

        if code.contains(".unwrap()") || code.contains(".expect(") {
            report("panicking unwrap");
        }

        if policy.forbid_http && code.contains("axum") {
            report("HTTP dependency in core");
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORE: Policy = Policy { forbid_http: true };

    #[test]
    fn test_detects_thread_sleep() {
        let code = "fn tick() {\n    std::thread::sleep(Duration::from_millis(10));\n}\n";
        let found = check_source("core/src/ticker.rs", code, CORE);
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("blocking sleep"));
    }

    #[test]
    fn test_pacing_sleep_allowed_only_in_producer() {
        let code = "async fn pace() {\n    tokio::time::sleep(delay).await;\n}\n";
        assert!(check_source("core/src/streaming/producer.rs", code, CORE).is_empty());
        assert_eq!(check_source("core/src/streaming/registry.rs", code, CORE).len(), 1);
    }

    #[test]
    fn test_test_modules_are_exempt() {
        let code = "fn ok() {}\n#[cfg(test)]\nmod tests {\n    fn t() { x.unwrap(); std::thread::sleep(d); }\n}\n";
        assert!(check_source("core/src/lib.rs", code, CORE).is_empty());
    }

    #[test]
    fn test_comments_are_ignored() {
        let code = "let x = y; // never .unwrap() here\n";
        assert!(check_source("core/src/lib.rs", code, CORE).is_empty());
    }

    #[test]
    fn test_http_forbidden_in_core_only() {
        let code = "use axum::Router;\n";
        assert_eq!(check_source("core/src/lib.rs", code, CORE).len(), 1);
        assert!(check_source("daemon/src/server.rs", code, Policy { forbid_http: false }).is_empty());
    }
}
