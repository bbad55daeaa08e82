//! SSE response bodies
//!
//! Turns the consuming half of a [`ChannelEmitter`](pulse_core::ChannelEmitter)
//! into an axum [`Sse`] response. The response ends when the emitter is
//! completed; if the client goes away first, dropping the body drops the
//! receiver, which reports the disconnect back to the stream manager.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;

use pulse_core::{EmitterFrame, EmitterReceiver, SseMessage};

/// Interval between keep-alive comments on idle streams
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// SSE event name used when the stream ends with a transport error
pub const ERROR_EVENT: &str = "error";

/// Build the SSE response for one stream
pub fn event_stream(
    receiver: EmitterReceiver,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let mut receiver = receiver;

        while let Some(frame) = receiver.recv().await {
            match frame {
                EmitterFrame::Message(message) => yield Ok(to_event(message)),
                EmitterFrame::Error(error) => {
                    tracing::debug!(error = %error, "Stream completed with error");
                    yield Ok(Event::default().event(ERROR_EVENT).data(error.to_string()));
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keepalive"),
    )
}

fn to_event(message: SseMessage) -> Event {
    Event::default()
        .id(message.id)
        .event(message.event)
        .data(message.data)
}
