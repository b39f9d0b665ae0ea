//! Event Frame Encoding
//!
//! Every delivered message becomes one server-sent event:
//!
//! ```text
//! data: {"message":"Hello"}\n\n
//! ```
//!
//! Sentinels (`[DONE]`, `[ERROR]`) are framed exactly like text deltas.

use bytes::Bytes;
use serde::Serialize;

use super::TransportError;

/// Field prefix of an SSE data line
const DATA_PREFIX: &str = "data: ";

/// Terminator of one SSE event
const EVENT_TERMINATOR: &str = "\n\n";

#[derive(Serialize)]
struct EventPayload<'a> {
    message: &'a str,
}

/// Encode a display message as one SSE frame
///
/// JSON encoding escapes embedded newlines, so a multi-line message still
/// occupies a single `data:` line.
///
/// # Errors
///
/// Returns [`TransportError::Encode`] if JSON serialization fails.
pub fn encode_frame(message: &str) -> Result<Bytes, TransportError> {
    let json = serde_json::to_string(&EventPayload { message })?;

    let mut frame = String::with_capacity(DATA_PREFIX.len() + json.len() + EVENT_TERMINATOR.len());
    frame.push_str(DATA_PREFIX);
    frame.push_str(&json);
    frame.push_str(EVENT_TERMINATOR);
    Ok(Bytes::from(frame))
}
