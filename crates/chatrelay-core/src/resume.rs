//! Fallback for reconnects that arrive after the stream finished.

use chatrelay_traits::StoredMessage;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;

use crate::protocol::Chunk;

pub const DEFAULT_RESUME_WINDOW: Duration = Duration::from_secs(15);

/// A one-shot `Data` chunk replaying `message`, if it was created within
/// `window` before `requested_at`.
pub fn replay_chunk(
    message: &StoredMessage,
    requested_at: DateTime<Utc>,
    window: Duration,
) -> Result<Option<Chunk>, serde_json::Error> {
    let age = requested_at.signed_duration_since(message.created_at);
    if age.num_milliseconds() > window.as_millis() as i64 {
        return Ok(None);
    }

    let encoded = serde_json::to_string(message)?;
    Ok(Some(Chunk::Data(vec![json!({
        "type": "append-message",
        "message": encoded,
    })])))
}
