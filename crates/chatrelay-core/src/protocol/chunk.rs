use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::ProtocolError;

/// Tag characters. Stable for the lifetime of a deployed client/gateway pair.
pub mod tags {
    pub const START: &str = "f";
    pub const TEXT_DELTA: &str = "0";
    pub const DATA: &str = "2";
    pub const ERROR: &str = "3";
    pub const FINISH_MESSAGE: &str = "d";
    pub const FINISH_STEP: &str = "e";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default, deserialize_with = "count_or_zero")]
    pub prompt_tokens: u64,
    #[serde(default, deserialize_with = "count_or_zero")]
    pub completion_tokens: u64,
}

// Unknown counts arrive as `null` (a serialized NaN).
fn count_or_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}

/// One unit of the client-facing stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// First chunk; carries the id the assistant message is stored under.
    Start { message_id: String },
    TextDelta(String),
    /// Out-of-band structured values, used to replay a stored message.
    Data(Vec<Value>),
    FinishStep {
        finish_reason: FinishReason,
        usage: Usage,
        is_continued: bool,
    },
    /// End of the whole exchange. Terminal.
    FinishMessage {
        finish_reason: FinishReason,
        usage: Usage,
    },
    /// Abnormal end. Terminal.
    Error { message: String },
    /// Unrecognized tag, kept verbatim.
    Raw { tag: String, payload: String },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPayload {
    message_id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishStepPayload {
    finish_reason: FinishReason,
    #[serde(default)]
    usage: Usage,
    #[serde(default)]
    is_continued: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishMessagePayload {
    finish_reason: FinishReason,
    #[serde(default)]
    usage: Usage,
}

#[derive(Serialize)]
struct ErrorPayloadOut<'a> {
    error: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorPayloadIn {
    Text(String),
    Object { error: String },
}

impl Chunk {
    pub fn error(message: impl Into<String>) -> Self {
        Chunk::Error {
            message: message.into(),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Chunk::Start { .. } => tags::START,
            Chunk::TextDelta(_) => tags::TEXT_DELTA,
            Chunk::Data(_) => tags::DATA,
            Chunk::FinishStep { .. } => tags::FINISH_STEP,
            Chunk::FinishMessage { .. } => tags::FINISH_MESSAGE,
            Chunk::Error { .. } => tags::ERROR,
            Chunk::Raw { tag, .. } => tag,
        }
    }

    /// `FinishMessage` and `Error` end a live stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Chunk::FinishMessage { .. } | Chunk::Error { .. })
    }

    /// Encode as one protocol line, newline included.
    pub fn encode(&self) -> String {
        format!("{}:{}\n", self.tag(), self.payload())
    }

    fn payload(&self) -> String {
        let value = match self {
            Chunk::Raw { payload, .. } => return payload.clone(),
            Chunk::Start { message_id } => serde_json::to_string(&StartPayload {
                message_id: message_id.clone(),
            }),
            Chunk::TextDelta(text) => serde_json::to_string(text),
            Chunk::Data(values) => serde_json::to_string(values),
            Chunk::FinishStep {
                finish_reason,
                usage,
                is_continued,
            } => serde_json::to_string(&FinishStepPayload {
                finish_reason: *finish_reason,
                usage: *usage,
                is_continued: *is_continued,
            }),
            Chunk::FinishMessage {
                finish_reason,
                usage,
            } => serde_json::to_string(&FinishMessagePayload {
                finish_reason: *finish_reason,
                usage: *usage,
            }),
            Chunk::Error { message } => serde_json::to_string(&ErrorPayloadOut { error: message }),
        };
        // Serializing these shapes cannot fail: no maps with non-string keys.
        value.unwrap_or_default()
    }

    /// Parse the payload for `tag`. Unknown tags become [`Chunk::Raw`].
    pub(crate) fn from_parts(tag: &str, payload: &str) -> Result<Self, ProtocolError> {
        let invalid = |source| ProtocolError::Payload {
            tag: tag.to_string(),
            source,
        };

        let chunk = match tag {
            tags::START => {
                let parsed: StartPayload = serde_json::from_str(payload).map_err(invalid)?;
                Chunk::Start {
                    message_id: parsed.message_id,
                }
            }
            tags::TEXT_DELTA => Chunk::TextDelta(serde_json::from_str(payload).map_err(invalid)?),
            tags::DATA => Chunk::Data(serde_json::from_str(payload).map_err(invalid)?),
            tags::FINISH_STEP => {
                let parsed: FinishStepPayload = serde_json::from_str(payload).map_err(invalid)?;
                Chunk::FinishStep {
                    finish_reason: parsed.finish_reason,
                    usage: parsed.usage,
                    is_continued: parsed.is_continued,
                }
            }
            tags::FINISH_MESSAGE => {
                let parsed: FinishMessagePayload =
                    serde_json::from_str(payload).map_err(invalid)?;
                Chunk::FinishMessage {
                    finish_reason: parsed.finish_reason,
                    usage: parsed.usage,
                }
            }
            tags::ERROR => {
                let message = match serde_json::from_str(payload).map_err(invalid)? {
                    ErrorPayloadIn::Text(message) => message,
                    ErrorPayloadIn::Object { error } => error,
                };
                Chunk::Error { message }
            }
            other => Chunk::Raw {
                tag: other.to_string(),
                payload: payload.to_string(),
            },
        };

        Ok(chunk)
    }
}
