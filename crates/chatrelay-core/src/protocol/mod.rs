//! Line-framed wire protocol exchanged with clients.
//!
//! Every chunk is one UTF-8 line: `<tag>:<json>\n`. Known tags decode into
//! typed [`Chunk`] variants; anything else is kept as [`Chunk::Raw`] so the
//! pass-through branch stays faithful to what the backend sent.

mod chunk;
mod codec;

pub use chunk::{Chunk, FinishReason, Usage, tags};
pub use codec::{ChunkCodec, MAX_LINE_LENGTH, decode, decode_line};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Line is missing the ':' tag separator")]
    MissingSeparator,

    #[error("Line is not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid payload for tag '{tag}': {source}")]
    Payload {
        tag: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
