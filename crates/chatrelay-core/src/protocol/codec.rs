use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{Chunk, ProtocolError};

/// Longest line accepted before the decoder gives up on framing.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Decode a single line (without its trailing newline).
pub fn decode_line(line: &str) -> Result<Chunk, ProtocolError> {
    let (tag, payload) = line.split_once(':').ok_or(ProtocolError::MissingSeparator)?;
    Chunk::from_parts(tag, payload)
}

/// Decode the first complete line in `buf`.
///
/// Returns the decoded chunk (or `None` when no complete non-blank line is
/// buffered yet) and the unconsumed remainder. A payload error consumes its
/// line so the caller can keep going.
pub fn decode(buf: &[u8]) -> (Option<Result<Chunk, ProtocolError>>, &[u8]) {
    let mut rest = buf;
    while let Some(pos) = rest.iter().position(|byte| *byte == b'\n') {
        let line = &rest[..pos];
        rest = &rest[pos + 1..];
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let decoded = std::str::from_utf8(line)
            .map_err(|_| ProtocolError::InvalidUtf8)
            .and_then(decode_line);
        return (Some(decoded), rest);
    }
    (None, rest)
}

/// Stateful framing codec for protocol lines.
///
/// Items are `Result`s so a malformed payload costs one line, not the stream;
/// only framing failures surface as the decoder error.
#[derive(Debug, Clone)]
pub struct ChunkCodec {
    // Bytes already scanned for a newline.
    next_index: usize,
    max_length: usize,
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length,
        }
    }

    fn decode_frame(line: &[u8]) -> Result<Chunk, ProtocolError> {
        std::str::from_utf8(line)
            .map_err(|_| ProtocolError::InvalidUtf8)
            .and_then(decode_line)
    }
}

impl Decoder for ChunkCodec {
    type Item = Result<Chunk, ProtocolError>;
    type Error = ProtocolError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = buf[self.next_index..].iter().position(|byte| *byte == b'\n') else {
                self.next_index = buf.len();
                if buf.len() > self.max_length {
                    return Err(ProtocolError::LineTooLong(self.max_length));
                }
                return Ok(None);
            };

            let newline = self.next_index + offset;
            self.next_index = 0;
            let line = buf.split_to(newline + 1);
            if newline > self.max_length {
                return Err(ProtocolError::LineTooLong(self.max_length));
            }
            let line = &line[..newline];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(Self::decode_frame(line)));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if buf.iter().all(u8::is_ascii_whitespace) {
            buf.clear();
            return Ok(None);
        }
        let line = buf.split_to(buf.len());
        Ok(Some(Self::decode_frame(&line)))
    }
}

impl Encoder<Chunk> for ChunkCodec {
    type Error = ProtocolError;

    fn encode(&mut self, chunk: Chunk, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = chunk.encode();
        dst.reserve(line.len());
        dst.put(line.as_bytes());
        Ok(())
    }
}
