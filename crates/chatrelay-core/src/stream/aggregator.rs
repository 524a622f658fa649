//! Monitor branch: rebuilds the assistant message from the byte stream.

use bytes::BytesMut;
use chatrelay_traits::{CommitRequest, Committer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{Chunk, ChunkCodec, ProtocolError, tags};

/// Accumulated assistant message for one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssistantMessageDraft {
    pub message_id: Option<String>,
    pub parts: Vec<String>,
}

impl AssistantMessageDraft {
    pub fn text(&self) -> String {
        self.parts.concat()
    }
}

/// Result of folding more bytes into the draft.
#[derive(Debug, PartialEq, Eq)]
pub enum Progress {
    Pending,
    /// A terminal chunk, or the end of the source, after `Start`.
    Complete(AssistantMessageDraft),
    /// The draft cannot be trusted any more.
    Abandoned(String),
}

pub struct Aggregator {
    codec: ChunkCodec,
    buf: BytesMut,
    draft: AssistantMessageDraft,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            codec: ChunkCodec::new(),
            buf: BytesMut::new(),
            draft: AssistantMessageDraft::default(),
        }
    }

    pub fn draft(&self) -> &AssistantMessageDraft {
        &self.draft
    }

    pub fn push(&mut self, bytes: &[u8]) -> Progress {
        self.buf.extend_from_slice(bytes);
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(item)) => match self.fold(item) {
                    Progress::Pending => continue,
                    done => return done,
                },
                Ok(None) => return Progress::Pending,
                Err(err) => return Progress::Abandoned(err.to_string()),
            }
        }
    }

    /// Source closed. A draft that saw `Start` is complete with what it has.
    pub fn finish(mut self) -> Progress {
        loop {
            match self.codec.decode_eof(&mut self.buf) {
                Ok(Some(item)) => match self.fold(item) {
                    Progress::Pending => continue,
                    done => return done,
                },
                Ok(None) => return self.complete("stream ended before a start chunk"),
                Err(err) => return Progress::Abandoned(err.to_string()),
            }
        }
    }

    fn fold(&mut self, item: Result<Chunk, ProtocolError>) -> Progress {
        let chunk = match item {
            Ok(chunk) => chunk,
            // Only `Start` and text deltas feed the draft.
            Err(ProtocolError::Payload { tag, source })
                if tag != tags::START && tag != tags::TEXT_DELTA =>
            {
                debug!(tag = %tag, error = %source, "Ignoring undecodable monitor chunk");
                return Progress::Pending;
            }
            Err(err) => return Progress::Abandoned(err.to_string()),
        };

        match chunk {
            Chunk::Start { message_id } => {
                self.draft.message_id = Some(message_id);
                Progress::Pending
            }
            Chunk::TextDelta(text) => {
                self.draft.parts.push(text);
                Progress::Pending
            }
            Chunk::FinishMessage { .. } => self.complete("finished without a start chunk"),
            Chunk::Error { message } => {
                debug!(error = %message, "Stream ended with an error chunk");
                self.complete("stream error before a start chunk")
            }
            Chunk::Data(_) | Chunk::FinishStep { .. } | Chunk::Raw { .. } => Progress::Pending,
        }
    }

    fn complete(&mut self, reason_without_start: &str) -> Progress {
        if self.draft.message_id.is_none() {
            return Progress::Abandoned(reason_without_start.to_string());
        }
        Progress::Complete(std::mem::take(&mut self.draft))
    }
}

/// Where a completed draft is committed.
#[derive(Clone)]
pub struct CommitTarget {
    pub committer: Arc<dyn Committer>,
    pub chat_id: Uuid,
    pub user_id: String,
}

/// Drain the monitor branch and commit at most once.
///
/// Returns whether a commit was attempted.
pub async fn run_monitor(
    stream_id: Uuid,
    mut rx: mpsc::Receiver<bytes::Bytes>,
    target: CommitTarget,
) -> bool {
    let mut aggregator = Aggregator::new();
    let progress = loop {
        match rx.recv().await {
            Some(bytes) => match aggregator.push(&bytes) {
                Progress::Pending => continue,
                done => break done,
            },
            None => break aggregator.finish(),
        }
    };
    // Release the branch so the tee stops feeding it.
    drop(rx);

    let draft = match progress {
        Progress::Complete(draft) => draft,
        Progress::Abandoned(reason) => {
            warn!(stream_id = %stream_id, chat_id = %target.chat_id, reason = %reason, "Assistant message not persisted");
            return false;
        }
        Progress::Pending => return false,
    };

    let Some(message_id) = draft.message_id.clone() else {
        return false;
    };
    let request = CommitRequest {
        chat_id: target.chat_id,
        user_id: target.user_id.clone(),
        message_id,
        text: draft.text(),
    };
    debug!(stream_id = %stream_id, message_id = %request.message_id, chars = request.text.len(), "Committing assistant message");

    match target.committer.commit(request).await {
        Ok(()) => info!(stream_id = %stream_id, chat_id = %target.chat_id, "Assistant message persisted"),
        Err(err) => {
            warn!(stream_id = %stream_id, chat_id = %target.chat_id, error = %err, "Failed to persist assistant message")
        }
    }
    true
}
