//! Test doubles shared by the unit tests of this crate.

use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_traits::{CommitRequest, Committer, TraitError};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendError, ByteStream, GenerationBackend, GenerationRequest};

/// Backend replaying a fixed body, optionally pausing before each line.
pub struct ScriptedBackend {
    lines: Vec<String>,
    delay: Duration,
    fail_status: Option<u16>,
    invocations: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines,
            delay: Duration::ZERO,
            fail_status: None,
            invocations: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            fail_status: Some(status),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn invoke(
        &self,
        request: &GenerationRequest,
        _cancel: &CancellationToken,
    ) -> Result<ByteStream, BackendError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if let Some(status) = self.fail_status {
            return Err(BackendError::Status {
                status,
                body: String::new(),
            });
        }

        let delay = self.delay;
        let lines = self.lines.clone();
        Ok(futures::stream::iter(lines)
            .then(move |line| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(Bytes::from(line))
            })
            .boxed())
    }

    async fn generate_title(&self, _text: &str) -> String {
        "Scripted title".to_string()
    }
}

/// A well-formed backend body: start, one delta per part, finish.
pub fn complete_body(message_id: &str, parts: &[&str]) -> Vec<String> {
    let mut lines = vec![format!("f:{{\"messageId\":\"{}\"}}\n", message_id)];
    for part in parts {
        lines.push(format!("0:{}\n", serde_json::to_string(part).unwrap()));
    }
    lines.push(
        "e:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":1,\"completionTokens\":1},\"isContinued\":false}\n"
            .to_string(),
    );
    lines.push(
        "d:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":1,\"completionTokens\":1}}\n"
            .to_string(),
    );
    lines
}

#[derive(Default)]
pub struct RecordingCommitter {
    commits: Mutex<Vec<CommitRequest>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingCommitter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn commits(&self) -> Vec<CommitRequest> {
        self.commits.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Committer for RecordingCommitter {
    async fn commit(&self, request: CommitRequest) -> chatrelay_traits::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TraitError::Other("store unavailable".to_string()));
        }
        self.commits.lock().push(request);
        Ok(())
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}
