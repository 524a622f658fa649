use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::{Result, StreamOutcome, StreamRegistry};

/// Producer handle for one registered stream.
///
/// Dropping an unfinished publisher marks the stream abandoned.
pub struct StreamPublisher {
    registry: Arc<dyn StreamRegistry>,
    stream_id: Uuid,
    finished: bool,
}

impl StreamPublisher {
    pub fn new(registry: Arc<dyn StreamRegistry>, stream_id: Uuid) -> Self {
        Self {
            registry,
            stream_id,
            finished: false,
        }
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub async fn publish(&self, frame: Bytes) -> Result<()> {
        self.registry.publish(self.stream_id, frame).await
    }

    pub async fn complete(mut self) -> Result<()> {
        self.finished = true;
        self.registry
            .finish(self.stream_id, StreamOutcome::Completed)
            .await
    }

    pub async fn abandon(mut self) -> Result<()> {
        self.finished = true;
        self.registry
            .finish(self.stream_id, StreamOutcome::Abandoned)
            .await
    }
}

impl Drop for StreamPublisher {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let registry = self.registry.clone();
        let stream_id = self.stream_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = registry.finish(stream_id, StreamOutcome::Abandoned).await {
                        warn!(stream_id = %stream_id, error = %err, "Failed to abandon dropped stream");
                    }
                });
            }
            Err(_) => {
                warn!(stream_id = %stream_id, "Publisher dropped outside a runtime; stream left open");
            }
        }
    }
}
