//! Registry on top of the redb stream log.
//!
//! Frames are committed to disk before readers are woken. Readers in this
//! process are woken through a [`Notify`]; readers in other processes sharing
//! the database file advance on the polling interval.

use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_storage::StreamLogStorage;
use chatrelay_storage::time_utils::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    AttachPoint, FrameStream, RegistryError, Result, StreamOutcome, StreamRegistration,
    StreamRegistry, StreamState,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const READ_BATCH: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationRecord {
    #[serde(flatten)]
    registration: StreamRegistration,
    state: StreamState,
}

#[derive(Clone)]
pub struct DurableRegistry {
    storage: StreamLogStorage,
    notify: Arc<Notify>,
    poll_interval: Duration,
    /// A live stream with no write for this long is reported `Abandoned`.
    stale_after: Duration,
}

impl DurableRegistry {
    pub fn new(storage: StreamLogStorage, stale_after: Duration) -> Self {
        Self {
            storage,
            notify: Arc::new(Notify::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_after,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StreamLogStorage) -> Result<T> + Send + 'static,
    {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || f(&storage))
            .await
            .map_err(|err| RegistryError::Storage(err.to_string()))?
    }

    async fn load(&self, stream_id: Uuid) -> Result<Option<RegistrationRecord>> {
        self.blocking(move |storage| load_record(storage, stream_id)).await
    }

    /// Effective state, with stale live streams reported as abandoned.
    async fn effective_state(&self, stream_id: Uuid) -> Result<Option<StreamState>> {
        let stale_after = self.stale_after;
        self.blocking(move |storage| effective_state(storage, stream_id, stale_after))
            .await
    }
}

fn load_record(storage: &StreamLogStorage, stream_id: Uuid) -> Result<Option<RegistrationRecord>> {
    match storage.get_registration(&stream_id.to_string())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn store_record(storage: &StreamLogStorage, record: &RegistrationRecord) -> Result<()> {
    let bytes = serde_json::to_vec(record)?;
    storage.put_registration(&record.registration.stream_id.to_string(), &bytes)?;
    Ok(())
}

fn effective_state(
    storage: &StreamLogStorage,
    stream_id: Uuid,
    stale_after: Duration,
) -> Result<Option<StreamState>> {
    let Some(record) = load_record(storage, stream_id)? else {
        return Ok(None);
    };
    if record.state.is_finished() {
        return Ok(Some(record.state));
    }

    let touched = storage.last_touched_ms(&stream_id.to_string())?.unwrap_or(0);
    let idle_ms = now_ms().saturating_sub(touched);
    if idle_ms > stale_after.as_millis() as i64 {
        return Ok(Some(StreamState::Abandoned));
    }
    Ok(Some(record.state))
}

#[async_trait]
impl StreamRegistry for DurableRegistry {
    async fn register(&self, registration: &StreamRegistration) -> Result<()> {
        let record = RegistrationRecord {
            registration: registration.clone(),
            state: StreamState::Registered,
        };
        self.blocking(move |storage| {
            let stream_id = record.registration.stream_id;
            if storage.get_registration(&stream_id.to_string())?.is_some() {
                return Err(RegistryError::AlreadyRegistered(stream_id));
            }
            store_record(storage, &record)
        })
        .await?;
        debug!(stream_id = %registration.stream_id, "Registered durable stream");
        Ok(())
    }

    async fn publish(&self, stream_id: Uuid, frame: Bytes) -> Result<()> {
        self.blocking(move |storage| {
            let mut record =
                load_record(storage, stream_id)?.ok_or(RegistryError::NotRegistered(stream_id))?;
            match record.state {
                state if state.is_finished() => return Err(RegistryError::Finished(stream_id)),
                StreamState::Registered => {
                    record.state = StreamState::Live;
                    store_record(storage, &record)?;
                }
                _ => {}
            }
            storage.append_frame(&stream_id.to_string(), &frame)?;
            Ok(())
        })
        .await?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn finish(&self, stream_id: Uuid, outcome: StreamOutcome) -> Result<()> {
        self.blocking(move |storage| {
            let mut record =
                load_record(storage, stream_id)?.ok_or(RegistryError::NotRegistered(stream_id))?;
            if record.state.is_finished() {
                return Ok(());
            }
            record.state = outcome.into();
            store_record(storage, &record)
        })
        .await?;
        self.notify.notify_waiters();
        debug!(stream_id = %stream_id, ?outcome, "Durable stream finished");
        Ok(())
    }

    async fn attach(&self, stream_id: Uuid, from: AttachPoint) -> Result<Option<FrameStream>> {
        match self.effective_state(stream_id).await? {
            None => return Ok(None),
            Some(state) if state.is_finished() => return Ok(None),
            Some(_) => {}
        }

        let cursor = match from {
            AttachPoint::Start => 0,
            AttachPoint::Tail => {
                self.blocking(move |storage| Ok(storage.frame_count(&stream_id.to_string())?))
                    .await?
            }
        };

        Ok(Some(tail(self.clone(), stream_id, cursor)))
    }

    async fn state(&self, stream_id: Uuid) -> Result<Option<StreamState>> {
        self.effective_state(stream_id).await
    }
}

struct Batch {
    /// Stream state read before `frames`.
    state: Option<StreamState>,
    frames: Vec<(u64, Vec<u8>)>,
}

/// State first, then frames: every frame written before a finish is visible
/// to a reader that has already seen the finished state.
fn read_batch(
    storage: &StreamLogStorage,
    stream_id: Uuid,
    cursor: u64,
    stale_after: Duration,
) -> Result<Batch> {
    let state = effective_state(storage, stream_id, stale_after)?;
    let frames = storage.read_frames(&stream_id.to_string(), cursor, READ_BATCH)?;
    Ok(Batch { state, frames })
}

struct TailState {
    registry: DurableRegistry,
    stream_id: Uuid,
    cursor: u64,
    pending: VecDeque<Bytes>,
}

fn tail(registry: DurableRegistry, stream_id: Uuid, cursor: u64) -> FrameStream {
    let state = TailState {
        registry,
        stream_id,
        cursor,
        pending: VecDeque::new(),
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((frame, state));
            }

            let notify = state.registry.notify.clone();
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let stream_id = state.stream_id;
            let cursor = state.cursor;
            let stale_after = state.registry.stale_after;
            let batch = state
                .registry
                .blocking(move |storage| read_batch(storage, stream_id, cursor, stale_after))
                .await;

            match batch {
                Ok(batch) if !batch.frames.is_empty() => {
                    for (seq, data) in batch.frames {
                        state.cursor = seq + 1;
                        state.pending.push_back(Bytes::from(data));
                    }
                    continue;
                }
                Ok(batch) => match batch.state {
                    Some(current) if !current.is_finished() => {}
                    _ => return None,
                },
                Err(err) => {
                    warn!(stream_id = %stream_id, error = %err, "Stream tail read failed");
                    return None;
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(state.registry.poll_interval) => {}
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::{drain, exercise_lifecycle};
    use chatrelay_storage::open_stream_log;
    use tempfile::tempdir;

    fn registry(dir: &tempfile::TempDir, stale_after: Duration) -> DurableRegistry {
        let storage = open_stream_log(dir.path().join("streams.redb"), "chatbot-streams").unwrap();
        DurableRegistry::new(storage, stale_after).with_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let dir = tempdir().unwrap();
        exercise_lifecycle(Arc::new(registry(&dir, Duration::from_secs(60)))).await;
    }

    #[tokio::test]
    async fn test_reader_without_shared_notify_advances_by_polling() {
        let dir = tempdir().unwrap();
        let writer = registry(&dir, Duration::from_secs(60));
        // Same database, separate wakeup channel: models a reader in another process.
        let reader_side = DurableRegistry::new(writer.storage.clone(), Duration::from_secs(60))
            .with_poll_interval(Duration::from_millis(20));

        let registration = StreamRegistration::new(Uuid::new_v4(), Uuid::new_v4());
        let id = registration.stream_id;
        writer.register(&registration).await.unwrap();

        let reader = reader_side.attach(id, AttachPoint::Tail).await.unwrap().unwrap();
        let handle = tokio::spawn(drain(reader));

        writer.publish(id, Bytes::from_static(b"0:\"one\"\n")).await.unwrap();
        writer.publish(id, Bytes::from_static(b"0:\"two\"\n")).await.unwrap();
        writer.finish(id, StreamOutcome::Completed).await.unwrap();

        let bytes = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bytes, b"0:\"one\"\n0:\"two\"\n");
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let registration = StreamRegistration::new(Uuid::new_v4(), Uuid::new_v4());
        let id = registration.stream_id;
        {
            let first = registry(&dir, Duration::from_secs(60));
            first.register(&registration).await.unwrap();
            first.publish(id, Bytes::from_static(b"0:\"a\"\n")).await.unwrap();
            first.finish(id, StreamOutcome::Completed).await.unwrap();
        }

        let reopened = registry(&dir, Duration::from_secs(60));
        assert_eq!(reopened.state(id).await.unwrap(), Some(StreamState::Completed));
        assert!(reopened.attach(id, AttachPoint::Tail).await.unwrap().is_none());
        assert!(matches!(
            reopened.register(&registration).await,
            Err(RegistryError::AlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_silent_live_stream_is_reported_abandoned() {
        let dir = tempdir().unwrap();
        let registry = registry(&dir, Duration::from_millis(50));
        let registration = StreamRegistration::new(Uuid::new_v4(), Uuid::new_v4());
        let id = registration.stream_id;
        registry.register(&registration).await.unwrap();
        registry.publish(id, Bytes::from_static(b"f:{}\n")).await.unwrap();
        assert_eq!(registry.state(id).await.unwrap(), Some(StreamState::Live));

        let reader = registry.attach(id, AttachPoint::Start).await.unwrap().unwrap();
        // The reader gets what was written, then ends once the stream goes stale.
        let bytes = tokio::time::timeout(Duration::from_secs(5), drain(reader))
            .await
            .unwrap();
        assert_eq!(bytes, b"f:{}\n");
        assert_eq!(registry.state(id).await.unwrap(), Some(StreamState::Abandoned));
        assert!(registry.attach(id, AttachPoint::Tail).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_read_after_finish_keeps_trailing_frames() {
        let dir = tempdir().unwrap();
        let registry = registry(&dir, Duration::from_secs(60));
        let registration = StreamRegistration::new(Uuid::new_v4(), Uuid::new_v4());
        let id = registration.stream_id;
        registry.register(&registration).await.unwrap();
        registry.publish(id, Bytes::from_static(b"0:\"a\"\n")).await.unwrap();

        // A reader that already consumed frame 0 races the last write and the finish.
        registry.publish(id, Bytes::from_static(b"0:\"b\"\n")).await.unwrap();
        registry.finish(id, StreamOutcome::Completed).await.unwrap();

        let batch = read_batch(&registry.storage, id, 1, Duration::from_secs(60)).unwrap();
        assert_eq!(batch.state, Some(StreamState::Completed));
        assert_eq!(batch.frames, vec![(1, b"0:\"b\"\n".to_vec())]);

        let batch = read_batch(&registry.storage, id, 2, Duration::from_secs(60)).unwrap();
        assert!(batch.frames.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_readers_see_every_frame_before_finish() {
        let dir = tempdir().unwrap();
        let writer = registry(&dir, Duration::from_secs(60));
        let reader_side = DurableRegistry::new(writer.storage.clone(), Duration::from_secs(60))
            .with_poll_interval(Duration::from_millis(1));

        for _ in 0..10 {
            let registration = StreamRegistration::new(Uuid::new_v4(), Uuid::new_v4());
            let id = registration.stream_id;
            writer.register(&registration).await.unwrap();

            let mut readers = Vec::new();
            for _ in 0..3 {
                let reader = reader_side.attach(id, AttachPoint::Start).await.unwrap().unwrap();
                readers.push(tokio::spawn(drain(reader)));
            }

            let mut expected = Vec::new();
            for i in 0..20 {
                let frame = format!("0:\"{}\"\n", i);
                expected.extend_from_slice(frame.as_bytes());
                writer.publish(id, Bytes::from(frame)).await.unwrap();
            }
            writer.finish(id, StreamOutcome::Completed).await.unwrap();

            for reader in readers {
                let bytes = tokio::time::timeout(Duration::from_secs(5), reader)
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(bytes, expected);
            }
        }
    }
}
