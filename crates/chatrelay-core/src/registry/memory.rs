//! In-process registry: one append-only frame log per stream.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use super::{
    AttachPoint, FrameStream, RegistryError, Result, StreamOutcome, StreamRegistration,
    StreamRegistry, StreamState,
};

struct FrameLog {
    frames: Vec<Bytes>,
    state: StreamState,
}

struct StreamEntry {
    registration: StreamRegistration,
    log: RwLock<FrameLog>,
    // Bumped after every append or state change.
    changed: watch::Sender<()>,
}

#[derive(Clone)]
enum Slot {
    Open(Arc<StreamEntry>),
    // Frames are released on finish; readers already attached hold the entry.
    Finished {
        registration: StreamRegistration,
        state: StreamState,
    },
}

/// Registry for a single process. Readers in other processes cannot attach.
#[derive(Default)]
pub struct MemoryRegistry {
    streams: DashMap<Uuid, Slot>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn retained_bytes(&self) -> usize {
        self.streams
            .iter()
            .map(|slot| match slot.value() {
                Slot::Open(entry) => entry.log.read().frames.iter().map(Bytes::len).sum(),
                Slot::Finished { .. } => 0,
            })
            .sum()
    }
}

#[async_trait]
impl StreamRegistry for MemoryRegistry {
    async fn register(&self, registration: &StreamRegistration) -> Result<()> {
        match self.streams.entry(registration.stream_id) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered(registration.stream_id)),
            Entry::Vacant(slot) => {
                let (changed, _) = watch::channel(());
                slot.insert(Slot::Open(Arc::new(StreamEntry {
                    registration: registration.clone(),
                    log: RwLock::new(FrameLog {
                        frames: Vec::new(),
                        state: StreamState::Registered,
                    }),
                    changed,
                })));
                debug!(stream_id = %registration.stream_id, "Registered stream");
                Ok(())
            }
        }
    }

    async fn publish(&self, stream_id: Uuid, frame: Bytes) -> Result<()> {
        let entry = match self.streams.get(&stream_id).as_deref() {
            Some(Slot::Open(entry)) => entry.clone(),
            Some(Slot::Finished { .. }) => return Err(RegistryError::Finished(stream_id)),
            None => return Err(RegistryError::NotRegistered(stream_id)),
        };
        {
            let mut log = entry.log.write();
            if log.state.is_finished() {
                return Err(RegistryError::Finished(stream_id));
            }
            log.state = StreamState::Live;
            log.frames.push(frame);
        }
        entry.changed.send_replace(());
        Ok(())
    }

    async fn finish(&self, stream_id: Uuid, outcome: StreamOutcome) -> Result<()> {
        let entry = match self.streams.get(&stream_id).as_deref() {
            Some(Slot::Open(entry)) => entry.clone(),
            Some(Slot::Finished { .. }) => return Ok(()),
            None => return Err(RegistryError::NotRegistered(stream_id)),
        };
        let state = StreamState::from(outcome);
        {
            let mut log = entry.log.write();
            if log.state.is_finished() {
                return Ok(());
            }
            log.state = state;
        }
        self.streams.insert(
            stream_id,
            Slot::Finished {
                registration: entry.registration.clone(),
                state,
            },
        );
        entry.changed.send_replace(());
        debug!(
            stream_id = %stream_id,
            chat_id = %entry.registration.chat_id,
            ?outcome,
            "Stream finished"
        );
        Ok(())
    }

    async fn attach(&self, stream_id: Uuid, from: AttachPoint) -> Result<Option<FrameStream>> {
        let entry = match self.streams.get(&stream_id).as_deref() {
            Some(Slot::Open(entry)) => entry.clone(),
            Some(Slot::Finished {
                registration,
                state,
            }) => {
                debug!(stream_id = %stream_id, chat_id = %registration.chat_id, ?state, "Stream already finished");
                return Ok(None);
            }
            None => return Ok(None),
        };

        // Subscribe before reading the cursor so no append is missed.
        let changed = entry.changed.subscribe();
        let cursor = {
            let log = entry.log.read();
            if log.state.is_finished() {
                return Ok(None);
            }
            match from {
                AttachPoint::Start => 0,
                AttachPoint::Tail => log.frames.len(),
            }
        };

        Ok(Some(follow(entry, cursor, changed)))
    }

    async fn state(&self, stream_id: Uuid) -> Result<Option<StreamState>> {
        Ok(self.streams.get(&stream_id).map(|slot| match slot.value() {
            Slot::Open(entry) => entry.log.read().state,
            Slot::Finished { state, .. } => *state,
        }))
    }
}

fn follow(entry: Arc<StreamEntry>, cursor: usize, changed: watch::Receiver<()>) -> FrameStream {
    Box::pin(futures::stream::unfold(
        (entry, cursor, changed),
        |(entry, mut cursor, mut changed)| async move {
            loop {
                let next = {
                    let log = entry.log.read();
                    match log.frames.get(cursor) {
                        Some(frame) => Some(Some(frame.clone())),
                        None if log.state.is_finished() => Some(None),
                        None => None,
                    }
                };

                match next {
                    Some(Some(frame)) => {
                        cursor += 1;
                        return Some((frame, (entry, cursor, changed)));
                    }
                    Some(None) => return None,
                    None => {
                        if changed.changed().await.is_err() {
                            return None;
                        }
                    }
                }
            }
        },
    ))
}
