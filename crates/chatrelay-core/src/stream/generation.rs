//! One generation: the backend call, its tee, and the two branches.
//!
//! The backend is invoked inside the spawned pump, so failures before the
//! first byte travel in-band as a single `Error` chunk. The client branch is
//! forwarded to a [`StreamSink`]; the monitor branch feeds the aggregator.
//! Client disconnects detach the client branch only.

use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::aggregator::{CommitTarget, run_monitor};
use super::tee::Tee;
use crate::backend::{BackendError, GenerationBackend, GenerationRequest};
use crate::protocol::Chunk;
use crate::registry::StreamPublisher;

/// Per-stream guards against wiring a branch twice.
#[derive(Debug, Default)]
pub struct AckState {
    merged: AtomicBool,
    consumed: AtomicBool,
}

impl AckState {
    fn try_merge(&self) -> bool {
        !self.merged.swap(true, Ordering::AcqRel)
    }

    fn try_consume(&self) -> bool {
        !self.consumed.swap(true, Ordering::AcqRel)
    }

    pub fn is_merged(&self) -> bool {
        self.merged.load(Ordering::Acquire)
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }
}

/// Cancellation handles for in-flight generations, keyed by stream id.
#[derive(Clone, Default)]
pub struct ActiveGenerations {
    tokens: Arc<DashMap<Uuid, CancellationToken>>,
}

impl ActiveGenerations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, stream_id: Uuid) -> ActiveGeneration {
        let token = CancellationToken::new();
        self.tokens.insert(stream_id, token.clone());
        ActiveGeneration {
            stream_id,
            token,
            tokens: self.tokens.clone(),
        }
    }

    /// Cancel everything in flight. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.tokens.iter() {
            entry.value().cancel();
            cancelled += 1;
        }
        cancelled
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Tracking entry; removed from [`ActiveGenerations`] on drop.
pub struct ActiveGeneration {
    stream_id: Uuid,
    token: CancellationToken,
    tokens: Arc<DashMap<Uuid, CancellationToken>>,
}

impl ActiveGeneration {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ActiveGeneration {
    fn drop(&mut self) {
        self.tokens.remove(&self.stream_id);
    }
}

pub struct GenerationSource {
    pub backend: Arc<dyn GenerationBackend>,
    pub request: GenerationRequest,
    pub active: ActiveGeneration,
}

/// How the pump ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Backend body ended normally.
    Finished,
    /// Backend or transport failure, reported in-band.
    Failed,
    /// Server-side cancellation, reported in-band.
    Cancelled,
}

/// Destination of the client branch.
pub enum StreamSink {
    /// Publish into the resumable registry; readers attach there.
    Registry(StreamPublisher),
    /// Feed a single response body directly.
    Direct(mpsc::Sender<Bytes>),
}

struct Pump {
    source: GenerationSource,
    tee: Tee,
    monitor: mpsc::Receiver<Bytes>,
    outcome: oneshot::Sender<PumpOutcome>,
}

struct ClientBranch {
    rx: mpsc::Receiver<Bytes>,
    outcome: oneshot::Receiver<PumpOutcome>,
}

pub struct GenerationStream {
    stream_id: Uuid,
    ack: AckState,
    pump: Mutex<Option<Pump>>,
    client: Mutex<Option<ClientBranch>>,
}

impl GenerationStream {
    pub fn new(stream_id: Uuid, source: GenerationSource, buffer: usize) -> Self {
        let mut tee = Tee::new();
        let client_rx = tee.branch("client", buffer);
        let monitor = tee.branch("monitor", buffer);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        Self {
            stream_id,
            ack: AckState::default(),
            pump: Mutex::new(Some(Pump {
                source,
                tee,
                monitor,
                outcome: outcome_tx,
            })),
            client: Mutex::new(Some(ClientBranch {
                rx: client_rx,
                outcome: outcome_rx,
            })),
        }
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn ack(&self) -> &AckState {
        &self.ack
    }

    /// Start the backend pump and the monitor branch. No-op after the first call.
    pub fn consume(&self, target: CommitTarget) -> bool {
        if !self.ack.try_consume() {
            return false;
        }
        let Some(pump) = self.pump.lock().take() else {
            return false;
        };

        let Pump {
            source,
            tee,
            monitor,
            outcome,
        } = pump;
        tokio::spawn(run_monitor(self.stream_id, monitor, target));
        tokio::spawn(pump_backend(self.stream_id, source, tee, outcome));
        true
    }

    /// Forward the client branch into `sink`. No-op after the first call.
    pub fn merge_into(&self, sink: StreamSink) -> bool {
        if !self.ack.try_merge() {
            return false;
        }
        let Some(branch) = self.client.lock().take() else {
            return false;
        };

        tokio::spawn(forward_client(self.stream_id, branch, sink));
        true
    }
}

async fn pump_backend(
    stream_id: Uuid,
    source: GenerationSource,
    mut tee: Tee,
    outcome_tx: oneshot::Sender<PumpOutcome>,
) {
    let GenerationSource {
        backend,
        request,
        active,
    } = source;

    let outcome = drive(stream_id, backend.as_ref(), &request, active.token(), &mut tee).await;
    debug!(stream_id = %stream_id, ?outcome, "Generation pump finished");
    let _ = outcome_tx.send(outcome);
    // Dropping the tee closes both branches.
}

async fn drive(
    stream_id: Uuid,
    backend: &dyn GenerationBackend,
    request: &GenerationRequest,
    cancel: &CancellationToken,
    tee: &mut Tee,
) -> PumpOutcome {
    let mut body = match backend.invoke(request, cancel).await {
        Ok(body) => body,
        Err(err) => {
            warn!(stream_id = %stream_id, chat_id = %request.chat_id, error = %err, "Backend call failed");
            tee.send_line(Chunk::error(err.client_message()).encode()).await;
            return match err {
                BackendError::Cancelled => PumpOutcome::Cancelled,
                _ => PumpOutcome::Failed,
            };
        }
    };
    info!(stream_id = %stream_id, chat_id = %request.chat_id, "Backend stream opened");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(stream_id = %stream_id, "Generation cancelled");
                tee.send_line(Chunk::error(BackendError::Cancelled.client_message()).encode()).await;
                return PumpOutcome::Cancelled;
            }
            next = body.next() => match next {
                Some(Ok(bytes)) => {
                    if tee.send(bytes).await == 0 {
                        debug!(stream_id = %stream_id, "No branch left, dropping backend stream");
                        return PumpOutcome::Finished;
                    }
                }
                Some(Err(err)) => {
                    warn!(stream_id = %stream_id, error = %err, "Backend stream failed");
                    tee.send_line(Chunk::error(err.client_message()).encode()).await;
                    return PumpOutcome::Failed;
                }
                None => return PumpOutcome::Finished,
            }
        }
    }
}

async fn forward_client(stream_id: Uuid, branch: ClientBranch, sink: StreamSink) {
    let ClientBranch { mut rx, outcome } = branch;

    match sink {
        StreamSink::Direct(tx) => {
            while let Some(frame) = rx.recv().await {
                if tx.send(frame).await.is_err() {
                    debug!(stream_id = %stream_id, "Client disconnected, generation continues");
                    return;
                }
            }
        }
        StreamSink::Registry(publisher) => {
            while let Some(frame) = rx.recv().await {
                if let Err(err) = publisher.publish(frame).await {
                    warn!(stream_id = %stream_id, error = %err, "Registry publish failed");
                    drop(rx);
                    if let Err(err) = publisher.abandon().await {
                        warn!(stream_id = %stream_id, error = %err, "Failed to abandon stream");
                    }
                    return;
                }
            }

            let result = match outcome.await {
                Ok(PumpOutcome::Finished) => publisher.complete().await,
                Ok(_) | Err(_) => publisher.abandon().await,
            };
            if let Err(err) = result {
                warn!(stream_id = %stream_id, error = %err, "Failed to finish stream");
            }
        }
    }
}
