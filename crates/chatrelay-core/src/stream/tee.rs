//! Fan-out of one byte source into independently paced branches.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

/// Default per-branch buffer, in frames.
pub const DEFAULT_TEE_BUFFER: usize = 256;

/// Each branch owns a bounded queue. A full branch applies backpressure to
/// the producer only; a branch whose receiver is gone is detached.
pub struct Tee {
    branches: Vec<Branch>,
    at_line_start: bool,
}

struct Branch {
    name: &'static str,
    tx: mpsc::Sender<Bytes>,
}

impl Default for Tee {
    fn default() -> Self {
        Self::new()
    }
}

impl Tee {
    pub fn new() -> Self {
        Self {
            branches: Vec::new(),
            at_line_start: true,
        }
    }

    /// Add a branch that sees every frame sent from now on.
    pub fn branch(&mut self, name: &'static str, capacity: usize) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.branches.push(Branch { name, tx });
        rx
    }

    /// Whether the last byte sent ended a line.
    pub fn at_line_start(&self) -> bool {
        self.at_line_start
    }

    /// Deliver `bytes` to every live branch, in branch order.
    pub async fn send(&mut self, bytes: Bytes) -> usize {
        if bytes.is_empty() {
            return self.branches.len();
        }
        self.at_line_start = bytes.ends_with(b"\n");

        let mut detached = Vec::new();
        for (index, branch) in self.branches.iter().enumerate() {
            if branch.tx.send(bytes.clone()).await.is_err() {
                detached.push(index);
            }
        }
        for index in detached.into_iter().rev() {
            let branch = self.branches.remove(index);
            debug!(branch = branch.name, "Tee branch detached");
        }
        self.branches.len()
    }

    /// Send a complete line, first terminating any partial line in flight.
    pub async fn send_line(&mut self, line: String) -> usize {
        if !self.at_line_start {
            self.send(Bytes::from_static(b"\n")).await;
        }
        self.send(Bytes::from(line)).await
    }
}
