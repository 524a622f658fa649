//! Tee, aggregation and the per-generation runtime.

mod aggregator;
mod generation;
mod tee;

pub use aggregator::{Aggregator, AssistantMessageDraft, CommitTarget, Progress, run_monitor};
pub use generation::{
    AckState, ActiveGeneration, ActiveGenerations, GenerationSource, GenerationStream,
    PumpOutcome, StreamSink,
};
pub use tee::{DEFAULT_TEE_BUFFER, Tee};
