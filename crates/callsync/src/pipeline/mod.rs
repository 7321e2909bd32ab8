//! Run orchestration: state machine, per-run context and reporting

pub mod context;
pub mod orchestrator;
pub mod snapshot;
pub mod summary;

pub use context::{RunContext, RunState, StageCounts};
pub use orchestrator::{Pipeline, WindowOverride};
pub use summary::RunSummary;
