// Stage orchestration and execution tracing

pub mod orchestrator;
pub mod trace;

pub use orchestrator::Orchestrator;
pub use trace::{TraceEntry, TracePhase, TraceWriter};
