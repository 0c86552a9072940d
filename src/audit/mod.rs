//! Audit Module
//!
//! Where execution records go and how they are summarized.
//!
//! # Components
//!
//! - [`sink`]: Append-only record sinks (memory, JSON Lines file)
//! - [`report`]: Terminal summaries of a run

pub mod report;
pub mod sink;

pub use report::{render_summary, RunSummary};
pub use sink::{ExecutionSink, InMemoryExecutionLog, JsonLinesExecutionLog, TeeSink};
