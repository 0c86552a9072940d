//! Step Execution Module
//!
//! Runs test cases: handler selection, the retry/timeout loop, the
//! per-test-case step runner, and the dispatcher that fans test cases out
//! to concurrent tasks.
//!
//! # Architecture
//!
//! - [`handler`]: Step handler capability and registry
//! - [`retry`]: Deadline-bounded retry executor
//! - [`runner`]: Sequential step runner for one test case
//! - [`dispatcher`]: Polling dispatcher with at-most-one run per test case
//! - [`engine`]: Engine configuration and wiring

pub mod dispatcher;
pub mod engine;
pub mod handler;
pub mod retry;
pub mod runner;

pub use dispatcher::{Dispatcher, ErrorReporter, LogReporter, DEFAULT_POLL_INTERVAL};
pub use engine::{Engine, EngineConfig};
pub use handler::{FnHandler, HandlerRegistry, LoggingHandler, StepHandler};
pub use retry::{LogObserver, RetryExecutor, RetryObserver, RetryPolicy, DEFAULT_BACKOFF};
pub use runner::{RunReport, StepRunner};
