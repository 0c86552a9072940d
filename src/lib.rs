//! CaseRunner - Schema-Validated Test Case Execution Engine
//!
//! Executes test cases made of ordered, named steps. Every step's parameters
//! are validated against versioned JSON-Schema definitions before the step
//! runs, and each step is bounded by a timeout and a retry budget.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`catalog`]: Schemas, step configurations, test cases, and their storage
//! - [`schema`]: Compiled schema cache and parameter validation
//! - [`execution`]: Handlers, retry loop, step runner, and dispatcher
//! - [`audit`]: Execution record sinks and run summaries
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use caserunner::execution::{Engine, LoggingHandler};
//! use caserunner::load_catalog;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load schemas, step configurations, and test cases from YAML
//!     let catalog = load_catalog("catalog.yaml")?;
//!     let engine = Engine::from_catalog(catalog);
//!
//!     // Register what each step actually does
//!     engine.register_handler("INVOKE_JAVA_PROCESS", Arc::new(LoggingHandler));
//!
//!     // Run every enabled test case once
//!     let records = engine.run_once().await?;
//!     println!("{}", caserunner::audit::render_summary(&records));
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod catalog;
pub mod error;
pub mod execution;
pub mod schema;

// Re-export commonly used types
pub use catalog::model::{ExecutionRecord, Parameters, Step, TestCase};
pub use catalog::parser::{load_catalog, Catalog};
pub use error::{EngineError, RunError, StepError};
pub use execution::engine::{Engine, EngineConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "CaseRunner";
