//! Error Types
//!
//! Typed failures for every layer of the engine: schema compilation,
//! parameter validation, step execution, test case runs, and catalog
//! loading.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type returned by step handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A stored schema definition could not be compiled.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid schema '{schema_id}' (v{version}): {message}")]
pub struct SchemaConfigurationError {
    pub schema_id: String,
    pub version: u32,
    pub message: String,
}

/// One constraint violation, attributed to the schema that reported it.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub schema_id: String,
    pub message: String,
}

impl Violation {
    pub fn new(schema_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            schema_id: schema_id.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.schema_id, self.message)
    }
}

/// Aggregate of every violation found for a step's parameters.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("parameter validation failed for step '{step_name}': {}", join_violations(.violations))]
pub struct ParameterValidationError {
    pub step_name: String,
    pub violations: Vec<Violation>,
}

impl ParameterValidationError {
    /// Returns the distinct schema ids that reported violations.
    pub fn schema_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for violation in &self.violations {
            if !ids.contains(&violation.schema_id.as_str()) {
                ids.push(&violation.schema_id);
            }
        }
        ids
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Category of a step failure, stored on execution records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Validation,
    UnsupportedStep,
    Handler,
    Timeout,
    Interrupted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::UnsupportedStep => "unsupported step",
            Self::Handler => "handler",
            Self::Timeout => "timeout",
            Self::Interrupted => "interrupted",
        };
        f.write_str(label)
    }
}

/// Failure of a single step.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error("no step configuration found for '{0}'")]
    UnknownStepConfig(String),

    #[error(transparent)]
    Validation(#[from] ParameterValidationError),

    #[error("unsupported step: no handler registered for '{0}'")]
    UnsupportedStep(String),

    #[error("handler for step '{step_name}' failed: {message}")]
    Handler { step_name: String, message: String },

    #[error("step '{step_name}' failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        step_name: String,
        attempts: u32,
        last_error: String,
    },

    #[error("step '{step_name}' timed out after {elapsed:?} (deadline {deadline:?}, {attempts} attempt(s)){}", last_error_suffix(.last_error))]
    DeadlineExceeded {
        step_name: String,
        deadline: Duration,
        elapsed: Duration,
        attempts: u32,
        last_error: Option<String>,
    },

    /// The step cycle was cut short by a storage failure, a panic, or
    /// cancellation of its task.
    #[error("step '{step_name}' was interrupted: {reason}")]
    Interrupted { step_name: String, reason: String },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(": last error: {}", e),
        None => String::new(),
    }
}

impl StepError {
    /// Returns true if the error may clear up on another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Handler { .. })
    }

    /// Maps the error onto the category recorded in the audit log.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnknownStepConfig(_) => FailureKind::Configuration,
            Self::Validation(_) => FailureKind::Validation,
            Self::UnsupportedStep(_) => FailureKind::UnsupportedStep,
            Self::Handler { .. } | Self::RetriesExhausted { .. } => FailureKind::Handler,
            Self::DeadlineExceeded { .. } => FailureKind::Timeout,
            Self::Interrupted { .. } => FailureKind::Interrupted,
        }
    }
}

/// Failure reading from or writing to the repository.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RepositoryError {
    #[error("test case '{0}' not found")]
    TestCaseNotFound(String),

    #[error("step {step_id} not found in test case '{test_case_id}'")]
    StepNotFound { test_case_id: String, step_id: u32 },

    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Failure appending an execution record.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write execution record: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode execution record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("execution log lock poisoned")]
    Poisoned,
}

/// A test case run that did not complete.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("test case '{test_case_id}' aborted at step {step_id} ({step_name}): {source}")]
    StepFailed {
        test_case_id: String,
        step_id: u32,
        step_name: String,
        #[source]
        source: StepError,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("test case run panicked: {0}")]
    Panicked(String),
}

/// Failure starting or driving the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to open audit log: {0}")]
    AuditLog(#[from] SinkError),

    #[error("failed to poll for test cases: {0}")]
    Poll(#[from] RepositoryError),
}

/// Failure loading a catalog file.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("catalog is invalid:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),
}
