//! Catalog Data Model
//!
//! Configuration-plane entities (schemas, step configurations, test cases)
//! and the execution records produced by runs.
//!
//! # Example YAML Format
//!
//! ```yaml
//! schemas:
//!   - schema_id: AIT_PARAMETERS
//!     version: 1
//!     definition: |
//!       {"type": "object", "required": ["aitNumber"]}
//!
//! steps:
//!   - step_name: DELETE_INSERT_AIT_SCAN_WINDOW
//!     timeout_seconds: 300
//!     max_retries: 3
//!     schemas:
//!       - schema_id: AIT_PARAMETERS
//!         sequence: 1
//!
//! test_cases:
//!   - id: TC001
//!     name: AIT Scan Window Update
//!     steps:
//!       - step_id: 1
//!         step_name: DELETE_INSERT_AIT_SCAN_WINDOW
//!         sequence: 1
//!         parameters:
//!           aitNumber: AIT123456
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FailureKind, StepError};

/// Validated input parameters for a step, keyed by name.
pub type Parameters = Map<String, Value>;

/// Default step timeout when the catalog does not specify one.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Default retry budget when the catalog does not specify one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A versioned JSON-Schema definition for step parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParameterSchema {
    pub schema_id: String,

    pub version: u32,

    /// JSON-Schema document text
    pub definition: String,

    /// Only active versions take part in validation
    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl ParameterSchema {
    /// Creates an active schema version.
    pub fn new(schema_id: impl Into<String>, version: u32, definition: impl Into<String>) -> Self {
        Self {
            schema_id: schema_id.into(),
            version,
            definition: definition.into(),
            active: true,
            description: None,
            created_at: Utc::now(),
            modified_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Toggles activation. This is the only mutation a stored schema allows.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        self.modified_at = Some(Utc::now());
    }
}

/// Associates a step with a schema it must satisfy.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SchemaBinding {
    pub schema_id: String,

    #[serde(default = "default_true")]
    pub required: bool,

    /// Validation order within the step
    pub sequence: u32,
}

impl SchemaBinding {
    pub fn required(schema_id: impl Into<String>, sequence: u32) -> Self {
        Self {
            schema_id: schema_id.into(),
            required: true,
            sequence,
        }
    }

    pub fn optional(schema_id: impl Into<String>, sequence: u32) -> Self {
        Self {
            required: false,
            ..Self::required(schema_id, sequence)
        }
    }
}

/// Execution policy and schema requirements of a step kind.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepConfig {
    pub step_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Overall deadline across all attempts
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub schemas: Vec<SchemaBinding>,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl StepConfig {
    pub fn new(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            description: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
            schemas: Vec::new(),
        }
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_binding(mut self, binding: SchemaBinding) -> Self {
        self.schemas.push(binding);
        self
    }

    /// Returns the overall deadline for one step cycle.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Returns bindings in validation order.
    pub fn ordered_bindings(&self) -> Vec<&SchemaBinding> {
        let mut bindings: Vec<&SchemaBinding> = self.schemas.iter().collect();
        bindings.sort_by_key(|b| b.sequence);
        bindings
    }
}

/// Lifecycle state of a step within a run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// One parameterized step of a test case.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Step {
    pub step_id: u32,

    /// Name of the step configuration and handler
    pub step_name: String,

    #[serde(default)]
    pub parameters: Parameters,

    /// Execution order within the test case
    pub sequence: u32,

    #[serde(default)]
    pub status: StepStatus,
}

impl Step {
    pub fn new(step_id: u32, step_name: impl Into<String>, sequence: u32) -> Self {
        Self {
            step_id,
            step_name: step_name.into(),
            parameters: Parameters::new(),
            sequence,
            status: StepStatus::Pending,
        }
    }

    /// Adds a single parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Replaces all parameters.
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }
}

/// A named, ordered sequence of steps.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TestCase {
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Disabled test cases are never dispatched
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub steps: Vec<Step>,
}

impl TestCase {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            enabled: true,
            steps: Vec::new(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Returns steps in execution order.
    pub fn ordered_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.sequence);
        steps
    }

    pub fn get_step(&self, step_id: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn get_step_mut(&mut self, step_id: u32) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }
}

/// Terminal outcome of a step cycle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("SUCCEEDED"),
            Self::Failed => f.write_str("FAILED"),
        }
    }
}

/// Why a step cycle failed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&StepError> for FailureDetail {
    fn from(error: &StepError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Append-only audit entry for one completed step cycle.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub test_case_id: String,
    pub step_id: u32,
    pub step_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: ExecutionStatus,

    /// Handler invocations made during the cycle (0 if never dispatched)
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
}

impl ExecutionRecord {
    pub fn succeeded(
        test_case_id: &str,
        step: &Step,
        started_at: DateTime<Utc>,
        attempts: u32,
    ) -> Self {
        Self {
            test_case_id: test_case_id.to_string(),
            step_id: step.step_id,
            step_name: step.step_name.clone(),
            started_at,
            finished_at: Utc::now(),
            status: ExecutionStatus::Succeeded,
            attempts,
            failure: None,
        }
    }

    pub fn failed(
        test_case_id: &str,
        step: &Step,
        started_at: DateTime<Utc>,
        attempts: u32,
        error: &StepError,
    ) -> Self {
        Self {
            test_case_id: test_case_id.to_string(),
            step_id: step.step_id,
            step_name: step.step_name.clone(),
            started_at,
            finished_at: Utc::now(),
            status: ExecutionStatus::Failed,
            attempts,
            failure: Some(FailureDetail::from(error)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_config_defaults() {
        let config = StepConfig::new("STEP");
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert_eq!(config.max_retries, 3);
        assert!(config.schemas.is_empty());
    }

    #[test]
    fn test_step_config_orders_bindings_by_sequence() {
        let config = StepConfig::new("STEP")
            .with_binding(SchemaBinding::required("SECOND", 2))
            .with_binding(SchemaBinding::required("FIRST", 1));

        let ids: Vec<&str> = config
            .ordered_bindings()
            .iter()
            .map(|b| b.schema_id.as_str())
            .collect();
        assert_eq!(ids, vec!["FIRST", "SECOND"]);
    }

    #[test]
    fn test_test_case_orders_steps_by_sequence() {
        let test_case = TestCase::new("TC", "case")
            .with_step(Step::new(1, "C", 30))
            .with_step(Step::new(2, "A", 10))
            .with_step(Step::new(3, "B", 20));

        let names: Vec<&str> = test_case
            .ordered_steps()
            .iter()
            .map(|s| s.step_name.as_str())
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_step_builder_parameters() {
        let step = Step::new(1, "INVOKE_JAVA_PROCESS", 1)
            .with_param("processName", "DataCleanup")
            .with_param("timeout", 300);

        assert_eq!(step.parameters["processName"], "DataCleanup");
        assert_eq!(step.parameters["timeout"], 300);
        assert_eq!(step.status, StepStatus::Pending);
    }

    #[test]
    fn test_schema_activation_toggle_sets_modified() {
        let mut schema = ParameterSchema::new("S", 1, "{}");
        assert!(schema.active);
        assert!(schema.modified_at.is_none());

        schema.set_active(false);
        assert!(!schema.active);
        assert!(schema.modified_at.is_some());
    }

    #[test]
    fn test_step_deserializes_with_defaults() {
        let yaml = "step_id: 4\nstep_name: X\nsequence: 2\n";
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.parameters.is_empty());
    }

    #[test]
    fn test_binding_required_by_default() {
        let yaml = "schema_id: BASE\nsequence: 1\n";
        let binding: SchemaBinding = serde_yaml::from_str(yaml).unwrap();
        assert!(binding.required);
        assert!(!SchemaBinding::optional("X", 1).required);
    }

    #[test]
    fn test_failed_record_carries_failure_kind() {
        let step = Step::new(2, "B", 2);
        let error = StepError::UnsupportedStep("B".to_string());
        let record = ExecutionRecord::failed("TC", &step, Utc::now(), 0, &error);

        assert!(!record.is_success());
        assert_eq!(record.failure_kind(), Some(FailureKind::UnsupportedStep));
        assert!(record.finished_at >= record.started_at);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(StepStatus::Running.to_string(), "RUNNING");
        assert_eq!(ExecutionStatus::Failed.to_string(), "FAILED");
    }
}
