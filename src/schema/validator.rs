//! Parameter Validation
//!
//! Checks a step's parameters against every active, required schema bound
//! to the step. The check is aggregate: all schemas are evaluated so the
//! caller sees every violation in one report.

use std::sync::Arc;

use log::{debug, info};
use serde_json::Value;

use super::registry::SchemaRegistry;
use crate::catalog::{Parameters, Repository};
use crate::error::{ParameterValidationError, RepositoryError, Violation};

/// Validates step parameters using schemas from the repository.
pub struct ParameterValidator {
    repository: Arc<dyn Repository>,
    registry: Arc<SchemaRegistry>,
}

impl ParameterValidator {
    pub fn new(repository: Arc<dyn Repository>, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            repository,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Validates `parameters` for `step_name`.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Every schema accepted the parameters (or none apply)
    /// * `Err(ValidationFailure::Invalid)` - One or more violations, all of them listed
    /// * `Err(ValidationFailure::Repository)` - Schemas could not be looked up
    pub fn validate(
        &self,
        step_name: &str,
        parameters: &Parameters,
    ) -> Result<(), ValidationFailure> {
        let schemas = self.repository.find_active_schemas_by_step_name(step_name)?;

        if schemas.is_empty() {
            debug!("Step '{}' has no active required schemas", step_name);
            return Ok(());
        }

        let instance = Value::Object(parameters.clone());
        let mut violations = Vec::new();

        for schema in &schemas {
            match self.registry.resolve(schema) {
                Ok(compiled) => violations.extend(compiled.violations(&instance)),
                Err(e) => violations.push(Violation::new(
                    schema.schema_id.clone(),
                    format!("schema could not be compiled: {}", e.message),
                )),
            }
        }

        if violations.is_empty() {
            debug!(
                "Step '{}' parameters satisfy {} schema(s)",
                step_name,
                schemas.len()
            );
            return Ok(());
        }

        info!(
            "Step '{}' parameters rejected with {} violation(s)",
            step_name,
            violations.len()
        );

        Err(ValidationFailure::Invalid(ParameterValidationError {
            step_name: step_name.to_string(),
            violations,
        }))
    }
}

/// Why validation did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum ValidationFailure {
    #[error(transparent)]
    Invalid(#[from] ParameterValidationError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::{sample_repository, JAVA_PROCESS_STEP, SCAN_WINDOW_STEP};
    use crate::catalog::{InMemoryRepository, ParameterSchema, SchemaBinding, StepConfig};
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        match value {
            Value::Object(map) => map,
            _ => panic!("parameters must be an object"),
        }
    }

    fn validator_for(repository: Arc<InMemoryRepository>) -> ParameterValidator {
        ParameterValidator::new(repository, Arc::new(SchemaRegistry::new()))
    }

    fn two_schema_repository() -> Arc<InMemoryRepository> {
        let repository = InMemoryRepository::new();
        repository.insert_schema(ParameterSchema::new(
            "S1",
            1,
            r#"{"type": "object", "required": ["alpha"]}"#,
        ));
        repository.insert_schema(ParameterSchema::new(
            "S2",
            1,
            r#"{"type": "object", "required": ["beta"]}"#,
        ));
        repository.insert_step_config(
            StepConfig::new("STEP")
                .with_binding(SchemaBinding::required("S1", 1))
                .with_binding(SchemaBinding::required("S2", 2)),
        );
        Arc::new(repository)
    }

    #[test]
    fn test_valid_scan_window_parameters() {
        let validator = validator_for(sample_repository());
        let result = validator.validate(
            SCAN_WINDOW_STEP,
            &params(json!({"environment": "prod", "region": "US-EAST-1", "aitNumber": "AIT123456"})),
        );
        assert!(result.is_ok(), "{:?}", result.err());
    }

    #[test]
    fn test_valid_java_process_parameters() {
        let validator = validator_for(sample_repository());
        let result = validator.validate(
            JAVA_PROCESS_STEP,
            &params(json!({
                "environment": "prod",
                "region": "US-EAST-1",
                "processName": "DataCleanup",
                "server": "app-server-1.example.com",
                "timeout": 300
            })),
        );
        assert!(result.is_ok(), "{:?}", result.err());
    }

    #[test]
    fn test_lowercase_region_is_rejected() {
        let validator = validator_for(sample_repository());
        let result = validator.validate(
            SCAN_WINDOW_STEP,
            &params(json!({"environment": "prod", "region": "us-east-1", "aitNumber": "AIT123456"})),
        );

        match result {
            Err(ValidationFailure::Invalid(err)) => {
                assert_eq!(err.schema_ids(), vec!["BASE_PARAMETERS"]);
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_violations_from_every_schema_are_reported() {
        let validator = validator_for(two_schema_repository());
        let result = validator.validate("STEP", &params(json!({})));

        match result {
            Err(ValidationFailure::Invalid(err)) => {
                assert_eq!(err.step_name, "STEP");
                assert_eq!(err.schema_ids(), vec!["S1", "S2"]);
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_step_without_schemas_always_validates() {
        let repository = InMemoryRepository::new();
        repository.insert_step_config(StepConfig::new("FREE"));
        let validator = validator_for(Arc::new(repository));

        assert!(validator.validate("FREE", &params(json!({"anything": [1, 2]}))).is_ok());
        assert!(validator.validate("FREE", &Parameters::new()).is_ok());
    }

    #[test]
    fn test_inactive_schema_is_not_evaluated() {
        let repository = two_schema_repository();
        repository.set_schema_active("S2", 1, false).unwrap();
        let validator = validator_for(repository);

        assert!(validator.validate("STEP", &params(json!({"alpha": 1}))).is_ok());
    }

    #[test]
    fn test_optional_binding_is_not_evaluated() {
        let repository = InMemoryRepository::new();
        repository.insert_schema(ParameterSchema::new(
            "STRICT",
            1,
            r#"{"type": "object", "required": ["never"]}"#,
        ));
        repository.insert_step_config(
            StepConfig::new("STEP").with_binding(SchemaBinding::optional("STRICT", 1)),
        );
        let validator = validator_for(Arc::new(repository));

        assert!(validator.validate("STEP", &Parameters::new()).is_ok());
    }

    #[test]
    fn test_malformed_schema_is_reported_as_violation() {
        let repository = two_schema_repository();
        repository.insert_schema(ParameterSchema::new("S1", 1, "{broken"));
        let validator = validator_for(repository);

        let result = validator.validate("STEP", &params(json!({"alpha": 1})));
        match result {
            Err(ValidationFailure::Invalid(err)) => {
                assert_eq!(err.schema_ids(), vec!["S1", "S2"]);
                assert!(err.violations[0].message.contains("could not be compiled"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_repeated_validation_reuses_compiled_schemas() {
        let validator = validator_for(sample_repository());
        let parameters =
            params(json!({"environment": "dev", "region": "EU-WEST-2", "aitNumber": "AIT000001"}));

        validator.validate(SCAN_WINDOW_STEP, &parameters).unwrap();
        validator.validate(SCAN_WINDOW_STEP, &parameters).unwrap();

        assert_eq!(validator.registry().compile_count(), 2);
    }
}
