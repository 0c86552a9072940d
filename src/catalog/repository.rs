//! Catalog Repository
//!
//! The read/write capability the engine needs from configuration storage,
//! plus an in-memory implementation backed by a loaded catalog.

use std::collections::HashMap;
use std::sync::RwLock;

use log::debug;

use super::model::{ParameterSchema, StepConfig, StepStatus, TestCase};
use super::parser::Catalog;
use crate::error::RepositoryError;

/// Storage capability used by the validator, runner, and dispatcher.
///
/// Implementations must be safe to share across runner tasks.
pub trait Repository: Send + Sync {
    /// Looks up the execution policy of a step kind.
    fn find_step_config(&self, step_name: &str) -> Result<Option<StepConfig>, RepositoryError>;

    /// Returns the active schemas required by a step, in binding sequence order.
    fn find_active_schemas_by_step_name(
        &self,
        step_name: &str,
    ) -> Result<Vec<ParameterSchema>, RepositoryError>;

    /// Loads a test case with its steps.
    fn find_test_case(&self, test_case_id: &str) -> Result<TestCase, RepositoryError>;

    /// Returns ids of every enabled test case.
    fn find_enabled_test_case_ids(&self) -> Result<Vec<String>, RepositoryError>;

    /// Persists a step's lifecycle state.
    fn update_step_status(
        &self,
        test_case_id: &str,
        step_id: u32,
        status: StepStatus,
    ) -> Result<(), RepositoryError>;
}

#[derive(Default)]
struct Tables {
    schemas: Vec<ParameterSchema>,
    step_configs: HashMap<String, StepConfig>,
    test_cases: Vec<TestCase>,
}

/// Thread-safe in-memory repository.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a repository holding every entity of a catalog.
    pub fn from_catalog(catalog: Catalog) -> Self {
        let repository = Self::new();
        for schema in catalog.schemas {
            repository.insert_schema(schema);
        }
        for config in catalog.steps {
            repository.insert_step_config(config);
        }
        for test_case in catalog.test_cases {
            repository.insert_test_case(test_case);
        }
        repository
    }

    /// Adds a schema version, replacing an existing one with the same id and version.
    pub fn insert_schema(&self, schema: ParameterSchema) {
        let mut tables = self.write();
        tables
            .schemas
            .retain(|s| !(s.schema_id == schema.schema_id && s.version == schema.version));
        tables.schemas.push(schema);
    }

    pub fn insert_step_config(&self, config: StepConfig) {
        self.write()
            .step_configs
            .insert(config.step_name.clone(), config);
    }

    /// Adds or replaces a test case.
    pub fn insert_test_case(&self, test_case: TestCase) {
        let mut tables = self.write();
        tables.test_cases.retain(|t| t.id != test_case.id);
        tables.test_cases.push(test_case);
    }

    /// Flips the activation flag of one schema version.
    pub fn set_schema_active(
        &self,
        schema_id: &str,
        version: u32,
        active: bool,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.write();
        let schema = tables
            .schemas
            .iter_mut()
            .find(|s| s.schema_id == schema_id && s.version == version)
            .ok_or_else(|| {
                RepositoryError::Unavailable(format!(
                    "schema '{}' v{} does not exist",
                    schema_id, version
                ))
            })?;
        schema.set_active(active);
        Ok(())
    }

    pub fn set_test_case_enabled(
        &self,
        test_case_id: &str,
        enabled: bool,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.write();
        let test_case = tables
            .test_cases
            .iter_mut()
            .find(|t| t.id == test_case_id)
            .ok_or_else(|| RepositoryError::TestCaseNotFound(test_case_id.to_string()))?;
        test_case.enabled = enabled;
        Ok(())
    }

    /// Returns the stored status of a step.
    pub fn step_status(&self, test_case_id: &str, step_id: u32) -> Option<StepStatus> {
        let tables = self.read();
        tables
            .test_cases
            .iter()
            .find(|t| t.id == test_case_id)
            .and_then(|t| t.get_step(step_id))
            .map(|s| s.status)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Repository for InMemoryRepository {
    fn find_step_config(&self, step_name: &str) -> Result<Option<StepConfig>, RepositoryError> {
        Ok(self.read().step_configs.get(step_name).cloned())
    }

    fn find_active_schemas_by_step_name(
        &self,
        step_name: &str,
    ) -> Result<Vec<ParameterSchema>, RepositoryError> {
        let tables = self.read();
        let Some(config) = tables.step_configs.get(step_name) else {
            return Ok(Vec::new());
        };

        let mut schemas = Vec::new();
        for binding in config.ordered_bindings() {
            if !binding.required {
                continue;
            }

            // Highest active version wins when several are active
            let active = tables
                .schemas
                .iter()
                .filter(|s| s.schema_id == binding.schema_id && s.active)
                .max_by_key(|s| s.version);

            match active {
                Some(schema) => schemas.push(schema.clone()),
                None => debug!(
                    "Step '{}': no active version of schema '{}'",
                    step_name, binding.schema_id
                ),
            }
        }

        Ok(schemas)
    }

    fn find_test_case(&self, test_case_id: &str) -> Result<TestCase, RepositoryError> {
        self.read()
            .test_cases
            .iter()
            .find(|t| t.id == test_case_id)
            .cloned()
            .ok_or_else(|| RepositoryError::TestCaseNotFound(test_case_id.to_string()))
    }

    fn find_enabled_test_case_ids(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .read()
            .test_cases
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.id.clone())
            .collect())
    }

    fn update_step_status(
        &self,
        test_case_id: &str,
        step_id: u32,
        status: StepStatus,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.write();
        let test_case = tables
            .test_cases
            .iter_mut()
            .find(|t| t.id == test_case_id)
            .ok_or_else(|| RepositoryError::TestCaseNotFound(test_case_id.to_string()))?;
        let step = test_case
            .get_step_mut(step_id)
            .ok_or_else(|| RepositoryError::StepNotFound {
                test_case_id: test_case_id.to_string(),
                step_id,
            })?;
        step.status = status;
        Ok(())
    }
}
