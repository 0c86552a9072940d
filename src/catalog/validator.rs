//! Catalog Integrity Checks
//!
//! Validates the relationships between catalog entities before they are
//! handed to the engine:
//! - Unique step names and schema versions
//! - Binding sequence numbers unique per step
//! - Bindings reference known schemas
//! - Test case steps reference known step configurations
//! - Step ids and sequence numbers unique per test case
//! - Schema definitions are JSON documents

use std::collections::HashSet;

use log::{debug, info, warn};

use super::parser::Catalog;

/// A single integrity problem in a catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogIssue {
    DuplicateSchemaVersion { schema_id: String, version: u32 },
    MalformedDefinition { schema_id: String, version: u32, message: String },
    DuplicateStepConfig(String),
    DuplicateBindingSequence { step_name: String, sequence: u32 },
    UnknownSchema { step_name: String, schema_id: String },
    DuplicateTestCase(String),
    DuplicateStepId { test_case: String, step_id: u32 },
    DuplicateStepSequence { test_case: String, sequence: u32 },
    UnknownStepConfig { test_case: String, step_name: String },
}

impl std::fmt::Display for CatalogIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateSchemaVersion { schema_id, version } => {
                write!(f, "Schema '{}' version {} is defined twice", schema_id, version)
            }
            Self::MalformedDefinition { schema_id, version, message } => write!(
                f,
                "Schema '{}' version {} is not valid JSON: {}",
                schema_id, version, message
            ),
            Self::DuplicateStepConfig(name) => write!(f, "Duplicate step configuration: '{}'", name),
            Self::DuplicateBindingSequence { step_name, sequence } => write!(
                f,
                "Step '{}' has more than one schema binding with sequence {}",
                step_name, sequence
            ),
            Self::UnknownSchema { step_name, schema_id } => {
                write!(f, "Step '{}' binds unknown schema '{}'", step_name, schema_id)
            }
            Self::DuplicateTestCase(id) => write!(f, "Duplicate test case id: '{}'", id),
            Self::DuplicateStepId { test_case, step_id } => {
                write!(f, "Test case '{}' reuses step id {}", test_case, step_id)
            }
            Self::DuplicateStepSequence { test_case, sequence } => write!(
                f,
                "Test case '{}' has more than one step with sequence {}",
                test_case, sequence
            ),
            Self::UnknownStepConfig { test_case, step_name } => write!(
                f,
                "Test case '{}' uses step '{}' which has no configuration",
                test_case, step_name
            ),
        }
    }
}

/// Checks every integrity rule and returns all problems found.
pub fn validate_catalog(catalog: &Catalog) -> Vec<CatalogIssue> {
    info!(
        "Validating catalog: {} schemas, {} step configs, {} test cases",
        catalog.schemas.len(),
        catalog.steps.len(),
        catalog.test_cases.len()
    );

    let mut issues = Vec::new();

    // Schemas
    let mut versions: HashSet<(&str, u32)> = HashSet::new();
    for schema in &catalog.schemas {
        if !versions.insert((schema.schema_id.as_str(), schema.version)) {
            issues.push(CatalogIssue::DuplicateSchemaVersion {
                schema_id: schema.schema_id.clone(),
                version: schema.version,
            });
        }

        if let Err(e) = serde_json::from_str::<serde_json::Value>(&schema.definition) {
            issues.push(CatalogIssue::MalformedDefinition {
                schema_id: schema.schema_id.clone(),
                version: schema.version,
                message: e.to_string(),
            });
        }
    }

    let schema_ids: HashSet<&str> = catalog.schemas.iter().map(|s| s.schema_id.as_str()).collect();

    // Step configurations
    let mut step_names: HashSet<&str> = HashSet::new();
    for config in &catalog.steps {
        if !step_names.insert(config.step_name.as_str()) {
            issues.push(CatalogIssue::DuplicateStepConfig(config.step_name.clone()));
        }

        let mut sequences = HashSet::new();
        for binding in &config.schemas {
            if !sequences.insert(binding.sequence) {
                issues.push(CatalogIssue::DuplicateBindingSequence {
                    step_name: config.step_name.clone(),
                    sequence: binding.sequence,
                });
            }
            if !schema_ids.contains(binding.schema_id.as_str()) {
                issues.push(CatalogIssue::UnknownSchema {
                    step_name: config.step_name.clone(),
                    schema_id: binding.schema_id.clone(),
                });
            }
        }

        if config.schemas.is_empty() {
            debug!("Step '{}' has no schema bindings", config.step_name);
        }
    }

    // Test cases
    let mut test_case_ids: HashSet<&str> = HashSet::new();
    for test_case in &catalog.test_cases {
        if !test_case_ids.insert(test_case.id.as_str()) {
            issues.push(CatalogIssue::DuplicateTestCase(test_case.id.clone()));
        }

        if test_case.steps.is_empty() {
            warn!("Test case '{}' has no steps", test_case.id);
        }

        let mut step_ids = HashSet::new();
        let mut sequences = HashSet::new();
        for step in &test_case.steps {
            if !step_ids.insert(step.step_id) {
                issues.push(CatalogIssue::DuplicateStepId {
                    test_case: test_case.id.clone(),
                    step_id: step.step_id,
                });
            }
            if !sequences.insert(step.sequence) {
                issues.push(CatalogIssue::DuplicateStepSequence {
                    test_case: test_case.id.clone(),
                    sequence: step.sequence,
                });
            }
            if !step_names.contains(step.step_name.as_str()) {
                issues.push(CatalogIssue::UnknownStepConfig {
                    test_case: test_case.id.clone(),
                    step_name: step.step_name.clone(),
                });
            }
        }
    }

    issues
}
