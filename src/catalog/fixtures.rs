//! Shared test fixtures: the sample catalog and helpers around it.

use std::sync::Arc;

use super::model::{StepStatus, TestCase};
use super::parser::parse_catalog;
use super::repository::{InMemoryRepository, Repository};

pub const CATALOG_YAML: &str = include_str!("../../demos/catalog.yaml");

pub const SCAN_WINDOW_STEP: &str = "DELETE_INSERT_AIT_SCAN_WINDOW";
pub const JAVA_PROCESS_STEP: &str = "INVOKE_JAVA_PROCESS";

/// Repository loaded with the sample catalog.
pub fn sample_repository() -> Arc<InMemoryRepository> {
    let catalog = parse_catalog(CATALOG_YAML).expect("sample catalog must parse");
    Arc::new(InMemoryRepository::from_catalog(catalog))
}

/// Returns TC001 from the sample catalog.
pub fn sample_test_case(repository: &InMemoryRepository) -> TestCase {
    repository.find_test_case("TC001").expect("TC001 exists")
}

/// Rewrites one parameter of a step in the stored test case.
pub fn set_parameter(
    repository: &InMemoryRepository,
    test_case_id: &str,
    step_id: u32,
    key: &str,
    value: serde_json::Value,
) {
    let mut test_case = repository.find_test_case(test_case_id).expect("test case exists");
    let step = test_case.get_step_mut(step_id).expect("step exists");
    step.parameters.insert(key.to_string(), value);
    step.status = StepStatus::Pending;
    repository.insert_test_case(test_case);
}
