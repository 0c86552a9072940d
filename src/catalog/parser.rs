//! Catalog Parser
//!
//! Loads the configuration plane (schemas, step configurations, test cases)
//! from YAML files and checks its integrity.

use std::fs;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::model::{ParameterSchema, StepConfig, TestCase};
use super::validator::validate_catalog;
use crate::error::CatalogError;

/// Everything the engine needs to know before running test cases.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    #[serde(default)]
    pub schemas: Vec<ParameterSchema>,

    #[serde(default)]
    pub steps: Vec<StepConfig>,

    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

/// Parses and validates a catalog from YAML text.
pub fn parse_catalog(yaml: &str) -> Result<Catalog, CatalogError> {
    let catalog: Catalog = serde_yaml::from_str(yaml)?;

    info!(
        "Parsed {} schemas, {} step configs, {} test cases",
        catalog.schemas.len(),
        catalog.steps.len(),
        catalog.test_cases.len()
    );

    let issues = validate_catalog(&catalog);
    if !issues.is_empty() {
        return Err(CatalogError::Invalid(
            issues.iter().map(|i| i.to_string()).collect(),
        ));
    }

    Ok(catalog)
}

/// Loads a catalog from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use caserunner::catalog::load_catalog;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let catalog = load_catalog("demos/catalog.yaml")?;
///     println!("Loaded {} test cases", catalog.test_cases.len());
///     Ok(())
/// }
/// ```
pub fn load_catalog(path: &str) -> Result<Catalog, CatalogError> {
    info!("Loading catalog from: {}", path);

    let yaml = fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_string(),
        source,
    })?;

    debug!("Catalog YAML loaded ({} bytes)", yaml.len());

    parse_catalog(&yaml)
}

/// Writes a catalog back to a YAML file.
pub fn save_catalog(catalog: &Catalog, path: &str) -> Result<(), CatalogError> {
    let yaml = serde_yaml::to_string(catalog)?;
    fs::write(path, yaml).map_err(|source| CatalogError::Io {
        path: path.to_string(),
        source,
    })?;
    info!("Catalog saved to: {}", path);
    Ok(())
}
