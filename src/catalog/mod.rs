//! Catalog Module
//!
//! Configuration-plane data and the storage capability the engine reads it
//! through.
//!
//! # Structure
//!
//! - [`model`]: Schemas, step configurations, test cases, execution records
//! - [`parser`]: YAML catalog loading
//! - [`validator`]: Catalog integrity checks
//! - [`repository`]: Repository trait and in-memory implementation

pub mod model;
pub mod parser;
pub mod repository;
pub mod validator;

#[cfg(test)]
pub(crate) mod fixtures;

pub use model::{
    ExecutionRecord, ExecutionStatus, FailureDetail, ParameterSchema, Parameters, SchemaBinding,
    Step, StepConfig, StepStatus, TestCase,
};
pub use parser::{load_catalog, parse_catalog, save_catalog, Catalog};
pub use repository::{InMemoryRepository, Repository};
pub use validator::{validate_catalog, CatalogIssue};
