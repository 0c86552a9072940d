//! Parameter Schema Module
//!
//! - [`registry`]: Compiled schema cache
//! - [`validator`]: Aggregate parameter validation for steps

pub mod registry;
pub mod validator;

pub use registry::{CompiledSchema, SchemaRegistry};
pub use validator::{ParameterValidator, ValidationFailure};
