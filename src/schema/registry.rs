//! Schema Registry
//!
//! Compiles parameter schemas into reusable validators and caches them by
//! `(schema_id, version)`.
//!
//! The cache is filled lazily. Each key owns a [`OnceCell`] slot, so
//! concurrent first-time lookups of the same key block on a single
//! compilation and share its result. Compilation failures are cached too:
//! a stored definition never changes for a given version.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use jsonschema::Validator;
use log::{debug, warn};
use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::catalog::ParameterSchema;
use crate::error::{SchemaConfigurationError, Violation};

type CacheKey = (String, u32);
type Slot = Arc<OnceCell<Result<Arc<CompiledSchema>, SchemaConfigurationError>>>;

/// A compiled, immutable schema validator.
pub struct CompiledSchema {
    schema_id: String,
    version: u32,
    validator: Validator,
}

impl CompiledSchema {
    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }

    /// Returns every violation of this schema, attributed to its id.
    pub fn violations(&self, instance: &Value) -> Vec<Violation> {
        self.validator
            .iter_errors(instance)
            .map(|error| {
                let path = error.instance_path.to_string();
                let message = if path.is_empty() {
                    error.to_string()
                } else {
                    format!("{}: {}", path, error)
                };
                Violation::new(self.schema_id.clone(), message)
            })
            .collect()
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("schema_id", &self.schema_id)
            .field("version", &self.version)
            .finish()
    }
}

/// Thread-safe cache of compiled schemas.
#[derive(Default)]
pub struct SchemaRegistry {
    cache: Mutex<HashMap<CacheKey, Slot>>,
    compilations: AtomicUsize,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled validator for a schema version, compiling it on first use.
    pub fn resolve(
        &self,
        schema: &ParameterSchema,
    ) -> Result<Arc<CompiledSchema>, SchemaConfigurationError> {
        let slot = {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                cache
                    .entry((schema.schema_id.clone(), schema.version))
                    .or_default(),
            )
        };

        // The map lock is released here; only callers of this key wait below
        slot.get_or_init(|| self.compile(schema)).clone()
    }

    /// Drops the cached entry for one schema version.
    pub fn invalidate(&self, schema_id: &str, version: u32) -> bool {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let removed = cache.remove(&(schema_id.to_string(), version)).is_some();
        if removed {
            debug!("Invalidated schema '{}' v{}", schema_id, version);
        }
        removed
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of compilations performed since creation.
    pub fn compile_count(&self) -> usize {
        self.compilations.load(Ordering::SeqCst)
    }

    fn compile(
        &self,
        schema: &ParameterSchema,
    ) -> Result<Arc<CompiledSchema>, SchemaConfigurationError> {
        self.compilations.fetch_add(1, Ordering::SeqCst);
        debug!("Compiling schema '{}' v{}", schema.schema_id, schema.version);

        let config_error = |message: String| {
            let error = SchemaConfigurationError {
                schema_id: schema.schema_id.clone(),
                version: schema.version,
                message,
            };
            warn!("{}", error);
            error
        };

        let document: Value = serde_json::from_str(&schema.definition)
            .map_err(|e| config_error(format!("definition is not valid JSON: {}", e)))?;

        let validator = jsonschema::options()
            .should_validate_formats(true)
            .build(&document)
            .map_err(|e| config_error(e.to_string()))?;

        Ok(Arc::new(CompiledSchema {
            schema_id: schema.schema_id.clone(),
            version: schema.version,
            validator,
        }))
    }
}
