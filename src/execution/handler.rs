//! Step Handlers
//!
//! Handlers carry the actual effect of a step. The registry selects one by
//! step name; new step kinds are added by registering another handler.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::{debug, info};

use crate::catalog::Parameters;
use crate::error::{HandlerError, StepError};

/// Capability to execute a step with validated parameters.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, step_name: &str, parameters: &Parameters) -> Result<(), HandlerError>;
}

/// Adapts a synchronous closure into a [`StepHandler`].
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&str, &Parameters) -> Result<(), HandlerError> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(&str, &Parameters) -> Result<(), HandlerError> + Send + Sync,
{
    async fn execute(&self, step_name: &str, parameters: &Parameters) -> Result<(), HandlerError> {
        (self.func)(step_name, parameters)
    }
}

/// Handler that only logs the step and its parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl StepHandler for LoggingHandler {
    async fn execute(&self, step_name: &str, parameters: &Parameters) -> Result<(), HandlerError> {
        let rendered: Vec<String> = parameters
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        info!("Executing step '{}' with {}", step_name, rendered.join(", "));
        Ok(())
    }
}

/// Maps step names to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn StepHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, returning the one it replaced.
    pub fn register(
        &self,
        step_name: impl Into<String>,
        handler: Arc<dyn StepHandler>,
    ) -> Option<Arc<dyn StepHandler>> {
        let step_name = step_name.into();
        debug!("Registering handler for step '{}'", step_name);
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(step_name, handler)
    }

    pub fn contains(&self, step_name: &str) -> bool {
        self.get(step_name).is_some()
    }

    /// Returns registered step names, sorted.
    pub fn step_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Runs the handler registered for `step_name`.
    ///
    /// Fails with [`StepError::UnsupportedStep`] when none is registered and
    /// with [`StepError::Handler`] when the handler reports an error.
    pub async fn dispatch(&self, step_name: &str, parameters: &Parameters) -> Result<(), StepError> {
        let handler = self
            .get(step_name)
            .ok_or_else(|| StepError::UnsupportedStep(step_name.to_string()))?;

        handler
            .execute(step_name, parameters)
            .await
            .map_err(|e| StepError::Handler {
                step_name: step_name.to_string(),
                message: e.to_string(),
            })
    }

    fn get(&self, step_name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(step_name)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_dispatch_selects_handler_by_name() {
        let registry = HandlerRegistry::new();
        let scan_calls = Arc::new(AtomicU32::new(0));
        let java_calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&scan_calls);
        registry.register(
            "SCAN",
            Arc::new(FnHandler::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );
        let counter = Arc::clone(&java_calls);
        registry.register(
            "JAVA",
            Arc::new(FnHandler::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );

        registry.dispatch("SCAN", &Parameters::new()).await.unwrap();

        assert_eq!(scan_calls.load(Ordering::SeqCst), 1);
        assert_eq!(java_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unregistered_step_is_unsupported() {
        let registry = HandlerRegistry::new();
        let result = registry.dispatch("MISSING", &Parameters::new()).await;

        match result {
            Err(StepError::UnsupportedStep(name)) => assert_eq!(name, "MISSING"),
            other => panic!("expected unsupported step, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_error_is_transient() {
        let registry = HandlerRegistry::new();
        registry.register(
            "FAILING",
            Arc::new(FnHandler::new(|_, _| Err("disk full".into()))),
        );

        let err = registry
            .dispatch("FAILING", &Parameters::new())
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn test_handler_receives_parameters() {
        let registry = HandlerRegistry::new();
        registry.register(
            "CHECK",
            Arc::new(FnHandler::new(|step_name, parameters| {
                assert_eq!(step_name, "CHECK");
                match parameters.get("aitNumber").and_then(|v| v.as_str()) {
                    Some("AIT123456") => Ok(()),
                    other => Err(format!("unexpected aitNumber {:?}", other).into()),
                }
            })),
        );

        let mut parameters = Parameters::new();
        parameters.insert("aitNumber".to_string(), "AIT123456".into());
        assert!(registry.dispatch("CHECK", &parameters).await.is_ok());
    }

    #[tokio::test]
    async fn test_logging_handler_succeeds() {
        let registry = HandlerRegistry::new();
        registry.register("LOG", Arc::new(LoggingHandler));
        assert!(registry.dispatch("LOG", &Parameters::new()).await.is_ok());
    }

    #[test]
    fn test_register_replaces_and_lists_names() {
        let registry = HandlerRegistry::new();
        assert!(registry.register("B", Arc::new(LoggingHandler)).is_none());
        assert!(registry.register("A", Arc::new(LoggingHandler)).is_none());
        assert!(registry.register("B", Arc::new(LoggingHandler)).is_some());

        assert_eq!(registry.step_names(), vec!["A".to_string(), "B".to_string()]);
        assert!(registry.contains("A"));
        assert!(!registry.contains("C"));
    }
}
