//! Execution Engine
//!
//! Wires the pieces of a run together:
//! - Repository and compiled schema cache
//! - Step handlers, selected by step name
//! - Execution record sinks (in memory, optionally a JSON Lines file)
//! - A dispatcher that polls for enabled test cases
//!
//! Calls that overlap share one in-flight set and one concurrency limit, so
//! a test case never runs twice at once however the engine is driven.

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;
use once_cell::sync::OnceCell;
use tokio::sync::Semaphore;

use super::dispatcher::{Dispatcher, ErrorReporter, LogReporter, DEFAULT_POLL_INTERVAL};
use super::handler::{HandlerRegistry, StepHandler};
use super::retry::DEFAULT_BACKOFF;
use super::runner::StepRunner;
use crate::audit::{ExecutionSink, InMemoryExecutionLog, JsonLinesExecutionLog, TeeSink};
use crate::catalog::{Catalog, ExecutionRecord, InMemoryRepository, Repository};
use crate::error::EngineError;
use crate::schema::SchemaRegistry;

/// Tunables for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Interval between repository polls
    pub poll_interval: Duration,

    /// Delay between attempts of a failing step
    pub backoff: Duration,

    /// Cap on test cases running at once (`None` for unbounded)
    pub max_concurrent: Option<usize>,

    /// JSON Lines file receiving every execution record
    pub audit_log: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff: DEFAULT_BACKOFF,
            max_concurrent: Some(num_cpus::get()),
            audit_log: None,
        }
    }
}

/// Test case execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use caserunner::execution::{Engine, LoggingHandler};
/// use caserunner::load_catalog;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let catalog = load_catalog("catalog.yaml")?;
///     let step_names: Vec<String> = catalog.steps.iter().map(|s| s.step_name.clone()).collect();
///
///     let engine = Engine::from_catalog(catalog);
///     for name in step_names {
///         engine.register_handler(name, Arc::new(LoggingHandler));
///     }
///
///     let records = engine.run_once().await?;
///     println!("{} step(s) executed", records.len());
///     Ok(())
/// }
/// ```
pub struct Engine {
    repository: Arc<dyn Repository>,
    schemas: Arc<SchemaRegistry>,
    handlers: Arc<HandlerRegistry>,
    log: Arc<InMemoryExecutionLog>,
    extra_sinks: Vec<Arc<dyn ExecutionSink>>,
    audit_log: OnceCell<Arc<JsonLinesExecutionLog>>,
    reporter: Arc<dyn ErrorReporter>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    limiter: Option<Arc<Semaphore>>,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine over a repository with default settings.
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        let config = EngineConfig::default();
        Self {
            repository,
            schemas: Arc::new(SchemaRegistry::new()),
            handlers: Arc::new(HandlerRegistry::new()),
            log: Arc::new(InMemoryExecutionLog::new()),
            extra_sinks: Vec::new(),
            audit_log: OnceCell::new(),
            reporter: Arc::new(LogReporter),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            limiter: limiter_for(config.max_concurrent),
            config,
        }
    }

    /// Creates an engine over an in-memory repository holding `catalog`.
    pub fn from_catalog(catalog: Catalog) -> Self {
        Self::new(Arc::new(InMemoryRepository::from_catalog(catalog)))
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.limiter = limiter_for(config.max_concurrent);
        self.audit_log = OnceCell::new();
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.config.poll_interval = interval;
    }

    pub fn set_backoff(&mut self, backoff: Duration) {
        self.config.backoff = backoff;
    }

    /// Sets the concurrency cap; `None` removes it.
    pub fn set_max_concurrent(&mut self, max: Option<usize>) {
        self.config.max_concurrent = max;
        self.limiter = limiter_for(max);
    }

    /// Sets the JSON Lines audit log path. The file is opened on the next run.
    pub fn set_audit_log(&mut self, path: impl Into<PathBuf>) {
        self.config.audit_log = Some(path.into());
        self.audit_log = OnceCell::new();
    }

    pub fn set_reporter(&mut self, reporter: Arc<dyn ErrorReporter>) {
        self.reporter = reporter;
    }

    /// Adds a sink that receives every record alongside the in-memory log.
    pub fn add_sink(&mut self, sink: Arc<dyn ExecutionSink>) {
        self.extra_sinks.push(sink);
    }

    /// Registers the handler for a step name.
    pub fn register_handler(&self, step_name: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers.register(step_name, handler);
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    /// Returns every record produced by this engine so far.
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.log.records()
    }

    /// Builds a dispatcher from the current settings.
    ///
    /// Opens the audit log file on first use if one is configured. Every
    /// dispatcher built by this engine shares its in-flight set and
    /// concurrency limit.
    pub fn build_dispatcher(&self) -> Result<Dispatcher, EngineError> {
        self.dispatcher_with(Vec::new())
    }

    /// Builds a dispatcher whose runner also writes to `cycle_sinks`.
    fn dispatcher_with(
        &self,
        cycle_sinks: Vec<Arc<dyn ExecutionSink>>,
    ) -> Result<Dispatcher, EngineError> {
        let memory: Arc<dyn ExecutionSink> = self.log.clone();
        let mut sinks = vec![memory];
        if let Some(audit_log) = self.open_audit_log()? {
            sinks.push(audit_log);
        }
        sinks.extend(self.extra_sinks.iter().cloned());
        sinks.extend(cycle_sinks);

        let runner = StepRunner::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.schemas),
            Arc::clone(&self.handlers),
            Arc::new(TeeSink::new(sinks)),
        )
        .with_backoff(self.config.backoff);

        let mut dispatcher = Dispatcher::new(Arc::clone(&self.repository), Arc::new(runner))
            .with_reporter(Arc::clone(&self.reporter))
            .with_poll_interval(self.config.poll_interval)
            .with_in_flight(Arc::clone(&self.in_flight));
        if let Some(ref limiter) = self.limiter {
            dispatcher = dispatcher.with_limiter(Arc::clone(limiter));
        }
        Ok(dispatcher)
    }

    fn open_audit_log(&self) -> Result<Option<Arc<dyn ExecutionSink>>, EngineError> {
        let path = match self.config.audit_log {
            Some(ref path) => path,
            None => return Ok(None),
        };
        let log = self
            .audit_log
            .get_or_try_init(|| JsonLinesExecutionLog::open(path.clone()).map(Arc::new))?;
        let sink: Arc<dyn ExecutionSink> = log.clone();
        Ok(Some(sink))
    }

    /// Runs a single discovery cycle and waits for it to finish.
    ///
    /// # Returns
    ///
    /// * `Ok(records)` - Records produced by this cycle
    /// * `Err` - The audit log could not be opened or polling failed
    ///
    /// Test cases already running from another call are skipped, so
    /// overlapping calls never return each other's records.
    pub async fn run_once(&self) -> Result<Vec<ExecutionRecord>, EngineError> {
        let cycle = Arc::new(InMemoryExecutionLog::new());
        let cycle_sink: Arc<dyn ExecutionSink> = cycle.clone();
        let dispatcher = self.dispatcher_with(vec![cycle_sink])?;

        let started = dispatcher.poll_once()?;
        info!("Running {} test case(s) once", started.len());
        dispatcher.wait_idle().await;

        Ok(cycle.records())
    }

    /// Polls until `shutdown` resolves and returns the records produced.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<Vec<ExecutionRecord>, EngineError>
    where
        F: Future<Output = ()>,
    {
        let cycle = Arc::new(InMemoryExecutionLog::new());
        let cycle_sink: Arc<dyn ExecutionSink> = cycle.clone();
        let dispatcher = self.dispatcher_with(vec![cycle_sink])?;

        info!(
            "Starting engine (max concurrent: {}, backoff: {:?})",
            self.config
                .max_concurrent
                .map(|m| m.to_string())
                .unwrap_or_else(|| "unbounded".to_string()),
            self.config.backoff
        );
        dispatcher.run_until(shutdown).await;

        Ok(cycle.records())
    }
}

fn limiter_for(max_concurrent: Option<usize>) -> Option<Arc<Semaphore>> {
    max_concurrent.map(|max| Arc::new(Semaphore::new(max.max(1))))
}
