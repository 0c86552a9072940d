//! Step Runner
//!
//! Drives one test case through its steps in sequence order:
//! - Marks each step Running, then Succeeded or Failed
//! - Validates parameters before any handler is invoked
//! - Wraps handler dispatch in the retry/timeout loop
//! - Appends exactly one execution record per step cycle
//!
//! The first failed step aborts the run. Later steps stay Pending and
//! produce no record. A step never stays Running: storage failures, handler
//! panics, and cancellation all close it as Failed with an `interrupted`
//! record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use super::handler::HandlerRegistry;
use super::retry::{RetryExecutor, RetryPolicy, DEFAULT_BACKOFF};
use crate::audit::ExecutionSink;
use crate::catalog::{ExecutionRecord, Repository, Step, StepStatus, TestCase};
use crate::error::{RunError, StepError};
use crate::schema::{ParameterValidator, SchemaRegistry, ValidationFailure};

/// Records produced by a completed test case run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub test_case_id: String,
    pub records: Vec<ExecutionRecord>,
}

impl RunReport {
    fn new(test_case_id: &str) -> Self {
        Self {
            test_case_id: test_case_id.to_string(),
            records: Vec::new(),
        }
    }

    /// Total handler invocations across all steps.
    pub fn total_attempts(&self) -> u32 {
        self.records.iter().map(|r| r.attempts).sum()
    }
}

/// Executes test cases step by step.
pub struct StepRunner {
    repository: Arc<dyn Repository>,
    validator: ParameterValidator,
    handlers: Arc<HandlerRegistry>,
    executor: RetryExecutor,
    sink: Arc<dyn ExecutionSink>,
    backoff: Duration,
}

impl StepRunner {
    pub fn new(
        repository: Arc<dyn Repository>,
        schemas: Arc<SchemaRegistry>,
        handlers: Arc<HandlerRegistry>,
        sink: Arc<dyn ExecutionSink>,
    ) -> Self {
        Self {
            validator: ParameterValidator::new(Arc::clone(&repository), schemas),
            repository,
            handlers,
            executor: RetryExecutor::default(),
            sink,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Replaces the retry executor (and with it the retry hooks).
    pub fn with_executor(mut self, executor: RetryExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Sets the delay between attempts of a step.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Loads a test case and runs it.
    pub async fn run(&self, test_case_id: &str) -> Result<RunReport, RunError> {
        let test_case = self.repository.find_test_case(test_case_id)?;
        self.run_test_case(&test_case).await
    }

    /// Runs every step of `test_case` in ascending sequence order.
    ///
    /// # Returns
    ///
    /// * `Ok(RunReport)` - Every step succeeded
    /// * `Err(RunError::StepFailed)` - A step failed; later steps were not run
    /// * `Err(RunError::Repository | RunError::Sink)` - Storage failed mid-run
    pub async fn run_test_case(&self, test_case: &TestCase) -> Result<RunReport, RunError> {
        info!(
            "Running test case '{}' ({} steps)",
            test_case.id,
            test_case.steps.len()
        );

        let mut report = RunReport::new(&test_case.id);

        for step in test_case.ordered_steps() {
            let (record, failure) = self.run_step(&test_case.id, step).await?;
            report.records.push(record);

            if let Some(source) = failure {
                error!(
                    "Test case '{}' aborted at step {} ('{}')",
                    test_case.id, step.step_id, step.step_name
                );
                return Err(RunError::StepFailed {
                    test_case_id: test_case.id.clone(),
                    step_id: step.step_id,
                    step_name: step.step_name.clone(),
                    source,
                });
            }
        }

        info!("Test case '{}' completed", test_case.id);
        Ok(report)
    }

    async fn run_step(
        &self,
        test_case_id: &str,
        step: &Step,
    ) -> Result<(ExecutionRecord, Option<StepError>), RunError> {
        self.repository
            .update_step_status(test_case_id, step.step_id, StepStatus::Running)?;
        let mut in_progress = StepInProgress::new(self, test_case_id, step);
        debug!(
            "Step {} ('{}') of '{}' is running",
            step.step_id, step.step_name, test_case_id
        );

        let outcome = self.execute_step(step).await;
        let started_at = in_progress.complete();

        match outcome {
            Ok(outcome) => self.finish(test_case_id, step, started_at, outcome),
            Err(e) => {
                let interrupted = StepError::Interrupted {
                    step_name: step.step_name.clone(),
                    reason: e.to_string(),
                };
                self.abandon(test_case_id, step, started_at, &interrupted);
                Err(e)
            }
        }
    }

    /// Validates and dispatches one step. Storage failures are returned as the
    /// outer error; step failures come back with their attempt count.
    async fn execute_step(&self, step: &Step) -> Result<Result<u32, (StepError, u32)>, RunError> {
        let config = match self.repository.find_step_config(&step.step_name)? {
            Some(config) => config,
            None => {
                return Ok(Err((
                    StepError::UnknownStepConfig(step.step_name.clone()),
                    0,
                )))
            }
        };

        match self.validator.validate(&step.step_name, &step.parameters) {
            Ok(()) => {}
            Err(ValidationFailure::Invalid(e)) => return Ok(Err((e.into(), 0))),
            Err(ValidationFailure::Repository(e)) => return Err(e.into()),
        }

        let policy = RetryPolicy::from_config(&config).with_backoff(self.backoff);
        let handlers: &HandlerRegistry = &self.handlers;
        let step_name = step.step_name.as_str();
        let parameters = &step.parameters;

        let outcome = self
            .executor
            .execute(step_name, &policy, move || handlers.dispatch(step_name, parameters))
            .await
            .map_err(|e| {
                let attempts = attempts_made(&e);
                (e, attempts)
            });

        Ok(outcome)
    }

    /// Writes the record of a finished step cycle, then its terminal status.
    ///
    /// If the record cannot be written the step is marked Failed, never
    /// Succeeded.
    fn finish(
        &self,
        test_case_id: &str,
        step: &Step,
        started_at: DateTime<Utc>,
        outcome: Result<u32, (StepError, u32)>,
    ) -> Result<(ExecutionRecord, Option<StepError>), RunError> {
        let (status, record, failure) = match outcome {
            Ok(attempts) => {
                info!(
                    "Step {} ('{}') of '{}' succeeded after {} attempt(s)",
                    step.step_id, step.step_name, test_case_id, attempts
                );
                let record = ExecutionRecord::succeeded(test_case_id, step, started_at, attempts);
                (StepStatus::Succeeded, record, None)
            }
            Err((e, attempts)) => {
                error!(
                    "Step {} ('{}') of '{}' failed: {}",
                    step.step_id, step.step_name, test_case_id, e
                );
                let record = ExecutionRecord::failed(test_case_id, step, started_at, attempts, &e);
                (StepStatus::Failed, record, Some(e))
            }
        };

        if let Err(e) = self.sink.append(record.clone()) {
            error!(
                "Could not record step {} ('{}') of '{}': {}",
                step.step_id, step.step_name, test_case_id, e
            );
            self.repository
                .update_step_status(test_case_id, step.step_id, StepStatus::Failed)?;
            return Err(e.into());
        }

        self.repository
            .update_step_status(test_case_id, step.step_id, status)?;

        Ok((record, failure))
    }

    /// Best-effort close of a step cycle that cannot finish normally: appends a
    /// Failed record and marks the step Failed, logging anything that goes wrong.
    fn abandon(
        &self,
        test_case_id: &str,
        step: &Step,
        started_at: DateTime<Utc>,
        error: &StepError,
    ) {
        error!(
            "Step {} ('{}') of '{}' abandoned: {}",
            step.step_id, step.step_name, test_case_id, error
        );

        let record = ExecutionRecord::failed(test_case_id, step, started_at, 0, error);
        if let Err(e) = self.sink.append(record) {
            warn!("Could not record abandoned step {}: {}", step.step_id, e);
        }
        if let Err(e) = self
            .repository
            .update_step_status(test_case_id, step.step_id, StepStatus::Failed)
        {
            warn!("Could not mark step {} failed: {}", step.step_id, e);
        }
    }
}

/// Closes a Running step if its cycle is dropped before completing, which
/// happens when a handler panics or the run's task is cancelled.
struct StepInProgress<'a> {
    runner: &'a StepRunner,
    test_case_id: &'a str,
    step: &'a Step,
    started_at: DateTime<Utc>,
    completed: bool,
}

impl<'a> StepInProgress<'a> {
    fn new(runner: &'a StepRunner, test_case_id: &'a str, step: &'a Step) -> Self {
        Self {
            runner,
            test_case_id,
            step,
            started_at: Utc::now(),
            completed: false,
        }
    }

    /// Marks the cycle as handled by the caller and returns its start time.
    fn complete(&mut self) -> DateTime<Utc> {
        self.completed = true;
        self.started_at
    }
}

impl Drop for StepInProgress<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let interrupted = StepError::Interrupted {
            step_name: self.step.step_name.clone(),
            reason: "step did not complete (handler panicked or run was cancelled)".to_string(),
        };
        self.runner
            .abandon(self.test_case_id, self.step, self.started_at, &interrupted);
    }
}

/// Handler invocations behind a terminal step error.
fn attempts_made(error: &StepError) -> u32 {
    match error {
        StepError::RetriesExhausted { attempts, .. } => *attempts,
        StepError::DeadlineExceeded { attempts, .. } => *attempts,
        StepError::UnsupportedStep(_) | StepError::Handler { .. } => 1,
        StepError::UnknownStepConfig(_)
        | StepError::Validation(_)
        | StepError::Interrupted { .. } => 0,
    }
}
