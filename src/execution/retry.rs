//! Deadline-Bounded Retry
//!
//! Runs a step action up to `max_retries + 1` times with a constant backoff
//! between attempts. The overall deadline covers every attempt and every
//! backoff: a running attempt is cut off when it passes, and no new attempt
//! starts once the next start would land on or after it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use tokio::time::{sleep, timeout, Instant};

use crate::catalog::StepConfig;
use crate::error::StepError;

/// Delay between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Attempt budget for one step cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Bound on total elapsed time across all attempts
    pub deadline: Duration,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, deadline: Duration) -> Self {
        Self {
            max_retries,
            deadline,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Builds the policy configured for a step kind.
    pub fn from_config(config: &StepConfig) -> Self {
        Self::new(config.max_retries, config.timeout())
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Hooks fired by the retry loop.
pub trait RetryObserver: Send + Sync {
    /// Called before attempt number `attempt` (2 for the first retry).
    fn on_retry(&self, step_name: &str, attempt: u32, error: &StepError);

    /// Called once with the terminal error, before it is returned.
    fn on_failure(&self, step_name: &str, error: &StepError);
}

/// Observer that writes retries and failures to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl RetryObserver for LogObserver {
    fn on_retry(&self, step_name: &str, attempt: u32, error: &StepError) {
        warn!("Retrying step '{}' (attempt {}): {}", step_name, attempt, error);
    }

    fn on_failure(&self, step_name: &str, error: &StepError) {
        error!("Step '{}' failed after retries: {}", step_name, error);
    }
}

/// Wraps step actions in the retry/timeout state machine.
#[derive(Clone)]
pub struct RetryExecutor {
    observer: Arc<dyn RetryObserver>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(Arc::new(LogObserver))
    }
}

impl RetryExecutor {
    pub fn new(observer: Arc<dyn RetryObserver>) -> Self {
        Self { observer }
    }

    /// Runs `action` under `policy`.
    ///
    /// # Returns
    ///
    /// * `Ok(attempts)` - The action succeeded on attempt number `attempts`
    /// * `Err(StepError::RetriesExhausted)` - Every attempt failed
    /// * `Err(StepError::DeadlineExceeded)` - The deadline ended the loop
    /// * `Err(other)` - A non-transient error ended the loop immediately
    pub async fn execute<F, Fut>(
        &self,
        step_name: &str,
        policy: &RetryPolicy,
        mut action: F,
    ) -> Result<u32, StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), StepError>>,
    {
        let started = Instant::now();
        // None when the deadline lies beyond what the clock can represent.
        let deadline_at = started.checked_add(policy.deadline);
        let max_attempts = policy.max_attempts();
        let mut attempts: u32 = 0;
        let mut last_error: Option<StepError> = None;

        loop {
            let now = Instant::now();
            if deadline_at.map_or(false, |at| now >= at) {
                return Err(self.fail(
                    step_name,
                    self.timed_out(step_name, policy, started, attempts, &last_error),
                ));
            }

            attempts += 1;
            let attempt = match deadline_at {
                Some(at) => timeout(at - now, action()).await,
                None => Ok(action().await),
            };
            match attempt {
                Ok(Ok(())) => return Ok(attempts),
                Ok(Err(e)) if !e.is_transient() => return Err(self.fail(step_name, e)),
                Ok(Err(e)) => last_error = Some(e),
                Err(_) => {
                    return Err(self.fail(
                        step_name,
                        self.timed_out(step_name, policy, started, attempts, &last_error),
                    ));
                }
            }

            if attempts >= max_attempts {
                let exhausted = StepError::RetriesExhausted {
                    step_name: step_name.to_string(),
                    attempts,
                    last_error: describe(&last_error),
                };
                return Err(self.fail(step_name, exhausted));
            }

            if let Some(at) = deadline_at {
                let next_attempt = Instant::now().checked_add(policy.backoff);
                if next_attempt.map_or(true, |next| next >= at) {
                    return Err(self.fail(
                        step_name,
                        self.timed_out(step_name, policy, started, attempts, &last_error),
                    ));
                }
            }

            if let Some(ref e) = last_error {
                self.observer.on_retry(step_name, attempts + 1, e);
            }
            sleep(policy.backoff).await;
        }
    }

    fn timed_out(
        &self,
        step_name: &str,
        policy: &RetryPolicy,
        started: Instant,
        attempts: u32,
        last_error: &Option<StepError>,
    ) -> StepError {
        StepError::DeadlineExceeded {
            step_name: step_name.to_string(),
            deadline: policy.deadline,
            elapsed: started.elapsed(),
            attempts,
            last_error: last_error.as_ref().map(|e| e.to_string()),
        }
    }

    fn fail(&self, step_name: &str, error: StepError) -> StepError {
        self.observer.on_failure(step_name, &error);
        error
    }
}

fn describe(error: &Option<StepError>) -> String {
    error
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown error".to_string())
}
