//! Test Case Dispatcher
//!
//! Polls the repository for enabled test cases and runs each one on its own
//! tokio task. A test case id is never run by two tasks at once: ids are
//! tracked in an in-flight set and released by a guard when the task ends,
//! panics included.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::runner::StepRunner;
use crate::catalog::Repository;
use crate::error::{RepositoryError, RunError};

/// Interval between repository polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Receives errors that escape a test case run.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, test_case_id: &str, error: &RunError);
}

/// Reporter that writes run errors to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, test_case_id: &str, error: &RunError) {
        error!("Test case '{}' failed: {}", test_case_id, error);
    }
}

/// Removes a test case id from the in-flight set when dropped.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    test_case_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.test_case_id);
        debug!("Test case '{}' released", self.test_case_id);
    }
}

/// Discovers and fans out test case runs.
pub struct Dispatcher {
    repository: Arc<dyn Repository>,
    runner: Arc<StepRunner>,
    reporter: Arc<dyn ErrorReporter>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    limiter: Option<Arc<Semaphore>>,
    poll_interval: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Creates a dispatcher with unbounded concurrency and the log reporter.
    pub fn new(repository: Arc<dyn Repository>, runner: Arc<StepRunner>) -> Self {
        Self {
            repository,
            runner,
            reporter: Arc::new(LogReporter),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            limiter: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Caps the number of test cases running at once.
    pub fn with_max_concurrent(self, max: usize) -> Self {
        self.with_limiter(Arc::new(Semaphore::new(max.max(1))))
    }

    /// Draws run permits from `limiter`, which other dispatchers may share.
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Tracks in-flight ids in `in_flight`, which other dispatchers may share.
    ///
    /// Dispatchers sharing a set never run the same test case at once.
    pub fn with_in_flight(mut self, in_flight: Arc<Mutex<HashSet<String>>>) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns the ids currently being run, sorted.
    pub fn in_flight_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn is_in_flight(&self, test_case_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(test_case_id)
    }

    /// Runs one discovery cycle.
    ///
    /// Spawns a task for every enabled test case that is not already in
    /// flight. Must be called from within a tokio runtime.
    ///
    /// # Returns
    ///
    /// * `Ok(ids)` - Test case ids started by this cycle
    /// * `Err` - The repository could not list test cases
    pub fn poll_once(&self) -> Result<Vec<String>, RepositoryError> {
        let candidates = self.repository.find_enabled_test_case_ids()?;
        let mut started = Vec::new();

        for test_case_id in candidates {
            let guard = match self.claim(&test_case_id) {
                Some(guard) => guard,
                None => {
                    debug!("Test case '{}' is still running, skipping", test_case_id);
                    continue;
                }
            };

            let handle = tokio::spawn(run_guarded(
                guard,
                self.limiter.clone(),
                Arc::clone(&self.runner),
                Arc::clone(&self.reporter),
            ));
            self.track(handle);
            started.push(test_case_id);
        }

        if !started.is_empty() {
            info!("Dispatched {} test case(s): {}", started.len(), started.join(", "));
        }
        Ok(started)
    }

    /// Polls on a fixed interval until `shutdown` resolves, then waits for
    /// running test cases to finish.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Dispatcher polling every {:?}",
            self.poll_interval
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, waiting for running test cases");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once() {
                        warn!("Poll failed: {}", e);
                    }
                }
            }
        }

        self.wait_idle().await;
    }

    /// Waits for every spawned test case task to finish.
    pub async fn wait_idle(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
                tasks.drain(..).collect()
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("Dispatcher task ended abnormally: {}", e);
                }
            }
        }
    }

    fn claim(&self, test_case_id: &str) -> Option<InFlightGuard> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(test_case_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            test_case_id: test_case_id.to_string(),
        })
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }
}

/// Runs one test case while holding its in-flight guard and, if bounded, a
/// concurrency permit. The run itself is a child task so a panic in it is
/// reported instead of unwinding through the guard holder.
async fn run_guarded(
    guard: InFlightGuard,
    limiter: Option<Arc<Semaphore>>,
    runner: Arc<StepRunner>,
    reporter: Arc<dyn ErrorReporter>,
) {
    let _permit = match limiter {
        Some(semaphore) => match semaphore.acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!("Concurrency limiter closed, skipping '{}'", guard.test_case_id);
                return;
            }
        },
        None => None,
    };

    let test_case_id = guard.test_case_id.clone();
    let run = tokio::spawn({
        let test_case_id = test_case_id.clone();
        async move { runner.run(&test_case_id).await }
    });

    let outcome = match run.await {
        Ok(result) => result.map(|_| ()),
        Err(e) if e.is_panic() => Err(RunError::Panicked(panic_message(e.into_panic()))),
        Err(e) => Err(RunError::Panicked(e.to_string())),
    };

    if let Err(e) = outcome {
        reporter.report(&test_case_id, &e);
    }

    drop(guard);
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryExecutionLog;
    use crate::catalog::fixtures::{sample_repository, JAVA_PROCESS_STEP, SCAN_WINDOW_STEP};
    use crate::catalog::{InMemoryRepository, Parameters, Step, StepConfig, TestCase};
    use crate::error::HandlerError;
    use crate::execution::handler::{FnHandler, HandlerRegistry, StepHandler};
    use crate::schema::SchemaRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sleeps, tracking how many invocations overlap.
    #[derive(Default)]
    struct GaugeHandler {
        current: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StepHandler for GaugeHandler {
        async fn execute(&self, _step_name: &str, _parameters: &Parameters) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        reports: Mutex<Vec<(String, String)>>,
    }

    impl ErrorReporter for RecordingReporter {
        fn report(&self, test_case_id: &str, error: &RunError) {
            self.reports
                .lock()
                .unwrap()
                .push((test_case_id.to_string(), error.to_string()));
        }
    }

    fn runner_for(
        repository: Arc<InMemoryRepository>,
        handlers: Arc<HandlerRegistry>,
        log: Arc<InMemoryExecutionLog>,
    ) -> Arc<StepRunner> {
        Arc::new(StepRunner::new(
            repository,
            Arc::new(SchemaRegistry::new()),
            handlers,
            log,
        ))
    }

    /// Repository with `count` enabled single-step test cases named TC0..TCn.
    fn gauge_repository(count: usize) -> Arc<InMemoryRepository> {
        let repository = Arc::new(InMemoryRepository::new());
        repository.insert_step_config(StepConfig::new("GAUGE"));
        for i in 0..count {
            repository.insert_test_case(
                TestCase::new(format!("TC{}", i), "Gauge").with_step(Step::new(1, "GAUGE", 1)),
            );
        }
        repository
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_polls_run_test_case_once() {
        let repository = sample_repository();
        let handlers = Arc::new(HandlerRegistry::new());
        let gauge = Arc::new(GaugeHandler::default());
        handlers.register(SCAN_WINDOW_STEP, gauge.clone());
        handlers.register(JAVA_PROCESS_STEP, gauge.clone());
        let log = Arc::new(InMemoryExecutionLog::new());
        let dispatcher = Dispatcher::new(
            repository.clone(),
            runner_for(repository, handlers, log.clone()),
        );

        let first = dispatcher.poll_once().unwrap();
        tokio::task::yield_now().await;
        let second = dispatcher.poll_once().unwrap();

        assert_eq!(first, vec!["TC001".to_string()]);
        assert!(second.is_empty());
        assert!(dispatcher.is_in_flight("TC001"));

        dispatcher.wait_idle().await;

        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
        assert_eq!(log.len(), 2);
        assert!(dispatcher.in_flight_ids().is_empty());

        // Released ids are picked up again
        assert_eq!(dispatcher.poll_once().unwrap(), vec!["TC001".to_string()]);
        dispatcher.wait_idle().await;
        assert_eq!(log.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatchers_sharing_state_respect_each_other() {
        let repository = gauge_repository(2);
        let handlers = Arc::new(HandlerRegistry::new());
        let gauge = Arc::new(GaugeHandler::default());
        handlers.register("GAUGE", gauge.clone());
        let log = Arc::new(InMemoryExecutionLog::new());
        let runner = runner_for(repository.clone(), handlers, log.clone());
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let limiter = Arc::new(Semaphore::new(1));
        let shared = |runner: &Arc<StepRunner>| {
            Dispatcher::new(repository.clone(), Arc::clone(runner))
                .with_in_flight(Arc::clone(&in_flight))
                .with_limiter(Arc::clone(&limiter))
        };
        let first = shared(&runner);
        let second = shared(&runner);

        assert_eq!(first.poll_once().unwrap().len(), 2);
        assert!(second.poll_once().unwrap().is_empty());
        assert!(second.is_in_flight("TC0"));

        first.wait_idle().await;

        // One permit between both dispatchers
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
        assert_eq!(log.len(), 2);
        assert!(second.in_flight_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_test_cases_run_concurrently() {
        let repository = gauge_repository(4);
        let handlers = Arc::new(HandlerRegistry::new());
        let gauge = Arc::new(GaugeHandler::default());
        handlers.register("GAUGE", gauge.clone());
        let log = Arc::new(InMemoryExecutionLog::new());
        let dispatcher = Dispatcher::new(
            repository.clone(),
            runner_for(repository, handlers, log.clone()),
        );

        assert_eq!(dispatcher.poll_once().unwrap().len(), 4);
        dispatcher.wait_idle().await;

        assert_eq!(gauge.peak.load(Ordering::SeqCst), 4);
        assert_eq!(log.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_concurrent_bounds_running_test_cases() {
        let repository = gauge_repository(5);
        let handlers = Arc::new(HandlerRegistry::new());
        let gauge = Arc::new(GaugeHandler::default());
        handlers.register("GAUGE", gauge.clone());
        let log = Arc::new(InMemoryExecutionLog::new());
        let dispatcher = Dispatcher::new(
            repository.clone(),
            runner_for(repository, handlers, log.clone()),
        )
        .with_max_concurrent(2);

        dispatcher.poll_once().unwrap();
        dispatcher.wait_idle().await;

        assert_eq!(gauge.calls.load(Ordering::SeqCst), 5);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_reported_without_affecting_siblings() {
        let repository = Arc::new(InMemoryRepository::new());
        repository.insert_step_config(StepConfig::new("OK"));
        repository.insert_step_config(StepConfig::new("BROKEN").with_max_retries(0));
        repository.insert_test_case(
            TestCase::new("GOOD", "Good").with_step(Step::new(1, "OK", 1)),
        );
        repository.insert_test_case(
            TestCase::new("BAD", "Bad").with_step(Step::new(1, "BROKEN", 1)),
        );

        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register("OK", Arc::new(FnHandler::new(|_, _| Ok(()))));
        handlers.register(
            "BROKEN",
            Arc::new(FnHandler::new(|_, _| Err("boom".into()))),
        );
        let log = Arc::new(InMemoryExecutionLog::new());
        let reporter = Arc::new(RecordingReporter::default());
        let dispatcher = Dispatcher::new(
            repository.clone(),
            runner_for(repository, handlers, log.clone()),
        )
        .with_reporter(reporter.clone());

        dispatcher.poll_once().unwrap();
        dispatcher.wait_idle().await;

        let reports = reporter.reports.lock().unwrap().clone();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "BAD");
        assert!(reports[0].1.contains("boom"));
        assert!(log.records_for("GOOD")[0].is_success());
    }

    #[tokio::test]
    async fn test_panicking_handler_is_reported_and_released() {
        let repository = Arc::new(InMemoryRepository::new());
        repository.insert_step_config(StepConfig::new("PANIC"));
        repository.insert_test_case(
            TestCase::new("TC_PANIC", "Panics").with_step(Step::new(1, "PANIC", 1)),
        );
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(
            "PANIC",
            Arc::new(FnHandler::new(|_, _| panic!("handler exploded"))),
        );
        let log = Arc::new(InMemoryExecutionLog::new());
        let reporter = Arc::new(RecordingReporter::default());
        let dispatcher = Dispatcher::new(
            repository.clone(),
            runner_for(repository, handlers, log),
        )
        .with_reporter(reporter.clone());

        dispatcher.poll_once().unwrap();
        dispatcher.wait_idle().await;

        let reports = reporter.reports.lock().unwrap().clone();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].1.contains("handler exploded"));
        assert!(!dispatcher.is_in_flight("TC_PANIC"));
    }

    #[tokio::test]
    async fn test_disabled_test_cases_are_not_dispatched() {
        let repository = sample_repository();
        repository.set_test_case_enabled("TC001", false).unwrap();
        let log = Arc::new(InMemoryExecutionLog::new());
        let dispatcher = Dispatcher::new(
            repository.clone(),
            runner_for(repository, Arc::new(HandlerRegistry::new()), log.clone()),
        );

        assert!(dispatcher.poll_once().unwrap().is_empty());
        dispatcher.wait_idle().await;
        assert!(log.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_polls_on_interval() {
        let repository = gauge_repository(1);
        let handlers = Arc::new(HandlerRegistry::new());
        let gauge = Arc::new(GaugeHandler::default());
        handlers.register("GAUGE", gauge.clone());
        let log = Arc::new(InMemoryExecutionLog::new());
        let dispatcher = Dispatcher::new(
            repository.clone(),
            runner_for(repository, handlers, log.clone()),
        )
        .with_poll_interval(Duration::from_secs(2));

        // Ticks at 0, 2, 4, 6, 8 and 10 seconds
        dispatcher
            .run_until(tokio::time::sleep(Duration::from_millis(11_500)))
            .await;

        assert_eq!(gauge.calls.load(Ordering::SeqCst), 6);
        assert_eq!(log.len(), 6);
        assert!(dispatcher.in_flight_ids().is_empty());
    }
}
