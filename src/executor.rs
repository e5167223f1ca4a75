//! Job executor
//!
//! Runs one job: steps strictly in order, whole-job retries per the job's
//! retry policy, events emitted at every transition. Runner backends are
//! cached per name so repeated jobs share one instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::actions::ActionRegistry;
use crate::error::EngineError;
use crate::event_log::{EventKind, EventLog};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::runner::{create_runner, Runner, StepContext};
use crate::workflow::Job;

/// What the scheduler learns when a job's task finishes
#[derive(Debug)]
pub struct JobOutcome {
    /// Number of attempts actually made
    pub attempts: u32,
    /// stdout of the final step on success
    pub result: Result<String, EngineError>,
    pub duration_ms: u64,
}

/// Executes jobs against runner backends and the action registry
#[derive(Clone)]
pub struct JobExecutor {
    actions: ActionRegistry,
    events: EventLog,
    /// Workflow-level env plus CLI overrides; lowest precedence
    base_env: HashMap<String, String>,
    /// CLI --runner override; takes precedence over runs-on:
    runner_override: Option<String>,
    runner_cache: Arc<Mutex<HashMap<String, Arc<dyn Runner>>>>,
}

impl JobExecutor {
    pub fn new(actions: ActionRegistry, events: EventLog, base_env: HashMap<String, String>) -> Self {
        Self {
            actions,
            events,
            base_env,
            runner_override: None,
            runner_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Force every job onto the named backend
    pub fn with_runner_override(mut self, name: Option<String>) -> Self {
        self.runner_override = name;
        self
    }

    /// Get or create a cached runner backend
    fn runner_for(&self, job: &Job) -> Result<Arc<dyn Runner>, EngineError> {
        let name = self.runner_override.as_deref().unwrap_or(&job.runs_on);

        let mut cache = self.runner_cache.lock();
        if let Some(runner) = cache.get(name) {
            return Ok(Arc::clone(runner));
        }

        let runner = create_runner(name).ok_or_else(|| EngineError::UnknownRunner {
            name: name.to_string(),
            job_id: job.id.clone(),
        })?;
        cache.insert(name.to_string(), Arc::clone(&runner));
        Ok(runner)
    }

    /// Execute a job to completion, retrying per its policy.
    ///
    /// Cancellation is surfaced as-is and never retried.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn execute_job(
        &self,
        job: Arc<Job>,
        job_id: Arc<str>,
        cancel: CancellationToken,
    ) -> JobOutcome {
        let started = Instant::now();

        let runner = match self.runner_for(&job) {
            Ok(runner) => runner,
            Err(e) => {
                return JobOutcome {
                    attempts: 0,
                    result: Err(e),
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
        };

        let policy = RetryPolicy::new(
            job.retry
                .as_ref()
                .map(RetryConfig::from_spec)
                .unwrap_or_default(),
        );

        let attempts_made = AtomicU32::new(0);
        let result = policy
            .execute(&cancel, |attempt, backoff| {
                attempts_made.store(attempt + 1, Ordering::SeqCst);
                let backoff_ms = backoff.map(|d| d.as_millis() as u64);
                let runner = Arc::clone(&runner);
                let cancel = cancel.clone();
                let job = Arc::clone(&job);
                let job_id = Arc::clone(&job_id);
                async move {
                    if let Some(backoff_ms) = backoff_ms {
                        warn!(attempt, "retrying job");
                        self.events.emit(EventKind::JobRetrying {
                            job_id: Arc::clone(&job_id),
                            attempt,
                            backoff_ms,
                        });
                    }
                    self.events.emit(EventKind::JobStarted {
                        job_id: Arc::clone(&job_id),
                        attempt,
                    });
                    self.run_steps(&runner, &job, &job_id, &cancel).await
                }
            })
            .await;

        let attempts = attempts_made.load(Ordering::SeqCst);
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => {
                self.events.emit(EventKind::JobCompleted {
                    job_id: Arc::clone(&job_id),
                    attempts,
                    duration_ms,
                });
            }
            Err(e) if e.is_cancelled() => {
                self.events.emit(EventKind::JobCancelled {
                    job_id: Arc::clone(&job_id),
                });
            }
            Err(e) => {
                self.events.emit(EventKind::JobFailed {
                    job_id: Arc::clone(&job_id),
                    error: e.to_string(),
                    attempts,
                    duration_ms,
                });
            }
        }

        JobOutcome {
            attempts,
            result,
            duration_ms,
        }
    }

    /// Run every step of one attempt, strictly sequentially
    async fn run_steps(
        &self,
        runner: &Arc<dyn Runner>,
        job: &Job,
        job_id: &Arc<str>,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError> {
        let mut last_output = String::new();

        for (index, step) in job.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let label = step.label(index);
            let ctx = StepContext {
                job_id: Arc::clone(job_id),
                step: label.clone(),
                env: self.effective_env(job, &step.env),
                timeout: job.step_timeout(),
                cancel: cancel.clone(),
            };

            self.events.emit(EventKind::StepStarted {
                job_id: Arc::clone(job_id),
                step: label.clone(),
            });
            let step_start = Instant::now();

            let output = match (&step.run, &step.uses) {
                (Some(command), None) => runner.execute(command, &ctx).await?,
                (None, Some(action)) => self.actions.invoke(action, &step.with, &ctx).await?,
                // Parse-time validation guarantees exactly one of run/uses
                _ => {
                    return Err(EngineError::InvalidStep {
                        job_id: job.id.clone(),
                        index,
                    })
                }
            };

            debug!(step = %label, "step completed");
            self.events.emit(EventKind::StepCompleted {
                job_id: Arc::clone(job_id),
                step: label,
                duration_ms: step_start.elapsed().as_millis() as u64,
            });

            last_output = output.stdout;
        }

        Ok(last_output)
    }

    /// Merge env maps: workflow/CLI < job < step
    fn effective_env(
        &self,
        job: &Job,
        step_env: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut env = self.base_env.clone();
        env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(step_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Workflow;

    fn executor() -> JobExecutor {
        JobExecutor::new(ActionRegistry::noop(), EventLog::new(), HashMap::new())
    }

    fn single_job(yaml: &str) -> (Arc<Job>, Arc<str>) {
        let wf = Workflow::parse(yaml).unwrap();
        let job = Arc::clone(&wf.jobs[0]);
        let id: Arc<str> = Arc::from(job.id.as_str());
        (job, id)
    }

    #[tokio::test]
    async fn runs_steps_in_order() {
        let (job, id) = single_job(
            r#"
name: t
jobs:
  - id: build
    runs-on: mock
    steps:
      - run: ok:first
      - run: ok:second
"#,
        );

        let outcome = executor()
            .execute_job(job, id, CancellationToken::new())
            .await;
        assert_eq!(outcome.result.unwrap(), "second");
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn retry_gives_n_plus_one_attempts() {
        let (job, id) = single_job(
            r#"
name: t
jobs:
  - id: build
    runs-on: mock
    retry:
      max-retries: 2
      backoff: 1ms
    steps:
      - run: fail
"#,
        );

        let events = EventLog::new();
        let exec = JobExecutor::new(ActionRegistry::noop(), events.clone(), HashMap::new());
        let outcome = exec.execute_job(job, id, CancellationToken::new()).await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);

        let retries = events
            .filter_job("build")
            .into_iter()
            .filter(|e| matches!(e.kind, EventKind::JobRetrying { .. }))
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn flaky_job_recovers_within_retry_budget() {
        let (job, id) = single_job(
            r#"
name: t
jobs:
  - id: build
    runs-on: mock
    retry:
      max-retries: 3
      backoff: 1ms
    steps:
      - run: flaky:2
"#,
        );

        let outcome = executor()
            .execute_job(job, id, CancellationToken::new())
            .await;
        assert_eq!(outcome.result.unwrap(), "recovered");
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn unknown_runner_fails_without_attempts() {
        let (job, id) = single_job(
            r#"
name: t
jobs:
  - id: build
    runs-on: mainframe
    steps:
      - run: ok
"#,
        );

        let outcome = executor()
            .execute_job(job, id, CancellationToken::new())
            .await;
        assert!(matches!(
            outcome.result,
            Err(EngineError::UnknownRunner { .. })
        ));
        assert_eq!(outcome.attempts, 0);
    }

    #[tokio::test]
    async fn uses_steps_go_through_the_registry() {
        use crate::actions::RecordingService;

        let service = Arc::new(RecordingService::new());
        let exec = JobExecutor::new(
            ActionRegistry::new(service.clone()),
            EventLog::new(),
            HashMap::new(),
        );

        let (job, id) = single_job(
            r#"
name: t
jobs:
  - id: release
    runs-on: mock
    steps:
      - uses: deploy
        with:
          target: prod
"#,
        );

        let outcome = exec.execute_job(job, id, CancellationToken::new()).await;
        assert!(outcome.result.is_ok());
        assert_eq!(service.calls()[0].0, "deploy");
    }

    #[tokio::test]
    async fn cancelled_job_reports_cancelled() {
        let (job, id) = single_job(
            r#"
name: t
jobs:
  - id: build
    runs-on: mock
    steps:
      - run: hang
"#,
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = executor().execute_job(job, id, cancel).await;
        assert!(matches!(outcome.result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn step_env_overrides_job_env() {
        let (job, _) = single_job(
            r#"
name: t
jobs:
  - id: build
    env:
      A: job
      B: job
    steps:
      - run: ok
        env:
          B: step
"#,
        );

        let exec = executor();
        let env = exec.effective_env(&job, &job.steps[0].env);
        assert_eq!(env["A"], "job");
        assert_eq!(env["B"], "step");
    }
}
