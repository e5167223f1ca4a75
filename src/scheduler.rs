//! Dependency-driven scheduler
//!
//! Single-writer event loop: job tasks run concurrently, but every state
//! transition happens here, on completion messages received over a channel.
//! Jobs are evaluated and dispatched in declaration order, so runs over the
//! same definition schedule identically.
//!
//! Job lifecycle:
//!   Pending -> Blocked -> Ready -> Running -> Succeeded | Failed
//!                      \-> Skipped                 \-> Cancelled

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::condition::{Condition, DepsOutcome};
use crate::error::EngineError;
use crate::event_log::{EventKind, EventLog};
use crate::executor::{JobExecutor, JobOutcome};
use crate::job_graph::JobGraph;
use crate::runner::RunnerPool;
use crate::workflow::Workflow;

/// Runner slots used when neither the pipeline nor the CLI sets a limit
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Lifecycle state of a single job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Not yet examined by the scheduler
    Pending,
    /// Waiting on at least one non-terminal dependency
    Blocked,
    /// Eligible to run, waiting for a runner slot
    Ready,
    Running,
    Succeeded,
    Failed,
    /// Condition false or a dependency failed/was skipped
    Skipped,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Skipped | JobState::Cancelled
        )
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// At least one job failed hard (continue-on-error failures don't count)
    Failed,
    Cancelled,
}

/// Final state of one job, for reporting
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: Arc<str>,
    pub state: JobState,
    pub attempts: u32,
    /// stdout of the final step, when the job succeeded
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Summary of a completed run, in job declaration order
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workflow: String,
    pub status: RunStatus,
    pub jobs: Vec<JobReport>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Ids of jobs that failed hard
    pub fn failed_jobs(&self) -> Vec<Arc<str>> {
        self.jobs
            .iter()
            .filter(|j| j.state == JobState::Failed)
            .map(|j| Arc::clone(&j.job_id))
            .collect()
    }

    pub fn job(&self, id: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.job_id.as_ref() == id)
    }
}

/// Bookkeeping for one job while the run is in flight
struct JobSlot {
    state: JobState,
    attempts: u32,
    output: Option<String>,
    error: Option<String>,
    duration_ms: u64,
}

impl JobSlot {
    fn new() -> Self {
        Self {
            state: JobState::Pending,
            attempts: 0,
            output: None,
            error: None,
            duration_ms: 0,
        }
    }
}

/// Orchestrates a whole run: evaluation, dispatch, completion, cancellation
pub struct Scheduler {
    workflow: Arc<Workflow>,
    graph: JobGraph,
    executor: JobExecutor,
    events: EventLog,
    pool: RunnerPool,
    cancel: CancellationToken,
    run_timeout: Option<Duration>,
    /// Workflow-level env plus CLI overrides, for if: evaluation
    base_env: HashMap<String, String>,
}

impl Scheduler {
    /// Build a scheduler; rejects structurally invalid and cyclic pipelines
    /// up front. Workflows deserialized without `Workflow::parse` are
    /// re-validated here, so dangling needs: never reach the run loop.
    pub fn new(
        workflow: Workflow,
        executor: JobExecutor,
        events: EventLog,
        base_env: HashMap<String, String>,
    ) -> Result<Self, EngineError> {
        workflow.validate()?;
        let graph = JobGraph::from_workflow(&workflow);
        graph.detect_cycles()?;

        let capacity = workflow.concurrency.unwrap_or(DEFAULT_CONCURRENCY);

        Ok(Self {
            workflow: Arc::new(workflow),
            graph,
            executor,
            events,
            pool: RunnerPool::new(capacity),
            cancel: CancellationToken::new(),
            run_timeout: None,
            base_env,
        })
    }

    /// Override the runner slot count (CLI takes precedence over YAML)
    pub fn with_concurrency(mut self, limit: Option<usize>) -> Result<Self, EngineError> {
        if let Some(limit) = limit {
            if limit == 0 {
                return Err(EngineError::InvalidConcurrency { limit });
            }
            self.pool = RunnerPool::new(limit);
        }
        Ok(self)
    }

    /// Wall-clock budget for the whole run; on expiry the run is cancelled
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Token callers can use to cancel the run (e.g. from a ctrl-c handler)
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the run to completion
    pub async fn run(self) -> Result<RunReport, EngineError> {
        let started = Instant::now();
        let mut slots: HashMap<Arc<str>, JobSlot> = self
            .graph
            .job_ids()
            .iter()
            .map(|id| (Arc::clone(id), JobSlot::new()))
            .collect();

        self.events.emit(EventKind::RunStarted {
            workflow: self.workflow.name.clone(),
            job_count: self.workflow.jobs.len(),
        });
        info!(workflow = %self.workflow.name, jobs = self.workflow.jobs.len(), "run started");

        let (tx, mut rx) = mpsc::channel::<(Arc<str>, JobOutcome)>(self.workflow.jobs.len().max(1));

        let deadline = self.run_timeout.map(|t| tokio::time::Instant::now() + t);
        let timeout_fired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timeout_fired);

        let mut cancel_handled = false;
        let mut timed_out = false;

        loop {
            // Needs: may reference later-declared jobs, so one pass can leave
            // newly-unblockable jobs behind; iterate to a fixpoint
            while self.evaluate(&mut slots) {}
            self.dispatch(&mut slots, &tx);

            if slots.values().all(|s| s.state.is_terminal()) {
                break;
            }

            tokio::select! {
                Some((job_id, outcome)) = rx.recv() => {
                    self.record_outcome(&mut slots, job_id, outcome);
                }
                _ = self.cancel.cancelled(), if !cancel_handled => {
                    cancel_handled = true;
                    warn!("run cancelled; draining running jobs");
                    self.cancel_waiting_jobs(&mut slots);
                }
                _ = &mut timeout_fired, if deadline.is_some() && !timed_out => {
                    timed_out = true;
                    cancel_handled = true;
                    warn!(timeout = ?self.run_timeout, "run timeout elapsed");
                    self.cancel.cancel();
                    self.cancel_waiting_jobs(&mut slots);
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let report = self.build_report(slots, duration_ms);

        match report.status {
            RunStatus::Success => {
                self.events.emit(EventKind::RunCompleted {
                    total_duration_ms: duration_ms,
                });
                info!(duration_ms, "run completed");
            }
            RunStatus::Failed => {
                self.events.emit(EventKind::RunFailed {
                    failed_jobs: report.failed_jobs(),
                    total_duration_ms: duration_ms,
                });
                warn!(failed = ?report.failed_jobs(), "run failed");
            }
            RunStatus::Cancelled => {
                self.events.emit(EventKind::RunCancelled {
                    total_duration_ms: duration_ms,
                });
            }
        }

        Ok(report)
    }

    /// Move Pending/Blocked jobs forward once their dependencies are terminal.
    /// Returns true when any job left the Pending/Blocked set.
    fn evaluate(&self, slots: &mut HashMap<Arc<str>, JobSlot>) -> bool {
        let mut changed = false;
        for job_id in self.graph.job_ids() {
            let state = slots[job_id].state;
            if !matches!(state, JobState::Pending | JobState::Blocked) {
                continue;
            }

            let deps = self.graph.dependencies(job_id);
            if deps.iter().any(|d| !slots[d].state.is_terminal()) {
                if let Some(slot) = slots.get_mut(job_id) {
                    slot.state = JobState::Blocked;
                }
                continue;
            }

            let outcome = self.deps_outcome(slots, deps);
            let job = match self.workflow.job(job_id) {
                Some(job) => job,
                None => continue,
            };

            let condition = job
                .condition
                .as_deref()
                .and_then(|expr| Condition::parse(expr).ok())
                .unwrap_or_default();

            let mut env = self.base_env.clone();
            env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));

            let slot = match slots.get_mut(job_id) {
                Some(slot) => slot,
                None => continue,
            };
            changed = true;
            if condition.evaluate(&outcome, &env) {
                slot.state = JobState::Ready;
                self.events.emit(EventKind::JobScheduled {
                    job_id: Arc::clone(job_id),
                    dependencies: deps.to_vec(),
                });
            } else {
                let reason = if !outcome.all_satisfied {
                    "dependency failed or was skipped".to_string()
                } else {
                    "if: condition not met".to_string()
                };
                debug!(job_id = %job_id, %reason, "job skipped");
                slot.state = JobState::Skipped;
                slot.error = Some(reason.clone());
                self.events.emit(EventKind::JobSkipped {
                    job_id: Arc::clone(job_id),
                    reason,
                });
            }
        }
        changed
    }

    /// Aggregate dependency outcomes for if: evaluation.
    ///
    /// A Failed dependency with continue-on-error counts as satisfied and is
    /// not reported as failed. Skipped and Cancelled dependencies are
    /// unsatisfied but not failures, so failure() stays false for them.
    fn deps_outcome(&self, slots: &HashMap<Arc<str>, JobSlot>, deps: &[Arc<str>]) -> DepsOutcome {
        if deps.is_empty() {
            return DepsOutcome::root();
        }

        let mut outcome = DepsOutcome::root();
        for dep in deps {
            let tolerated = self
                .workflow
                .job(dep)
                .map(|j| j.continue_on_error)
                .unwrap_or(false);

            match slots[dep].state {
                JobState::Succeeded => {}
                JobState::Failed if tolerated => {}
                JobState::Failed => {
                    outcome.all_satisfied = false;
                    outcome.any_failed = true;
                }
                _ => outcome.all_satisfied = false,
            }
        }
        outcome
    }

    /// Start Ready jobs in declaration order while runner slots last
    fn dispatch(
        &self,
        slots: &mut HashMap<Arc<str>, JobSlot>,
        tx: &mpsc::Sender<(Arc<str>, JobOutcome)>,
    ) {
        for job_id in self.graph.job_ids() {
            if slots[job_id].state != JobState::Ready {
                continue;
            }

            // No slot: stay Ready, retried after the next completion
            let pool_slot = match self.pool.try_acquire() {
                Ok(slot) => slot,
                Err(_) => break,
            };

            let job = match self.workflow.job(job_id) {
                Some(job) => Arc::clone(job),
                None => continue,
            };

            if let Some(slot) = slots.get_mut(job_id) {
                slot.state = JobState::Running;
            }
            debug!(job_id = %job_id, "dispatching job");

            let executor = self.executor.clone();
            let cancel = self.cancel.clone();
            let tx = tx.clone();
            let job_id = Arc::clone(job_id);
            tokio::spawn(async move {
                let outcome = executor
                    .execute_job(job, Arc::clone(&job_id), cancel)
                    .await;
                // Free the runner slot before reporting, so the completion
                // handler can dispatch into it
                drop(pool_slot);
                let _ = tx.send((job_id, outcome)).await;
            });
        }
    }

    /// Apply a completion message to the state table
    fn record_outcome(
        &self,
        slots: &mut HashMap<Arc<str>, JobSlot>,
        job_id: Arc<str>,
        outcome: JobOutcome,
    ) {
        let slot = match slots.get_mut(&job_id) {
            Some(slot) => slot,
            None => return,
        };

        slot.attempts = outcome.attempts;
        slot.duration_ms = outcome.duration_ms;

        match outcome.result {
            Ok(output) => {
                slot.state = JobState::Succeeded;
                slot.output = Some(output);
            }
            Err(e) if e.is_cancelled() => {
                slot.state = JobState::Cancelled;
            }
            Err(e) => {
                slot.state = JobState::Failed;
                // Surface exhausted retries distinctly in the report
                slot.error = Some(if outcome.attempts > 1 {
                    EngineError::RetryExhausted {
                        job_id: job_id.to_string(),
                        attempts: outcome.attempts,
                        last_error: e.to_string(),
                    }
                    .to_string()
                } else {
                    e.to_string()
                });
            }
        }
    }

    /// On cancellation, retire every job that has not started; Running jobs
    /// observe the token and drain through normal completion messages
    fn cancel_waiting_jobs(&self, slots: &mut HashMap<Arc<str>, JobSlot>) {
        for job_id in self.graph.job_ids() {
            let slot = match slots.get_mut(job_id) {
                Some(slot) => slot,
                None => continue,
            };
            if matches!(
                slot.state,
                JobState::Pending | JobState::Blocked | JobState::Ready
            ) {
                slot.state = JobState::Cancelled;
                self.events.emit(EventKind::JobCancelled {
                    job_id: Arc::clone(job_id),
                });
            }
        }
    }

    fn build_report(&self, slots: HashMap<Arc<str>, JobSlot>, duration_ms: u64) -> RunReport {
        let mut slots = slots;
        let jobs: Vec<JobReport> = self
            .graph
            .job_ids()
            .iter()
            .map(|id| {
                let slot = slots.remove(id).unwrap_or_else(JobSlot::new);
                JobReport {
                    job_id: Arc::clone(id),
                    state: slot.state,
                    attempts: slot.attempts,
                    output: slot.output,
                    error: slot.error,
                    duration_ms: slot.duration_ms,
                }
            })
            .collect();

        let status = if self.cancel.is_cancelled() {
            RunStatus::Cancelled
        } else if jobs.iter().any(|j| {
            j.state == JobState::Failed
                && !self
                    .workflow
                    .job(&j.job_id)
                    .map(|job| job.continue_on_error)
                    .unwrap_or(false)
        }) {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };

        RunReport {
            workflow: self.workflow.name.clone(),
            status,
            jobs,
            duration_ms,
        }
    }
}
