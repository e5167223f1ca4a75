//! Pipeline parsing structures
//!
//! Parses the declarative YAML pipeline definition into an in-memory
//! `Workflow`. Parsing is a pure transformation: no side effects, and every
//! structural problem (duplicate ids, dangling needs:, malformed steps) is
//! reported as a typed error before anything runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::condition::Condition;
use crate::error::EngineError;

/// Workflow parsed from YAML (raw)
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkflowRaw {
    pub name: String,
    #[serde(default)]
    pub on: TriggerSpec,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub jobs: Vec<Job>,
}

/// Workflow with Arc-wrapped jobs for efficient cloning
#[derive(Debug)]
pub struct Workflow {
    pub name: String,
    pub on: TriggerSpec,
    pub concurrency: Option<usize>,
    pub env: HashMap<String, String>,
    pub jobs: Vec<Arc<Job>>,
}

impl<'de> Deserialize<'de> for Workflow {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = WorkflowRaw::deserialize(deserializer)?;
        Ok(Workflow {
            name: raw.name,
            on: raw.on,
            concurrency: raw.concurrency,
            env: raw.env,
            jobs: raw.jobs.into_iter().map(Arc::new).collect(),
        })
    }
}

/// Trigger events: `on: push` or `on: [push, pull_request]`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TriggerSpec {
    Single(TriggerEvent),
    Multiple(Vec<TriggerEvent>),
}

impl Default for TriggerSpec {
    fn default() -> Self {
        TriggerSpec::Single(TriggerEvent::Manual)
    }
}

impl TriggerSpec {
    pub fn as_vec(&self) -> Vec<TriggerEvent> {
        match self {
            TriggerSpec::Single(e) => vec![*e],
            TriggerSpec::Multiple(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    Push,
    PullRequest,
    Schedule,
    Manual,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Runner backend for this job's steps
    #[serde(default = "default_runs_on", rename = "runs-on")]
    pub runs_on: String,
    #[serde(default)]
    pub needs: Option<Needs>,
    /// Conditional predicate, evaluated once all needs are terminal
    #[serde(default, rename = "if")]
    pub condition: Option<String>,
    /// A failure of this job does not fail the run or skip dependents
    #[serde(default, rename = "continue-on-error")]
    pub continue_on_error: bool,
    /// Per-step execution timeout, e.g. "30s"
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub retry: Option<RetrySpec>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub steps: Vec<Step>,
}

fn default_runs_on() -> String {
    "local".to_string()
}

impl Job {
    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Dependency ids in declaration order
    pub fn needs_ids(&self) -> Vec<&str> {
        self.needs.as_ref().map(Needs::as_vec).unwrap_or_default()
    }

    /// Parsed step timeout (validated at parse time)
    pub fn step_timeout(&self) -> Option<Duration> {
        self.timeout.as_deref().and_then(parse_duration)
    }
}

/// Handles string OR array for needs:
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Needs {
    Single(String),
    Multiple(Vec<String>),
}

impl Needs {
    pub fn as_vec(&self) -> Vec<&str> {
        match self {
            Needs::Single(s) => vec![s.as_str()],
            Needs::Multiple(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// Retry policy as declared in YAML; converted to `retry::RetryConfig`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySpec {
    #[serde(rename = "max-retries")]
    pub max_retries: u32,
    /// Initial backoff delay, e.g. "500ms"
    #[serde(default)]
    pub backoff: Option<String>,
}

/// Ordered unit inside a job: a shell command or an external action
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub with: HashMap<String, String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Step {
    /// Label used in logs and errors
    pub fn label(&self, index: usize) -> String {
        self.name
            .clone()
            .or_else(|| self.run.clone())
            .or_else(|| self.uses.clone())
            .unwrap_or_else(|| format!("step-{}", index))
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "1h" into a Duration
pub fn parse_duration(duration_str: &str) -> Option<Duration> {
    let s = duration_str.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.parse::<u64>().ok().map(Duration::from_secs);
    }
    if let Some(mins) = s.strip_suffix('m') {
        return mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    if let Some(hours) = s.strip_suffix('h') {
        return hours
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600));
    }

    s.parse::<u64>().ok().map(Duration::from_secs)
}

impl Workflow {
    /// Parse and validate a pipeline definition
    pub fn parse(yaml: &str) -> Result<Self, EngineError> {
        let workflow: Workflow = serde_yaml::from_str(yaml)?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Structural validation (graph shape is checked separately)
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.jobs.is_empty() {
            return Err(EngineError::EmptyPipeline);
        }

        if let Some(limit) = self.concurrency {
            if limit == 0 {
                return Err(EngineError::InvalidConcurrency { limit });
            }
        }

        let mut seen: HashSet<&str> = HashSet::with_capacity(self.jobs.len());
        for job in &self.jobs {
            if !seen.insert(&job.id) {
                return Err(EngineError::DuplicateJob {
                    job_id: job.id.clone(),
                });
            }
        }

        for job in &self.jobs {
            for needs in job.needs_ids() {
                if !seen.contains(needs) {
                    return Err(EngineError::UnknownNeeds {
                        job_id: job.id.clone(),
                        needs: needs.to_string(),
                    });
                }
            }

            if job.steps.is_empty() {
                return Err(EngineError::JobWithoutSteps {
                    job_id: job.id.clone(),
                });
            }

            for (index, step) in job.steps.iter().enumerate() {
                if step.run.is_some() == step.uses.is_some() {
                    return Err(EngineError::InvalidStep {
                        job_id: job.id.clone(),
                        index,
                    });
                }
            }

            if let Some(ref expr) = job.condition {
                Condition::parse(expr).map_err(|_| EngineError::InvalidCondition {
                    job_id: job.id.clone(),
                    expr: expr.clone(),
                })?;
            }

            if let Some(ref timeout) = job.timeout {
                if parse_duration(timeout).is_none() {
                    return Err(EngineError::InvalidDuration {
                        job_id: job.id.clone(),
                        value: timeout.clone(),
                    });
                }
            }

            if let Some(ref retry) = job.retry {
                if let Some(ref backoff) = retry.backoff {
                    if parse_duration(backoff).is_none() {
                        return Err(EngineError::InvalidDuration {
                            job_id: job.id.clone(),
                            value: backoff.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Look up a job by id
    pub fn job(&self, id: &str) -> Option<&Arc<Job>> {
        self.jobs.iter().find(|j| j.id == id)
    }
}
