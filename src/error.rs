//! Error types with fix suggestions
//!
//! Every variant carries a stable `CNV-0xx` code so pipeline authors can
//! grep logs and docs for the exact failure.

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
/// Some variants are only constructed in library code/tests.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // Pipeline definition errors (CNV-010 to CNV-017)
    // ─────────────────────────────────────────────────────────────
    #[error("CNV-010: Pipeline defines no jobs")]
    EmptyPipeline,

    #[error("CNV-011: Duplicate job id '{job_id}'")]
    DuplicateJob { job_id: String },

    #[error("CNV-012: Job '{job_id}' needs unknown job '{needs}'")]
    UnknownNeeds { job_id: String, needs: String },

    #[error("CNV-013: Job '{job_id}' has no steps")]
    JobWithoutSteps { job_id: String },

    #[error("CNV-014: Step {index} of job '{job_id}' must have exactly one of 'run' or 'uses'")]
    InvalidStep { job_id: String, index: usize },

    #[error("CNV-015: Invalid 'if' condition on job '{job_id}': {expr}")]
    InvalidCondition { job_id: String, expr: String },

    #[error("CNV-016: Invalid duration '{value}' on job '{job_id}' (use e.g. 500ms, 30s, 5m, 1h)")]
    InvalidDuration { job_id: String, value: String },

    #[error("CNV-017: Invalid concurrency limit {limit} (must be at least 1)")]
    InvalidConcurrency { limit: usize },

    // ─────────────────────────────────────────────────────────────
    // Graph errors (CNV-020)
    // ─────────────────────────────────────────────────────────────
    #[error("CNV-020: Cycle detected in job graph: {cycle}")]
    CycleDetected { cycle: String },

    // ─────────────────────────────────────────────────────────────
    // Execution errors (CNV-030 to CNV-036)
    // ─────────────────────────────────────────────────────────────
    #[error("CNV-030: Unknown runner backend '{name}' requested by job '{job_id}'")]
    UnknownRunner { name: String, job_id: String },

    #[error("CNV-031: Step '{step}' of job '{job_id}' failed with exit code {exit_code}: {stderr}")]
    StepFailed {
        job_id: String,
        step: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("CNV-032: Step '{step}' of job '{job_id}' timed out after {timeout_ms}ms")]
    Timeout {
        job_id: String,
        step: String,
        timeout_ms: u64,
    },

    #[error("CNV-033: No runner slot available (capacity {capacity})")]
    RunnerUnavailable { capacity: usize },

    #[error("CNV-034: Job '{job_id}' failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        job_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("CNV-035: Run cancelled")]
    Cancelled,

    #[error("CNV-036: Unknown action '{action}' in step of job '{job_id}'")]
    UnknownAction { action: String, job_id: String },
}

impl EngineError {
    /// Cancellation must never be retried or converted to a plain failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// Timeouts are reported distinctly from non-zero exits
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }
}

impl FixSuggestion for EngineError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            EngineError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            EngineError::Io(_) => Some("Check file path and permissions"),
            EngineError::EmptyPipeline => Some("Add at least one entry under jobs:"),
            EngineError::DuplicateJob { .. } => Some("Give every job a unique id"),
            EngineError::UnknownNeeds { .. } => {
                Some("Verify the job id in needs: matches a declared job")
            }
            EngineError::JobWithoutSteps { .. } => Some("Add at least one step with run: or uses:"),
            EngineError::InvalidStep { .. } => {
                Some("Use run: for shell commands or uses: for external actions, never both")
            }
            EngineError::InvalidCondition { .. } => {
                Some("Supported: success(), failure(), always(), true, false, env.NAME == 'value'")
            }
            EngineError::InvalidDuration { .. } => {
                Some("Use a number with a unit suffix: 500ms, 30s, 5m, 1h")
            }
            EngineError::InvalidConcurrency { .. } => Some("Set concurrency: to 1 or more"),
            EngineError::CycleDetected { .. } => {
                Some("Remove the circular needs: reference shown in the cycle path")
            }
            EngineError::UnknownRunner { .. } => Some("Available runners: local, mock"),
            EngineError::StepFailed { .. } => Some("Check the command and its stderr output"),
            EngineError::Timeout { .. } => Some("Increase the job timeout: or speed up the step"),
            EngineError::RunnerUnavailable { .. } => {
                Some("Raise concurrency: or wait for running jobs to finish")
            }
            EngineError::RetryExhausted { .. } => {
                Some("Raise retry.max-retries or fix the underlying step failure")
            }
            EngineError::Cancelled => None,
            EngineError::UnknownAction { .. } => Some(
                "Built-in actions: checkout, artifact-upload, artifact-download, deploy, notify",
            ),
        }
    }
}
