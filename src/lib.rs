//! Conveyor - dependency-driven CI/CD pipeline engine
//!
//! Parses declarative YAML pipeline definitions, resolves the job dependency
//! graph, and executes jobs concurrently on pluggable runner backends with
//! per-job retry, conditional execution and cooperative cancellation.

pub mod actions;
pub mod condition;
pub mod error;
pub mod event_log;
pub mod executor;
pub mod job_graph;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod workflow;

pub use actions::{ActionRegistry, ExternalService};
pub use condition::Condition;
pub use error::{EngineError, FixSuggestion};
pub use event_log::{Event, EventKind, EventLog};
pub use executor::JobExecutor;
pub use job_graph::JobGraph;
pub use retry::{RetryConfig, RetryPolicy};
pub use runner::{Runner, RunnerPool, StepContext, StepOutput};
pub use scheduler::{JobReport, JobState, RunReport, RunStatus, Scheduler};
pub use workflow::{Workflow, parse_duration};
