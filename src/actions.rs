//! External collaborator actions (uses:)
//!
//! Source-control checkout, artifact registry push/pull, deployment API
//! calls and monitoring notifications are consumed through an opaque
//! interface, never implemented here. A uses: step resolves through the
//! `ActionRegistry` to an `ExternalService`, which returns plain
//! success/failure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::error::EngineError;
use crate::runner::{StepContext, StepOutput};

/// Built-in action names resolvable from uses:
pub const BUILTIN_ACTIONS: &[&str] = &[
    "checkout",
    "artifact-upload",
    "artifact-download",
    "deploy",
    "notify",
];

/// Opaque interface to external collaborators
#[async_trait]
pub trait ExternalService: Send + Sync {
    /// Invoke a collaborator action with its with: parameters
    async fn invoke(
        &self,
        action: &str,
        params: &HashMap<String, String>,
        ctx: &StepContext,
    ) -> Result<StepOutput, EngineError>;
}

/// Resolves uses: references and dispatches to the configured service
#[derive(Clone)]
pub struct ActionRegistry {
    service: Arc<dyn ExternalService>,
}

impl ActionRegistry {
    pub fn new(service: Arc<dyn ExternalService>) -> Self {
        Self { service }
    }

    /// Registry backed by the logging no-op service
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopService))
    }

    pub fn is_known(action: &str) -> bool {
        BUILTIN_ACTIONS.contains(&action)
    }

    pub async fn invoke(
        &self,
        action: &str,
        params: &HashMap<String, String>,
        ctx: &StepContext,
    ) -> Result<StepOutput, EngineError> {
        if !Self::is_known(action) {
            return Err(EngineError::UnknownAction {
                action: action.to_string(),
                job_id: ctx.job_id.to_string(),
            });
        }

        self.service.invoke(action, params, ctx).await
    }
}

/// Default service: logs the call and reports success
pub struct NoopService;

#[async_trait]
impl ExternalService for NoopService {
    async fn invoke(
        &self,
        action: &str,
        params: &HashMap<String, String>,
        ctx: &StepContext,
    ) -> Result<StepOutput, EngineError> {
        info!(job_id = %ctx.job_id, action, ?params, "external action invoked");
        Ok(StepOutput {
            stdout: format!("[{}] ok", action),
            ..Default::default()
        })
    }
}

/// Test service: records invocations and injects failures by action name
#[derive(Default)]
pub struct RecordingService {
    calls: Mutex<Vec<(String, HashMap<String, String>)>>,
    fail_actions: Mutex<Vec<String>>,
}

impl RecordingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named action fail on every invocation
    pub fn fail_on(&self, action: &str) {
        self.fail_actions.lock().push(action.to_string());
    }

    pub fn calls(&self) -> Vec<(String, HashMap<String, String>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ExternalService for RecordingService {
    async fn invoke(
        &self,
        action: &str,
        params: &HashMap<String, String>,
        ctx: &StepContext,
    ) -> Result<StepOutput, EngineError> {
        self.calls
            .lock()
            .push((action.to_string(), params.clone()));

        if self.fail_actions.lock().iter().any(|a| a == action) {
            return Err(EngineError::StepFailed {
                job_id: ctx.job_id.to_string(),
                step: ctx.step.clone(),
                exit_code: 1,
                stderr: format!("{} rejected by collaborator", action),
            });
        }

        Ok(StepOutput {
            stdout: format!("[{}] recorded", action),
            ..Default::default()
        })
    }
}
