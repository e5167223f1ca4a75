//! Local process runner
//!
//! Executes steps as `sh -c` child processes with captured output.
//! `kill_on_drop` guarantees the child is terminated when a timeout or
//! cancellation abandons the wait future.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::EngineError;
use crate::runner::{Runner, StepContext, StepOutput};

/// Runs steps as local child processes
#[derive(Debug, Default)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for LocalRunner {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn execute(&self, command: &str, ctx: &StepContext) -> Result<StepOutput, EngineError> {
        debug!(job_id = %ctx.job_id, step = %ctx.step, "spawning shell command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .envs(&ctx.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let wait = async {
            match ctx.timeout {
                Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                    Ok(result) => result.map_err(EngineError::Io),
                    Err(_) => Err(EngineError::Timeout {
                        job_id: ctx.job_id.to_string(),
                        step: ctx.step.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    }),
                },
                None => child.wait_with_output().await.map_err(EngineError::Io),
            }
        };

        // Dropping the wait future kills the child (kill_on_drop)
        let output = tokio::select! {
            result = wait => result?,
            _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(EngineError::StepFailed {
                job_id: ctx.job_id.to_string(),
                step: ctx.step.clone(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(StepOutput { stdout, stderr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn ctx(timeout: Option<Duration>) -> StepContext {
        StepContext {
            job_id: Arc::from("job"),
            step: "step".to_string(),
            env: HashMap::new(),
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn captures_stdout() {
        let runner = LocalRunner::new();
        let output = runner.execute("echo hello", &ctx(None)).await.unwrap();
        assert_eq!(output.stdout, "hello");
    }

    #[tokio::test]
    async fn passes_environment() {
        let runner = LocalRunner::new();
        let mut context = ctx(None);
        context
            .env
            .insert("GREETING".to_string(), "hi".to_string());

        let output = runner
            .execute("echo \"$GREETING\"", &context)
            .await
            .unwrap();
        assert_eq!(output.stdout, "hi");
    }

    #[tokio::test]
    async fn nonzero_exit_is_step_failure() {
        let runner = LocalRunner::new();
        let err = runner
            .execute("echo oops >&2; exit 3", &ctx(None))
            .await
            .unwrap_err();

        match err {
            EngineError::StepFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "oops");
            }
            other => panic!("expected StepFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_kills_and_reports_distinctly() {
        let runner = LocalRunner::new();
        let err = runner
            .execute("sleep 5", &ctx(Some(Duration::from_millis(50))))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn cancellation_interrupts_execution() {
        let runner = LocalRunner::new();
        let context = ctx(None);
        let cancel = context.cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = runner.execute("sleep 5", &context).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
