//! Mock runner for deterministic tests
//!
//! Interprets the step command as a tiny script:
//! - `ok` / `ok:<output>`       - succeed, optionally with output
//! - `fail` / `fail:<msg>`      - fail with exit code 1
//! - `flaky:<n>` / `flaky:<n>:<output>` - fail the first n invocations, then succeed
//! - `sleep:<ms>`               - sleep, honoring timeout and cancellation
//! - `hang`                     - block until timeout or cancellation
//! - anything else              - echo the command back as output

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::EngineError;
use crate::runner::{Runner, StepContext, StepOutput};

/// Scripted runner; invocation counts are tracked per job + command
#[derive(Debug, Default)]
pub struct MockRunner {
    invocations: Mutex<HashMap<String, u32>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times a command has been executed for a job
    pub fn invocation_count(&self, job_id: &str, command: &str) -> u32 {
        let key = format!("{}:{}", job_id, command);
        self.invocations.lock().get(&key).copied().unwrap_or(0)
    }

    fn bump(&self, ctx: &StepContext, command: &str) -> u32 {
        let key = format!("{}:{}", ctx.job_id, command);
        let mut counts = self.invocations.lock();
        let entry = counts.entry(key).or_insert(0);
        let before = *entry;
        *entry += 1;
        before
    }

    fn step_failure(&self, ctx: &StepContext, msg: &str) -> EngineError {
        EngineError::StepFailed {
            job_id: ctx.job_id.to_string(),
            step: ctx.step.clone(),
            exit_code: 1,
            stderr: msg.to_string(),
        }
    }

    fn timeout_error(&self, ctx: &StepContext, limit: Duration) -> EngineError {
        EngineError::Timeout {
            job_id: ctx.job_id.to_string(),
            step: ctx.step.clone(),
            timeout_ms: limit.as_millis() as u64,
        }
    }
}

#[async_trait]
impl Runner for MockRunner {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn execute(&self, command: &str, ctx: &StepContext) -> Result<StepOutput, EngineError> {
        let prior = self.bump(ctx, command);

        let (verb, rest) = match command.split_once(':') {
            Some((verb, rest)) => (verb, Some(rest)),
            None => (command, None),
        };

        match verb {
            "ok" => Ok(StepOutput {
                stdout: rest.unwrap_or("ok").to_string(),
                ..Default::default()
            }),

            "fail" => Err(self.step_failure(ctx, rest.unwrap_or("scripted failure"))),

            "flaky" => {
                let (threshold, output) = match rest.unwrap_or("1").split_once(':') {
                    Some((n, out)) => (n, out),
                    None => (rest.unwrap_or("1"), "recovered"),
                };
                let threshold: u32 = threshold.parse().unwrap_or(1);

                if prior < threshold {
                    Err(self.step_failure(ctx, "flaky failure"))
                } else {
                    Ok(StepOutput {
                        stdout: output.to_string(),
                        ..Default::default()
                    })
                }
            }

            "sleep" => {
                let ms: u64 = rest.unwrap_or("10").parse().unwrap_or(10);
                let nap = Duration::from_millis(ms);

                if let Some(limit) = ctx.timeout {
                    if limit < nap {
                        tokio::select! {
                            _ = tokio::time::sleep(limit) => return Err(self.timeout_error(ctx, limit)),
                            _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
                        }
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(nap) => Ok(StepOutput {
                        stdout: format!("slept {}ms", ms),
                        ..Default::default()
                    }),
                    _ = ctx.cancel.cancelled() => Err(EngineError::Cancelled),
                }
            }

            "hang" => match ctx.timeout {
                Some(limit) => {
                    tokio::select! {
                        _ = tokio::time::sleep(limit) => Err(self.timeout_error(ctx, limit)),
                        _ = ctx.cancel.cancelled() => Err(EngineError::Cancelled),
                    }
                }
                None => {
                    ctx.cancel.cancelled().await;
                    Err(EngineError::Cancelled)
                }
            },

            _ => Ok(StepOutput {
                stdout: command.to_string(),
                ..Default::default()
            }),
        }
    }
}
