//! Runner abstraction - isolated step execution backends
//!
//! A `Runner` executes one step in isolation and reports the captured
//! output. On timeout the underlying execution is forcibly terminated and a
//! Timeout failure is reported, distinct from a non-zero exit.
//!
//! Backends are selected per job via runs-on: and created through
//! `create_runner`. `RunnerPool` bounds how many jobs execute at once; a
//! `RunnerSlot` is held for the duration of a job and released on drop.

pub mod local;
pub mod mock;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

pub use local::LocalRunner;
pub use mock::MockRunner;

/// Execution context handed to a runner for a single step
#[derive(Debug, Clone)]
pub struct StepContext {
    pub job_id: Arc<str>,
    /// Label of the step, for errors and events
    pub step: String,
    /// Effective environment (workflow + job + step + CLI overrides)
    pub env: HashMap<String, String>,
    /// Per-step execution timeout
    pub timeout: Option<Duration>,
    /// Signalled when the run is cancelled
    pub cancel: CancellationToken,
}

/// Captured output of a successful step
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Contract for execution backends (local process, container, remote agent)
#[async_trait]
pub trait Runner: Send + Sync {
    /// Backend name as referenced by runs-on:
    fn name(&self) -> &'static str;

    /// Execute a shell command in isolation.
    ///
    /// Returns the captured output, or:
    /// - `StepFailed` on non-zero exit
    /// - `Timeout` when the context timeout elapses (execution is killed)
    /// - `Cancelled` when the run's cancellation token fires
    async fn execute(&self, command: &str, ctx: &StepContext) -> Result<StepOutput, EngineError>;
}

/// Create a runner backend by name
pub fn create_runner(name: &str) -> Option<Arc<dyn Runner>> {
    match name {
        "local" => Some(Arc::new(LocalRunner::new())),
        "mock" => Some(Arc::new(MockRunner::new())),
        _ => None,
    }
}

/// Bounded pool of runner slots (atomic counter, lock-free)
#[derive(Debug, Clone)]
pub struct RunnerPool {
    capacity: usize,
    available: Arc<AtomicUsize>,
}

impl RunnerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            available: Arc::new(AtomicUsize::new(capacity)),
        }
    }

    /// Try to acquire a slot; the scheduler requeues the job on failure
    pub fn try_acquire(&self) -> Result<RunnerSlot, EngineError> {
        let mut current = self.available.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return Err(EngineError::RunnerUnavailable {
                    capacity: self.capacity,
                });
            }
            match self.available.compare_exchange_weak(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Ok(RunnerSlot {
                        available: Arc::clone(&self.available),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.available.load(Ordering::Relaxed)
    }
}

/// A transient execution slot assigned to a job; released on drop
#[derive(Debug)]
pub struct RunnerSlot {
    available: Arc<AtomicUsize>,
}

impl Drop for RunnerSlot {
    fn drop(&mut self) {
        self.available.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_knows_builtin_runners() {
        assert_eq!(create_runner("local").unwrap().name(), "local");
        assert_eq!(create_runner("mock").unwrap().name(), "mock");
        assert!(create_runner("kubernetes").is_none());
    }

    #[test]
    fn pool_hands_out_capacity_slots() {
        let pool = RunnerPool::new(2);
        let a = pool.try_acquire().unwrap();
        let _b = pool.try_acquire().unwrap();

        assert!(matches!(
            pool.try_acquire(),
            Err(EngineError::RunnerUnavailable { capacity: 2 })
        ));

        drop(a);
        assert_eq!(pool.available(), 1);
        assert!(pool.try_acquire().is_ok());
    }

    #[test]
    fn slot_released_on_drop() {
        let pool = RunnerPool::new(1);
        {
            let _slot = pool.try_acquire().unwrap();
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 1);
    }
}
