//! Event sourcing for run execution
//!
//! Full audit trail of a run.
//! - Event: envelope with id + timestamp + kind
//! - EventKind: run / job / step levels
//! - EventLog: thread-safe, append-only log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single event in the run execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since run start (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    pub kind: EventKind,
}

/// All possible event types (3 levels)
///
/// Uses Arc<str> for job_id fields to enable zero-cost cloning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        workflow: String,
        job_count: usize,
    },
    RunCompleted {
        total_duration_ms: u64,
    },
    RunFailed {
        failed_jobs: Vec<Arc<str>>,
        total_duration_ms: u64,
    },
    RunCancelled {
        total_duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // JOB LEVEL
    // ═══════════════════════════════════════════
    JobScheduled {
        job_id: Arc<str>,
        dependencies: Vec<Arc<str>>,
    },
    JobStarted {
        job_id: Arc<str>,
        attempt: u32,
    },
    JobRetrying {
        job_id: Arc<str>,
        attempt: u32,
        backoff_ms: u64,
    },
    JobCompleted {
        job_id: Arc<str>,
        attempts: u32,
        duration_ms: u64,
    },
    JobFailed {
        job_id: Arc<str>,
        error: String,
        attempts: u32,
        duration_ms: u64,
    },
    JobSkipped {
        job_id: Arc<str>,
        reason: String,
    },
    JobCancelled {
        job_id: Arc<str>,
    },

    // ═══════════════════════════════════════════
    // STEP LEVEL
    // ═══════════════════════════════════════════
    StepStarted {
        job_id: Arc<str>,
        step: String,
    },
    StepCompleted {
        job_id: Arc<str>,
        step: String,
        duration_ms: u64,
    },
}

impl EventKind {
    /// Extract job_id if event is job-related
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::JobScheduled { job_id, .. }
            | Self::JobStarted { job_id, .. }
            | Self::JobRetrying { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobSkipped { job_id, .. }
            | Self::JobCancelled { job_id }
            | Self::StepStarted { job_id, .. }
            | Self::StepCompleted { job_id, .. } => Some(job_id),
            Self::RunStarted { .. }
            | Self::RunCompleted { .. }
            | Self::RunFailed { .. }
            | Self::RunCancelled { .. } => None,
        }
    }

    /// Check if this is a run-level event
    pub fn is_run_event(&self) -> bool {
        matches!(
            self,
            Self::RunStarted { .. }
                | Self::RunCompleted { .. }
                | Self::RunFailed { .. }
                | Self::RunCancelled { .. }
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    /// Create a new event log (call at run start)
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Filter events by job ID
    pub fn filter_job(&self, job_id: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.job_id() == Some(job_id))
            .collect()
    }

    /// Filter run-level events only
    pub fn run_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_run_event())
            .collect()
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> Arc<str> {
        Arc::from(id)
    }

    #[test]
    fn events_get_monotonic_ids() {
        let log = EventLog::new();
        let a = log.emit(EventKind::RunStarted {
            workflow: "ci".to_string(),
            job_count: 2,
        });
        let b = log.emit(EventKind::JobStarted {
            job_id: job("lint"),
            attempt: 0,
        });

        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn filter_by_job() {
        let log = EventLog::new();
        log.emit(EventKind::JobStarted {
            job_id: job("lint"),
            attempt: 0,
        });
        log.emit(EventKind::JobStarted {
            job_id: job("test"),
            attempt: 0,
        });
        log.emit(EventKind::JobCompleted {
            job_id: job("lint"),
            attempts: 1,
            duration_ms: 5,
        });

        assert_eq!(log.filter_job("lint").len(), 2);
        assert_eq!(log.filter_job("test").len(), 1);
        assert_eq!(log.filter_job("deploy").len(), 0);
    }

    #[test]
    fn run_events_excludes_job_events() {
        let log = EventLog::new();
        log.emit(EventKind::RunStarted {
            workflow: "ci".to_string(),
            job_count: 1,
        });
        log.emit(EventKind::JobSkipped {
            job_id: job("deploy"),
            reason: "dependency failed".to_string(),
        });
        log.emit(EventKind::RunFailed {
            failed_jobs: vec![job("test")],
            total_duration_ms: 10,
        });

        assert_eq!(log.run_events().len(), 2);
    }

    #[test]
    fn serializes_to_json() {
        let log = EventLog::new();
        log.emit(EventKind::StepStarted {
            job_id: job("build"),
            step: "compile".to_string(),
        });

        let json = log.to_json();
        let arr = json.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["kind"]["type"], "step_started");
    }

    #[test]
    fn concurrent_emits_do_not_lose_events() {
        use std::thread;

        let log = EventLog::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let log = log.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    log.emit(EventKind::StepStarted {
                        job_id: Arc::from("j"),
                        step: "s".to_string(),
                    });
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(log.len(), 800);
    }
}
