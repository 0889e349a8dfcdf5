//! Deployment progress tracking.
//!
//! The real event-log transport (and its UI) lives outside this crate;
//! here a stage is a named group of tracked tasks whose begin/finish/
//! fail transitions are recorded in memory and mirrored to `tracing`.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

/// One recorded progress transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    StageStarted { stage: String, total: usize },
    TaskStarted { stage: String, task: String },
    TaskFinished { stage: String, task: String },
    TaskFailed { stage: String, task: String, error: String },
}

/// Recorder for deployment progress events.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl EventLog {
    /// Create an empty event log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a stage sized to `total` tasks.
    pub fn begin_stage(&self, name: &str, total: usize) -> Stage {
        self.record(ProgressEvent::StageStarted {
            stage: name.to_string(),
            total,
        });
        info!(stage = %name, total, "Stage started");

        Stage {
            name: name.to_string(),
            total,
            done: Arc::new(AtomicUsize::new(0)),
            log: self.clone(),
        }
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().expect("event log poisoned").clone()
    }

    fn record(&self, event: ProgressEvent) {
        self.events.lock().expect("event log poisoned").push(event);
    }
}

/// A stage in progress. Cheap to clone across workers.
#[derive(Clone)]
pub struct Stage {
    name: String,
    total: usize,
    done: Arc<AtomicUsize>,
    log: EventLog,
}

impl Stage {
    /// Run one tracked task, recording its outcome.
    pub async fn advance_and_track<T, E, F>(&self, task: &str, f: F) -> Result<T, E>
    where
        E: Display,
        F: Future<Output = Result<T, E>>,
    {
        self.log.record(ProgressEvent::TaskStarted {
            stage: self.name.clone(),
            task: task.to_string(),
        });

        match f.await {
            Ok(value) => {
                let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
                self.log.record(ProgressEvent::TaskFinished {
                    stage: self.name.clone(),
                    task: task.to_string(),
                });
                info!(stage = %self.name, task = %task, done, total = self.total, "Task finished");
                Ok(value)
            }
            Err(e) => {
                self.log.record(ProgressEvent::TaskFailed {
                    stage: self.name.clone(),
                    task: task.to_string(),
                    error: e.to_string(),
                });
                warn!(stage = %self.name, task = %task, error = %e, "Task failed");
                Err(e)
            }
        }
    }

    /// Tasks finished so far.
    pub fn completed(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }
}
