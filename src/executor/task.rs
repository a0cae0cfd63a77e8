//! Task-facing types: status updates, callbacks and the abort signal

use lrc_shared::TaskStatus;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One status/progress/result report for a task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u32>,
    pub result: Option<Value>,
    pub message: Option<String>,
}

impl TaskUpdate {
    /// Create an update carrying only a status
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Create an update carrying only a progress value
    pub fn progress(progress: u32) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    /// Attach a result payload
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Attach a message, turned into a result for terminal statuses
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Callback receiving task updates; called from submitter and worker threads
pub type TaskCallback = Arc<dyn Fn(TaskUpdate) + Send + Sync>;

/// Deliver an update if a callback was supplied
pub fn notify(callback: &Option<TaskCallback>, update: TaskUpdate) {
    if let Some(callback) = callback {
        callback(update);
    }
}

/// Cooperative abort signal shared by all tasks of one pool generation
///
/// Never cleared: after an abort drains, the executor hands out a fresh
/// signal, so tasks holding the old one keep seeing it set.
#[derive(Debug, Clone, Default)]
pub struct AbortEvent(Arc<AtomicBool>);

impl AbortEvent {
    /// A signal that is not yet set
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every task sharing this signal to stop
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether an abort was requested
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
