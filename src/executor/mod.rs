//! Asynchronous task execution for long-running commands
//!
//! This module handles:
//! - Acknowledging submitted work immediately (QUEUED / REJECTED)
//! - Running task bodies on a bounded pool of worker threads
//! - Cooperative abort with drain and pool replacement

mod pool;
mod task;
mod task_executor;

pub use task::{notify, AbortEvent, TaskCallback, TaskUpdate};
pub use task_executor::{ExecutorError, TaskExecutor};
