//! In-process device hosting long-running commands
//!
//! This module handles:
//! - Publishing attribute values as change events
//! - Tracking command ids, status, progress and results
//! - Serving commands through the `DeviceProxy` interface
//! - The subarray component wiring commands to the observing state machine

mod events;
mod local;
mod subarray;
mod tracker;

pub use events::EventHub;
pub use local::{CommandHandler, LocalDevice};
pub use subarray::{Subarray, OBS_STATE_ATTR};
pub use tracker::{CommandRecord, CommandTracker};

use crate::executor::ExecutorError;
use lrc_shared::lrc;
use lrc_shared::state_machine::StateError;
use std::time::Duration;
use thiserror::Error;

/// Errors constructing a device
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateError),
}

/// Configuration for a local device
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device name reported by the proxy
    pub name: String,
    /// Worker threads running command tasks
    pub max_workers: usize,
    /// Finished commands kept before the oldest are forgotten
    pub max_tracked_commands: usize,
    /// Simulated work per progress step of the subarray commands
    pub step_delay: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "lrc/subarray/01".into(),
            max_workers: 1,
            max_tracked_commands: lrc::MAX_TRACKED_COMMANDS,
            step_delay: Duration::from_millis(100),
        }
    }
}
