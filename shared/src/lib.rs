//! Shared Long-Running Command Types
//!
//! This crate provides the types shared between the device side (which runs
//! long-running commands) and the client side (which invokes them and follows
//! their event streams): task/result status codes, the LRC attribute wire
//! codec, the device proxy abstraction and the observing state machine.

pub mod codec;
pub mod proxy;
pub mod state_machine;

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

pub use proxy::{ChangeEvent, CommandReply, DeviceProxy, ProxyError, SubscriptionId};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Protocol parameters for long-running commands
pub mod lrc {
    /// Attribute carrying `(command_id, status_name)` pairs
    pub const STATUS_ATTR: &str = "longRunningCommandStatus";

    /// Attribute carrying `(command_id, progress)` pairs
    pub const PROGRESS_ATTR: &str = "longRunningCommandProgress";

    /// Attribute carrying the latest `(command_id, json_result)` pair
    pub const RESULT_ATTR: &str = "longRunningCommandResult";

    /// Attribute listing the ids of commands that have not finished
    pub const IDS_IN_QUEUE_ATTR: &str = "longRunningCommandIDsInQueue";

    /// Attribute listing the names of commands that have not finished
    pub const COMMANDS_IN_QUEUE_ATTR: &str = "longRunningCommandsInQueue";

    /// The three attributes a client monitors to follow one command
    pub const MONITORED_ATTRS: [&str; 3] = [STATUS_ATTR, PROGRESS_ATTR, RESULT_ATTR];

    /// Maximum attempts for a proxy call before giving up
    pub const CALL_MAX_TRIES: u32 = 3;

    /// Delay between proxy call attempts
    pub const CALL_RETRY_DELAY_MS: u64 = 100;

    /// How long an early event waits for the command id to become known
    pub const COMMAND_ID_TIMEOUT_MS: u64 = 5000;

    /// Number of finished commands kept visible on the LRC attributes
    pub const MAX_TRACKED_COMMANDS: usize = 64;
}

/// Lifecycle state of a unit of asynchronous work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Staging,
    Queued,
    InProgress,
    Aborted,
    /// Sentinel for queries about unknown command ids
    NotFound,
    Completed,
    Rejected,
    Failed,
}

impl TaskStatus {
    /// Whether no further transitions can follow this status
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Aborted | TaskStatus::Completed | TaskStatus::Rejected | TaskStatus::Failed
        )
    }

    /// Wire name of the status, as published on `longRunningCommandStatus`
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Staging => "STAGING",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Aborted => "ABORTED",
            TaskStatus::NotFound => "NOT_FOUND",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Rejected => "REJECTED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = codec::CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STAGING" => Ok(TaskStatus::Staging),
            "QUEUED" => Ok(TaskStatus::Queued),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "ABORTED" => Ok(TaskStatus::Aborted),
            "NOT_FOUND" => Ok(TaskStatus::NotFound),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "REJECTED" => Ok(TaskStatus::Rejected),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(codec::CodecError::InvalidStatus(other.to_string())),
        }
    }
}

/// Result code returned by device commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok = 0,
    Started = 1,
    Queued = 2,
    Failed = 3,
    Unknown = 4,
    Rejected = 5,
    NotAllowed = 6,
    Aborted = 7,
}

impl TryFrom<i32> for ResultCode {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResultCode::Ok),
            1 => Ok(ResultCode::Started),
            2 => Ok(ResultCode::Queued),
            3 => Ok(ResultCode::Failed),
            4 => Ok(ResultCode::Unknown),
            5 => Ok(ResultCode::Rejected),
            6 => Ok(ResultCode::NotAllowed),
            7 => Ok(ResultCode::Aborted),
            other => Err(other),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultCode::Ok => "OK",
            ResultCode::Started => "STARTED",
            ResultCode::Queued => "QUEUED",
            ResultCode::Failed => "FAILED",
            ResultCode::Unknown => "UNKNOWN",
            ResultCode::Rejected => "REJECTED",
            ResultCode::NotAllowed => "NOT_ALLOWED",
            ResultCode::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Aborted.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Rejected.is_terminal());

        assert!(!TaskStatus::Staging.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(!TaskStatus::NotFound.is_terminal());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(TaskStatus::InProgress.to_string(), "IN_PROGRESS");
        assert_eq!("NOT_FOUND".parse::<TaskStatus>().unwrap(), TaskStatus::NotFound);
        assert!("RUNNING".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_result_code_from_int() {
        assert_eq!(ResultCode::try_from(2), Ok(ResultCode::Queued));
        assert_eq!(ResultCode::try_from(5), Ok(ResultCode::Rejected));
        assert_eq!(ResultCode::try_from(42), Err(42));
        assert_eq!(ResultCode::NotAllowed.to_string(), "NOT_ALLOWED");
    }
}
