//! Device proxy abstraction
//!
//! The subset of a remote device that long-running command clients rely on:
//! change-event subscriptions on attributes and synchronous command calls.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::ResultCode;

/// Reply to a command call: a result code plus a command id or message
pub type CommandReply = (ResultCode, String);

/// Identifies one attribute subscription on a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A change event delivered for a subscribed attribute
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub attr_name: String,
    /// Attribute value as a flat string tuple; `None` for error events
    pub value: Option<Vec<String>>,
    /// Error description when the event reports a failure
    pub error: Option<String>,
}

impl ChangeEvent {
    /// Create a value event
    pub fn value(attr_name: impl Into<String>, value: Vec<String>) -> Self {
        Self {
            attr_name: attr_name.into(),
            value: Some(value),
            error: None,
        }
    }

    /// Create an error event
    pub fn error(attr_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            attr_name: attr_name.into(),
            value: None,
            error: Some(error.into()),
        }
    }
}

/// Errors reported by a device proxy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProxyError {
    #[error("Communication failure: {0}")]
    Communication(String),

    #[error("Device timed out: {0}")]
    Timeout(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Device error: {0}")]
    Device(String),
}

impl ProxyError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ProxyError::Communication(_) | ProxyError::Timeout(_))
    }
}

/// A (possibly remote) device hosting long-running commands
#[async_trait]
pub trait DeviceProxy: Send + Sync {
    /// Subscribe to change events on an attribute
    ///
    /// The current value is delivered to `sink` before this returns.
    async fn subscribe_event(
        &self,
        attr_name: &str,
        sink: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Result<SubscriptionId, ProxyError>;

    /// Drop a subscription; unknown ids are ignored
    fn unsubscribe_event(&self, id: SubscriptionId);

    /// Invoke a command, returning its result code and id or message
    async fn command_inout(
        &self,
        command: &str,
        argin: Option<String>,
    ) -> Result<CommandReply, ProxyError>;

    /// Human-readable device name
    fn name(&self) -> &str;
}
