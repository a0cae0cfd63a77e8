//! Local device: serves registered commands through the proxy interface

use super::events::EventHub;
use super::tracker::CommandTracker;
use super::{DeviceConfig, DeviceError};
use crate::executor::{TaskCallback, TaskExecutor, TaskUpdate};
use async_trait::async_trait;
use lrc_shared::{
    ChangeEvent, CommandReply, DeviceProxy, ProxyError, ResultCode, SubscriptionId, TaskStatus,
};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Runs a command; the callback reports the outcome of any task it queues
pub type CommandHandler = Arc<dyn Fn(Option<String>, TaskCallback) -> CommandReply + Send + Sync>;

/// A device living in this process
pub struct LocalDevice {
    config: DeviceConfig,
    events: Arc<EventHub>,
    tracker: Arc<CommandTracker>,
    executor: Arc<TaskExecutor>,
    commands: RwLock<HashMap<String, CommandHandler>>,
}

impl LocalDevice {
    pub fn new(config: DeviceConfig) -> Result<Self, DeviceError> {
        let events = Arc::new(EventHub::new());
        let tracker = Arc::new(CommandTracker::new(events.clone(), config.max_tracked_commands));
        let executor = Arc::new(TaskExecutor::new(config.max_workers)?);

        info!(
            "[DEVICE] {} ready with {} workers",
            config.name,
            executor.max_workers()
        );

        Ok(Self {
            config,
            events,
            tracker,
            executor,
            commands: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn events(&self) -> Arc<EventHub> {
        self.events.clone()
    }

    pub fn tracker(&self) -> Arc<CommandTracker> {
        self.tracker.clone()
    }

    pub fn executor(&self) -> Arc<TaskExecutor> {
        self.executor.clone()
    }

    /// Register (or replace) the handler for `name`
    pub fn register_command(&self, name: &str, handler: CommandHandler) {
        self.commands.write().insert(name.to_string(), handler);
    }

    /// Run a command and translate its reply for the caller
    ///
    /// Queued and started commands answer with their command id; anything
    /// else answers with the handler's message and is recorded as finished.
    pub fn run_command(&self, name: &str, argin: Option<String>) -> Result<CommandReply, ProxyError> {
        let handler = self
            .commands
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ProxyError::UnknownCommand(name.to_string()))?;

        let command_id = self.tracker.new_command(name);
        let (code, message) = handler(argin, self.tracker.callback_for(&command_id));
        debug!("[DEVICE] {} -> {} {}", name, code, message);

        let status = match code {
            ResultCode::Queued | ResultCode::Started => return Ok((code, command_id)),
            ResultCode::Ok => TaskStatus::Completed,
            ResultCode::Rejected | ResultCode::NotAllowed => TaskStatus::Rejected,
            ResultCode::Aborted => TaskStatus::Aborted,
            ResultCode::Failed | ResultCode::Unknown => TaskStatus::Failed,
        };
        self.tracker.update(
            &command_id,
            TaskUpdate::status(status).with_result(json!([code as i32, message.as_str()])),
        );

        Ok((code, message))
    }
}

#[async_trait]
impl DeviceProxy for LocalDevice {
    async fn subscribe_event(
        &self,
        attr_name: &str,
        sink: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Result<SubscriptionId, ProxyError> {
        self.events.subscribe(attr_name, sink)
    }

    fn unsubscribe_event(&self, id: SubscriptionId) {
        self.events.unsubscribe(id);
    }

    async fn command_inout(
        &self,
        command: &str,
        argin: Option<String>,
    ) -> Result<CommandReply, ProxyError> {
        self.run_command(command, argin)
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}
