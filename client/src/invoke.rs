//! Invoking a long-running command and following its events
//!
//! Subscriptions are made before the command is called, so no update can be
//! missed between the call returning and the subscriptions going live. Events
//! that arrive before the command id is known are held by the dispatcher
//! until the id shows up (or the wait times out).

use std::sync::Arc;

use lrc_shared::codec::{self, LrcAttribute, LrcPayload};
use lrc_shared::{lrc, ChangeEvent, DeviceProxy, ResultCode, TaskStatus};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::error::LrcError;
use crate::retry::retry_call;
use crate::subscription::{LrcSubscriptions, Subscriptions};

/// One update for the invoked command
#[derive(Debug, Clone, PartialEq)]
pub enum LrcUpdate {
    Status(TaskStatus),
    Progress(u32),
    Result(Value),
    /// An error event reported by the device on one of the attributes
    Error(String),
}

/// Receives updates for an invoked command, called from the dispatcher task
pub type LrcCallback = Arc<dyn Fn(LrcUpdate) + Send + Sync>;

/// Client configuration
#[derive(Debug, Clone)]
pub struct LrcClientConfig {
    /// Attempts per proxy call, including the first
    pub max_tries: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
    /// How long buffered events wait for the command id
    pub command_id_timeout: Duration,
}

impl Default for LrcClientConfig {
    fn default() -> Self {
        Self {
            max_tries: lrc::CALL_MAX_TRIES,
            retry_delay: Duration::from_millis(lrc::CALL_RETRY_DELAY_MS),
            command_id_timeout: Duration::from_millis(lrc::COMMAND_ID_TIMEOUT_MS),
        }
    }
}

/// Invokes long-running commands on one device
pub struct LrcClient {
    proxy: Arc<dyn DeviceProxy>,
    config: LrcClientConfig,
}

impl LrcClient {
    pub fn new(proxy: Arc<dyn DeviceProxy>) -> Self {
        Self::with_config(proxy, LrcClientConfig::default())
    }

    pub fn with_config(proxy: Arc<dyn DeviceProxy>, config: LrcClientConfig) -> Self {
        Self { proxy, config }
    }

    pub fn config(&self) -> &LrcClientConfig {
        &self.config
    }

    /// Subscribe to the LRC attributes, call `command`, and route its updates
    /// to `callback`
    ///
    /// On any error every subscription made so far is released and the
    /// callback will not be called.
    pub async fn invoke(
        &self,
        command: &str,
        argin: Option<String>,
        callback: LrcCallback,
    ) -> Result<LrcSubscriptions, LrcError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (id_tx, id_rx) = watch::channel(None);

        let subscriptions = Arc::new(Subscriptions::new(self.proxy.clone()));
        let dispatcher = tokio::spawn(dispatch_events(
            event_rx,
            id_rx,
            subscriptions.clone(),
            callback,
            self.config.command_id_timeout,
        ));
        let mut handle = LrcSubscriptions::new(subscriptions, dispatcher);

        let proxy: &dyn DeviceProxy = self.proxy.as_ref();
        let max_tries = self.config.max_tries;
        let delay = self.config.retry_delay;

        for attr in lrc::MONITORED_ATTRS {
            let sink = event_tx.clone();
            let id = retry_call(attr, max_tries, delay, move || {
                proxy.subscribe_event(attr, sink.clone())
            })
            .await?;
            handle.subscriptions().add(id);
        }
        // Only the proxy's subscriptions keep the channel open from here on
        drop(event_tx);

        let (code, reply) = retry_call(command, max_tries, delay, move || {
            proxy.command_inout(command, argin.clone())
        })
        .await?;

        match code {
            ResultCode::Queued | ResultCode::Started => {}
            ResultCode::Rejected => {
                info!("[LRC] {} rejected by {}: {}", command, proxy.name(), reply);
                return Err(LrcError::CommandRejected {
                    command: command.to_string(),
                    message: reply,
                });
            }
            other => {
                return Err(LrcError::ResultCode {
                    command: command.to_string(),
                    code: other,
                    message: reply,
                });
            }
        }

        debug!("[LRC] {} on {} has id {}", command, proxy.name(), reply);
        handle.set_command_id(reply.clone());
        // The dispatcher may already have given up waiting
        let _ = id_tx.send(Some(reply));

        Ok(handle)
    }
}

/// Invoke `command` on `proxy` with the default client configuration
pub async fn invoke_lrc(
    callback: LrcCallback,
    proxy: Arc<dyn DeviceProxy>,
    command: &str,
    argin: Option<String>,
) -> Result<LrcSubscriptions, LrcError> {
    LrcClient::new(proxy).invoke(command, argin, callback).await
}

enum IdWait {
    Known(String),
    /// The invocation failed and dropped the sender
    Abandoned,
    TimedOut,
}

async fn wait_for_command_id(
    command_id: &mut watch::Receiver<Option<String>>,
    limit: Duration,
) -> IdWait {
    match timeout(limit, command_id.wait_for(Option::is_some)).await {
        Ok(Ok(id)) => IdWait::Known((*id).clone().unwrap_or_default()),
        Ok(Err(_)) => IdWait::Abandoned,
        Err(_) => IdWait::TimedOut,
    }
}

/// Route events for one command id to the callback until a terminal status
async fn dispatch_events(
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    mut command_id: watch::Receiver<Option<String>>,
    subscriptions: Arc<Subscriptions>,
    callback: LrcCallback,
    id_timeout: Duration,
) {
    let mut known: Option<String> = None;

    while let Some(event) = events.recv().await {
        if known.is_none() {
            match wait_for_command_id(&mut command_id, id_timeout).await {
                IdWait::Known(id) => known = Some(id),
                IdWait::Abandoned => return,
                IdWait::TimedOut => {
                    warn!(
                        "[LRC] No command id after {:?}, dropping {} event",
                        id_timeout, event.attr_name
                    );
                    subscriptions.unsubscribe_all();
                    return;
                }
            }
        }
        let Some(id) = known.as_deref() else {
            return;
        };

        if let Some(status) = handle_event(&event, id, &callback) {
            if status.is_terminal() {
                debug!("[LRC] {} finished with {}", id, status);
                subscriptions.unsubscribe_all();
                return;
            }
        }
    }
}

/// Deliver the part of `event` that concerns `command_id`
///
/// Returns the status when the event carried one.
fn handle_event(event: &ChangeEvent, command_id: &str, callback: &LrcCallback) -> Option<TaskStatus> {
    if let Some(error) = &event.error {
        callback(LrcUpdate::Error(error.clone()));
        return None;
    }
    let value = event.value.as_ref()?;

    let Some(attribute) = LrcAttribute::from_name(&event.attr_name) else {
        debug!("[LRC] Ignoring event on {}", event.attr_name);
        return None;
    };

    match codec::extract(attribute, value, command_id) {
        Ok(Some(LrcPayload::Status(status))) => {
            callback(LrcUpdate::Status(status));
            Some(status)
        }
        Ok(Some(LrcPayload::Progress(progress))) => {
            callback(LrcUpdate::Progress(progress));
            None
        }
        Ok(Some(LrcPayload::Result(result))) => {
            callback(LrcUpdate::Result(result));
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!("[LRC] Bad {} value for {}: {}", event.attr_name, command_id, e);
            None
        }
    }
}
