//! Ownership of the event subscriptions made for one invocation

use lrc_shared::{DeviceProxy, SubscriptionId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Subscriptions shared between the caller's handle and the event dispatcher
pub(crate) struct Subscriptions {
    proxy: Arc<dyn DeviceProxy>,
    ids: Mutex<Vec<SubscriptionId>>,
}

impl Subscriptions {
    pub(crate) fn new(proxy: Arc<dyn DeviceProxy>) -> Self {
        Self {
            proxy,
            ids: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, id: SubscriptionId) {
        self.ids.lock().push(id);
    }

    /// Unsubscribe everything still held; later calls are no-ops
    pub(crate) fn unsubscribe_all(&self) {
        let ids: Vec<SubscriptionId> = self.ids.lock().drain(..).collect();
        if ids.is_empty() {
            return;
        }
        for id in &ids {
            self.proxy.unsubscribe_event(*id);
        }
        debug!(
            "[LRC] Released {} subscriptions on {}",
            ids.len(),
            self.proxy.name()
        );
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.lock().len()
    }
}

/// Handle returned by a successful invocation
///
/// Keeps the status, progress and result subscriptions alive. Dropping it
/// unsubscribes and stops the dispatcher, after which the callback is
/// never called again.
pub struct LrcSubscriptions {
    command_id: String,
    subscriptions: Arc<Subscriptions>,
    dispatcher: JoinHandle<()>,
}

impl LrcSubscriptions {
    pub(crate) fn new(subscriptions: Arc<Subscriptions>, dispatcher: JoinHandle<()>) -> Self {
        Self {
            command_id: String::new(),
            subscriptions,
            dispatcher,
        }
    }

    pub(crate) fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    pub(crate) fn set_command_id(&mut self, command_id: String) {
        self.command_id = command_id;
    }

    /// Id the device assigned to the invoked command
    pub fn command_id(&self) -> &str {
        &self.command_id
    }

    /// Whether the subscriptions are still held
    ///
    /// Becomes false once a terminal status arrived or the command id never
    /// showed up in time.
    pub fn is_active(&self) -> bool {
        self.subscriptions.len() > 0
    }
}

impl Drop for LrcSubscriptions {
    fn drop(&mut self) {
        self.subscriptions.unsubscribe_all();
        self.dispatcher.abort();
    }
}

impl fmt::Debug for LrcSubscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LrcSubscriptions")
            .field("command_id", &self.command_id)
            .field("active", &self.subscriptions.len())
            .finish()
    }
}
