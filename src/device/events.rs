//! Change-event fan-out for device attributes

use lrc_shared::{ChangeEvent, ProxyError, SubscriptionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

struct Subscriber {
    attr_name: String,
    sink: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct HubState {
    values: HashMap<String, Vec<String>>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    next_id: u64,
}

/// Holds the current value of every published attribute and pushes
/// changes to subscribers
#[derive(Default)]
pub struct EventHub {
    state: Mutex<HubState>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an attribute with its initial value
    pub fn register(&self, attr_name: &str, initial: Vec<String>) {
        self.state
            .lock()
            .values
            .entry(attr_name.to_string())
            .or_insert(initial);
    }

    /// Subscribe `sink` to `attr_name`
    ///
    /// The current value is sent to `sink` before this returns.
    pub fn subscribe(
        &self,
        attr_name: &str,
        sink: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Result<SubscriptionId, ProxyError> {
        let mut state = self.state.lock();
        let (name, value) = state
            .values
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr_name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .ok_or_else(|| ProxyError::UnknownAttribute(attr_name.to_string()))?;

        state.next_id += 1;
        let id = SubscriptionId(state.next_id);

        // A receiver that is already gone is pruned on the next push
        let _ = sink.send(ChangeEvent::value(name.clone(), value));
        state.subscribers.insert(id, Subscriber { attr_name: name, sink });

        Ok(id)
    }

    /// Remove a subscription; returns false if it was not held
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state.lock().subscribers.remove(&id).is_some()
    }

    /// Set a new value and send it to every subscriber of the attribute
    pub fn push(&self, attr_name: &str, value: Vec<String>) {
        let mut state = self.state.lock();
        state.values.insert(attr_name.to_string(), value.clone());

        let before = state.subscribers.len();
        state.subscribers.retain(|_, subscriber| {
            subscriber.attr_name != attr_name
                || subscriber
                    .sink
                    .send(ChangeEvent::value(attr_name, value.clone()))
                    .is_ok()
        });

        let pruned = before - state.subscribers.len();
        if pruned > 0 {
            debug!("[EVENTS] Pruned {} closed subscribers of {}", pruned, attr_name);
        }
    }

    /// Current value of an attribute
    pub fn value(&self, attr_name: &str) -> Option<Vec<String>> {
        self.state.lock().values.get(attr_name).cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}
