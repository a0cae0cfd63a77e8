//! Per-command status records and the LRC attributes derived from them

use super::events::EventHub;
use crate::executor::{TaskCallback, TaskUpdate};
use lrc_shared::{codec, lrc, now_ms, ResultCode, TaskStatus};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Everything known about one command invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    pub progress: Option<u32>,
    pub result: Option<Value>,
}

#[derive(Default)]
struct TrackerState {
    /// Oldest first
    records: VecDeque<CommandRecord>,
    latest_result: Option<(String, String)>,
}

/// Tracks command invocations and publishes the LRC attributes
pub struct CommandTracker {
    events: Arc<EventHub>,
    max_tracked: usize,
    state: Mutex<TrackerState>,
}

impl CommandTracker {
    /// Create a tracker publishing through `events`
    pub fn new(events: Arc<EventHub>, max_tracked: usize) -> Self {
        for attr in [
            lrc::STATUS_ATTR,
            lrc::PROGRESS_ATTR,
            lrc::RESULT_ATTR,
            lrc::IDS_IN_QUEUE_ATTR,
            lrc::COMMANDS_IN_QUEUE_ATTR,
        ] {
            events.register(attr, Vec::new());
        }

        Self {
            events,
            max_tracked: max_tracked.max(1),
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Start tracking an invocation of `name`; returns its command id
    pub fn new_command(&self, name: &str) -> String {
        let id = format!("{}_{}_{}", now_ms(), Uuid::new_v4(), name);

        let mut state = self.state.lock();
        state.records.push_back(CommandRecord {
            id: id.clone(),
            name: name.to_string(),
            status: TaskStatus::Staging,
            progress: None,
            result: None,
        });
        self.evict(&mut state);
        self.publish_status(&state);

        id
    }

    /// Apply an update reported for `command_id`
    ///
    /// Within one update the result is published before the status. Updates
    /// for unknown or already finished commands are ignored.
    pub fn update(&self, command_id: &str, update: TaskUpdate) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(record) = state.records.iter_mut().find(|r| r.id == command_id) else {
            debug!("[TRACKER] Update for untracked command {}", command_id);
            return;
        };
        if record.status.is_terminal() {
            debug!("[TRACKER] Ignoring update for finished command {}", command_id);
            return;
        }

        let result = update.result.or_else(|| match (update.status, &update.message) {
            (Some(status), Some(message)) if status.is_terminal() => {
                Some(json!([result_code_for(status) as i32, message]))
            }
            _ => None,
        });

        let result_changed = result.is_some();
        if let Some(result) = result {
            state.latest_result = Some((record.id.clone(), result.to_string()));
            record.result = Some(result);
        }
        let progress_changed = update.progress.is_some();
        if let Some(progress) = update.progress {
            record.progress = Some(progress);
        }
        if let Some(status) = update.status {
            record.status = status;
        }

        if result_changed {
            self.publish_result(state);
        }
        if progress_changed {
            self.publish_progress(state);
        }
        if update.status.is_some() {
            self.evict(state);
            self.publish_status(state);
        }
    }

    /// Callback that feeds task updates for `command_id` into this tracker
    pub fn callback_for(self: &Arc<Self>, command_id: &str) -> TaskCallback {
        let tracker = self.clone();
        let command_id = command_id.to_string();
        Arc::new(move |update| tracker.update(&command_id, update))
    }

    /// Status of a command, NOT_FOUND if it is not (or no longer) tracked
    pub fn status(&self, command_id: &str) -> TaskStatus {
        self.record(command_id)
            .map(|r| r.status)
            .unwrap_or(TaskStatus::NotFound)
    }

    pub fn record(&self, command_id: &str) -> Option<CommandRecord> {
        self.state
            .lock()
            .records
            .iter()
            .find(|r| r.id == command_id)
            .cloned()
    }

    /// `(id, name)` of every command that has not finished, oldest first
    pub fn in_queue(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .records
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| (r.id.clone(), r.name.clone()))
            .collect()
    }

    /// Drop the oldest finished records beyond the tracking limit
    fn evict(&self, state: &mut TrackerState) {
        while state.records.len() > self.max_tracked {
            let Some(index) = state.records.iter().position(|r| r.status.is_terminal()) else {
                break;
            };
            if let Some(record) = state.records.remove(index) {
                debug!("[TRACKER] Evicted {}", record.id);
            }
        }
    }

    fn publish_status(&self, state: &TrackerState) {
        self.events.push(
            lrc::STATUS_ATTR,
            codec::encode_entries(state.records.iter().map(|r| (r.id.as_str(), r.status.as_str()))),
        );

        let active: Vec<&CommandRecord> = state
            .records
            .iter()
            .filter(|r| !r.status.is_terminal())
            .collect();
        self.events.push(
            lrc::IDS_IN_QUEUE_ATTR,
            active.iter().map(|r| r.id.clone()).collect(),
        );
        self.events.push(
            lrc::COMMANDS_IN_QUEUE_ATTR,
            active.iter().map(|r| r.name.clone()).collect(),
        );
    }

    fn publish_progress(&self, state: &TrackerState) {
        self.events.push(
            lrc::PROGRESS_ATTR,
            codec::encode_entries(
                state
                    .records
                    .iter()
                    .filter_map(|r| r.progress.map(|p| (r.id.clone(), p.to_string()))),
            ),
        );
    }

    fn publish_result(&self, state: &TrackerState) {
        if let Some((id, result)) = &state.latest_result {
            self.events.push(
                lrc::RESULT_ATTR,
                codec::encode_entries([(id.as_str(), result.as_str())]),
            );
        }
    }
}

/// Result code reported for a terminal status that carried only a message
fn result_code_for(status: TaskStatus) -> ResultCode {
    match status {
        TaskStatus::Completed => ResultCode::Ok,
        TaskStatus::Aborted => ResultCode::Aborted,
        TaskStatus::Rejected => ResultCode::Rejected,
        TaskStatus::Failed => ResultCode::Failed,
        _ => ResultCode::Unknown,
    }
}
