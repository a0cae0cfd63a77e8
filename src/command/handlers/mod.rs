//! Command handlers for the subarray's observing commands

mod abort;
mod configure;
mod lifecycle;
mod scan;

pub use abort::handle_abort;
pub use configure::{configure_hook, ConfigureCommand, ConfigureRequest};
pub use lifecycle::{end_hook, handle_queued_transition, obs_reset_hook};
pub use scan::{scan_hook, ScanCommand, ScanRequest};

use crate::command::base::ObservationCommand;
use crate::executor::{notify, AbortEvent, TaskCallback, TaskExecutor, TaskUpdate};
use lrc_shared::state_machine::ObservingStateMachine;
use lrc_shared::{CommandReply, ResultCode, TaskStatus};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Context passed to command handlers
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub fsm: Arc<ObservingStateMachine>,
    pub executor: Arc<TaskExecutor>,
    /// Simulated work per progress step
    pub step_delay: Duration,
}

/// Report progress through `steps`; returns false as soon as an abort is seen
fn run_progress(
    abort: &AbortEvent,
    callback: &Option<TaskCallback>,
    steps: &[u32],
    step_delay: Duration,
) -> bool {
    for &progress in steps {
        if abort.is_set() {
            return false;
        }
        thread::sleep(step_delay);
        notify(callback, TaskUpdate::progress(progress));
    }
    !abort.is_set()
}

fn report_aborted(callback: &Option<TaskCallback>) {
    notify(
        callback,
        TaskUpdate::status(TaskStatus::Aborted)
            .with_result(json!([ResultCode::Aborted as i32, "Command aborted"])),
    );
}

/// Fire `command`'s succeeded trigger and report COMPLETED
///
/// When the trigger is not declared from the current state the body is
/// treated as failed.
fn finish(command: &ObservationCommand, callback: &Option<TaskCallback>, message: String) {
    match command.completed() {
        Ok(_) => notify(
            callback,
            TaskUpdate::status(TaskStatus::Completed).with_result(json!([ResultCode::Ok as i32, message])),
        ),
        Err(e) => {
            warn!("[TASK] {} cannot complete: {}", command.hook().name, e);
            fail(command, callback, e.to_string());
        }
    }
}

/// Fire `command`'s failed trigger and report FAILED with `reason`
fn fail(command: &ObservationCommand, callback: &Option<TaskCallback>, reason: String) {
    match command.failed() {
        Ok(state) => warn!("[TASK] {} failed, now {}: {}", command.hook().name, state, reason),
        Err(e) => warn!("[TASK] {} failed and state not settled: {}", command.hook().name, e),
    }
    notify(
        callback,
        TaskUpdate::status(TaskStatus::Failed).with_result(json!([ResultCode::Failed as i32, reason])),
    );
}

/// Map an executor submission outcome to a command reply
fn submitted_reply((status, message): (TaskStatus, String)) -> CommandReply {
    match status {
        TaskStatus::Queued => (ResultCode::Queued, message),
        _ => (ResultCode::Rejected, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrc_shared::state_machine::{ObsState, ObsTrigger};
    use parking_lot::Mutex;

    fn recorder() -> (TaskCallback, Arc<Mutex<Vec<TaskUpdate>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let callback: TaskCallback = Arc::new(move |update| sink.lock().push(update));
        (callback, log)
    }

    #[test]
    fn test_run_progress_reports_every_step() {
        let (callback, log) = recorder();
        let done = run_progress(&AbortEvent::new(), &Some(callback), &[1, 50, 100], Duration::ZERO);
        assert!(done);
        let progress: Vec<u32> = log.lock().iter().filter_map(|u| u.progress).collect();
        assert_eq!(progress, vec![1, 50, 100]);
    }

    #[test]
    fn test_run_progress_stops_on_abort() {
        let (callback, log) = recorder();
        let abort = AbortEvent::new();
        abort.set();
        assert!(!run_progress(&abort, &Some(callback), &[1, 50, 100], Duration::ZERO));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_finish_outside_declared_state_fires_failed() {
        let fsm = Arc::new(ObservingStateMachine::new(None).unwrap());
        fsm.trigger(ObsTrigger::ConfigureStarted).unwrap();
        fsm.trigger(ObsTrigger::ConfigureSucceeded).unwrap();
        fsm.trigger(ObsTrigger::ScanStarted).unwrap();
        let command = ObservationCommand::new(fsm.clone(), configure_hook());
        let scan = ObservationCommand::new(fsm.clone(), scan_hook());

        // Configure cannot succeed from SCANNING and its failed trigger is
        // not declared there either, so the state is left alone
        let (callback, log) = recorder();
        finish(&command, &Some(callback), "Configured".into());
        assert_eq!(log.lock().last().and_then(|u| u.status), Some(TaskStatus::Failed));
        assert_eq!(fsm.state(), ObsState::Scanning);

        let (callback, log) = recorder();
        fail(&scan, &Some(callback), "receiver offline".into());
        let log = log.lock();
        assert_eq!(log[0].status, Some(TaskStatus::Failed));
        assert_eq!(log[0].result, Some(json!([3, "receiver offline"])));
        assert_eq!(fsm.state(), ObsState::Fault);
    }

    #[test]
    fn test_submitted_reply() {
        assert_eq!(
            submitted_reply((TaskStatus::Queued, "Task queued".into())),
            (ResultCode::Queued, "Task queued".to_string())
        );
        assert_eq!(
            submitted_reply((TaskStatus::Rejected, "Queue is aborting".into())).0,
            ResultCode::Rejected
        );
    }
}
