//! Abort command handler

use super::HandlerContext;
use crate::executor::{TaskCallback, TaskUpdate};
use lrc_shared::state_machine::ObsTrigger;
use lrc_shared::{CommandReply, ResultCode, TaskStatus};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Handle Abort
///
/// Moves to ABORTING, then aborts the executor. The state settles in ABORTED
/// (or FAULT) before the abort's terminal status reaches `task_callback`.
pub fn handle_abort(ctx: &HandlerContext, task_callback: TaskCallback) -> CommandReply {
    if let Err(e) = ctx.fsm.trigger(ObsTrigger::AbortStarted) {
        return (ResultCode::NotAllowed, e.to_string());
    }

    let fsm = ctx.fsm.clone();
    let settle: TaskCallback = Arc::new(move |mut update: TaskUpdate| {
        let trigger = match update.status {
            Some(TaskStatus::Completed) => Some(ObsTrigger::AbortSucceeded),
            Some(TaskStatus::Failed) => Some(ObsTrigger::AbortFailed),
            _ => None,
        };
        if let Some(trigger) = trigger {
            if let Err(e) = fsm.trigger(trigger) {
                warn!("[ABORT] {}", e);
            }
            if update.result.is_none() {
                let code = if trigger == ObsTrigger::AbortSucceeded {
                    ResultCode::Ok
                } else {
                    ResultCode::Failed
                };
                let message = update.message.clone().unwrap_or_else(|| "Abort completed".into());
                update.result = Some(json!([code as i32, message]));
            }
        }
        task_callback(update);
    });

    let (status, message) = ctx.executor.abort(Some(settle));
    info!("[ABORT] {}", message);

    match status {
        TaskStatus::InProgress => (ResultCode::Started, message),
        _ => (ResultCode::Failed, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TaskExecutor;
    use lrc_shared::state_machine::{ObsState, ObservingStateMachine};
    use std::time::Duration;

    #[test]
    fn test_abort_settles_state_before_completion() {
        let ctx = HandlerContext {
            fsm: Arc::new(ObservingStateMachine::new(None).unwrap()),
            executor: Arc::new(TaskExecutor::new(1).unwrap()),
            step_delay: Duration::ZERO,
        };
        let (tx, rx) = std::sync::mpsc::channel();
        let fsm = ctx.fsm.clone();
        let callback: TaskCallback = Arc::new(move |update: TaskUpdate| {
            if let Some(status) = update.status {
                let _ = tx.send((status, fsm.state(), update.result));
            }
        });

        let (code, message) = handle_abort(&ctx, callback);
        assert_eq!(code, ResultCode::Started);
        assert_eq!(message, "Aborting tasks");

        let timeout = Duration::from_secs(5);
        let (status, state, _) = rx.recv_timeout(timeout).unwrap();
        assert_eq!((status, state), (TaskStatus::InProgress, ObsState::Aborting));
        let (status, state, result) = rx.recv_timeout(timeout).unwrap();
        assert_eq!((status, state), (TaskStatus::Completed, ObsState::Aborted));
        assert_eq!(result, Some(json!([0, "Abort completed"])));
    }

    #[test]
    fn test_abort_not_allowed_when_aborted() {
        let ctx = HandlerContext {
            fsm: Arc::new(ObservingStateMachine::new(None).unwrap()),
            executor: Arc::new(TaskExecutor::new(1).unwrap()),
            step_delay: Duration::ZERO,
        };
        ctx.fsm.trigger(ObsTrigger::FatalError).unwrap();
        let callback: TaskCallback = Arc::new(|_| {});
        assert_eq!(handle_abort(&ctx, callback).0, ResultCode::NotAllowed);
    }
}
