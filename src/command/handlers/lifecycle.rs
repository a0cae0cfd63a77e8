//! End and ObsReset handlers
//!
//! Both fire their succeeded trigger from a queued task so they are ordered
//! behind any configure or scan still in the queue. If the machine has moved
//! on by then the failed trigger fires instead.

use super::{finish, report_aborted, submitted_reply, HandlerContext};
use crate::command::base::{ActionHook, ObservationCommand};
use crate::executor::{notify, TaskCallback, TaskUpdate};
use lrc_shared::state_machine::ObsTrigger;
use lrc_shared::{CommandReply, ResultCode, TaskStatus};

pub fn end_hook() -> ActionHook {
    ActionHook::new("End").succeeded(ObsTrigger::EndSucceeded)
}

pub fn obs_reset_hook() -> ActionHook {
    ActionHook::new("ObsReset")
        .succeeded(ObsTrigger::ResetSucceeded)
        .failed(ObsTrigger::ResetFailed)
}

/// Queue `command`'s succeeded transition
pub fn handle_queued_transition(
    ctx: &HandlerContext,
    command: ObservationCommand,
    task_callback: Option<TaskCallback>,
) -> CommandReply {
    if !command.is_allowed() {
        return (
            ResultCode::NotAllowed,
            format!("{} not allowed in {}", command.hook().name, ctx.fsm.state()),
        );
    }

    let submitted = ctx.executor.submit(
        move |abort, callback| {
            notify(&callback, TaskUpdate::status(TaskStatus::InProgress));
            if abort.is_set() {
                report_aborted(&callback);
                return;
            }
            let name = command.hook().name;
            finish(&command, &callback, format!("{name} completed"));
        },
        task_callback,
    );

    submitted_reply(submitted)
}
