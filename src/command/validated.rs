//! Commands that validate their input before running
//!
//! When input fails validation the observing state is put back where it was
//! before the command started, using one of the hook's rejected triggers.
//! A failure after validation passed is a real fault.

use super::base::{ActionHook, CommandError, ObservationCommand};
use crate::executor::TaskCallback;
use lrc_shared::state_machine::{ObsState, ObsTrigger, ObservingStateMachine, StateError};
use lrc_shared::{CommandReply, ResultCode};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Behaviour supplied by a concrete validated command
pub trait ValidatedCommand: Send + Sync {
    /// Check the raw input; a FAILED code stops the command before `do_command`
    fn validate_input(&self, argin: &str) -> CommandReply;

    /// Run the command, usually by submitting a task to an executor
    fn do_command(
        &self,
        argin: Option<&str>,
        task_callback: Option<TaskCallback>,
    ) -> anyhow::Result<CommandReply>;
}

/// State captured for one invocation
#[derive(Debug, Clone, Copy, Default)]
struct ValidationContext {
    source: Option<ObsState>,
    dest: Option<ObsState>,
    validated: bool,
}

/// Wraps a [`ValidatedCommand`] with state machine bookkeeping
pub struct InputValidatedCommand<C> {
    base: ObservationCommand,
    command: C,
    context: Mutex<ValidationContext>,
}

impl<C: ValidatedCommand> InputValidatedCommand<C> {
    pub fn new(fsm: Arc<ObservingStateMachine>, hook: ActionHook, command: C) -> Self {
        Self {
            base: ObservationCommand::new(fsm, hook),
            command,
            context: Mutex::new(ValidationContext::default()),
        }
    }

    /// The wrapped command
    pub fn inner(&self) -> &C {
        &self.command
    }

    /// Whether the hook's first trigger is declared from the current state
    pub fn is_allowed(&self) -> bool {
        self.base.is_allowed()
    }

    /// Start the command, run it, and settle the state for synchronous outcomes
    ///
    /// QUEUED and STARTED replies leave completion to the submitted task.
    pub fn invoke(
        &self,
        argin: Option<&str>,
        task_callback: Option<TaskCallback>,
    ) -> Result<CommandReply, CommandError> {
        self.started()?;

        match self.call_do(argin, task_callback) {
            Ok((ResultCode::Ok, message)) => {
                self.completed()?;
                Ok((ResultCode::Ok, message))
            }
            Ok((code @ (ResultCode::Queued | ResultCode::Started), message)) => Ok((code, message)),
            Ok((code, message)) => {
                debug!("[{}] {} reply: {}", self.base.hook().name, code, message);
                self.fatal_error()?;
                Ok((code, message))
            }
            Err(e) => {
                if let Err(state_error) = self.fatal_error() {
                    warn!("[{}] Could not settle state after failure: {}", self.base.hook().name, state_error);
                }
                Err(CommandError::Execution(e))
            }
        }
    }

    /// Validate `argin` if given, then run the command
    pub fn call_do(
        &self,
        argin: Option<&str>,
        task_callback: Option<TaskCallback>,
    ) -> anyhow::Result<CommandReply> {
        let Some(argin) = argin else {
            return self.command.do_command(None, task_callback);
        };

        let (code, message) = self.command.validate_input(argin);
        if code == ResultCode::Failed {
            debug!("[{}] Input rejected: {}", self.base.hook().name, message);
            return Ok((code, message));
        }

        self.context.lock().validated = true;
        self.command.do_command(Some(argin), task_callback)
    }

    /// Fire the started trigger, remembering where the machine came from and went
    ///
    /// Both states are taken from the same locked transition.
    pub fn started(&self) -> Result<ObsState, StateError> {
        let (source, dest) = self.base.start()?;

        let mut context = self.context.lock();
        context.source = Some(source);
        context.dest = Some(dest);
        context.validated = false;
        Ok(dest)
    }

    /// Fire the succeeded trigger
    pub fn completed(&self) -> Result<ObsState, StateError> {
        self.base.completed()
    }

    /// Recover from a failed invocation
    ///
    /// Unvalidated input rolls back through a rejected trigger when one leads
    /// from `dest` back to `source`; everything else goes to FAULT.
    pub fn fatal_error(&self) -> Result<ObsState, StateError> {
        let validated = self.context.lock().validated;
        if !validated {
            if let Some(trigger) = self.rejected_hook() {
                return self.base.fsm().trigger(trigger);
            }
        }
        self.base.fatal_error()
    }

    /// The hook's rejected trigger declared from `dest` to `source`, if any
    pub fn rejected_hook(&self) -> Option<ObsTrigger> {
        let context = *self.context.lock();
        let (source, dest) = (context.source?, context.dest?);
        let fsm = self.base.fsm();

        self.base
            .hook()
            .rejected
            .iter()
            .copied()
            .find(|&trigger| fsm.destination(dest, trigger) == Some(source))
    }
}
