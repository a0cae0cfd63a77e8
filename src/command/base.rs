//! Commands bound to the observing state machine

use lrc_shared::state_machine::{ObsState, ObsTrigger, ObservingStateMachine, StateError};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned when invoking a command
#[derive(Error, Debug)]
pub enum CommandError {
    /// The state machine does not allow the command's transition now
    #[error("Command not allowed: {0}")]
    NotAllowed(#[from] StateError),

    /// The command body itself failed
    #[error("Command failed: {0}")]
    Execution(anyhow::Error),
}

/// State machine triggers a command fires over its lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionHook {
    pub name: &'static str,
    pub started: Option<ObsTrigger>,
    pub succeeded: Option<ObsTrigger>,
    pub failed: Option<ObsTrigger>,
    /// Candidate triggers that return the machine to where it was before
    /// `started` fired
    pub rejected: Vec<ObsTrigger>,
}

impl ActionHook {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            started: None,
            succeeded: None,
            failed: None,
            rejected: Vec::new(),
        }
    }

    pub fn started(mut self, trigger: ObsTrigger) -> Self {
        self.started = Some(trigger);
        self
    }

    pub fn succeeded(mut self, trigger: ObsTrigger) -> Self {
        self.succeeded = Some(trigger);
        self
    }

    pub fn failed(mut self, trigger: ObsTrigger) -> Self {
        self.failed = Some(trigger);
        self
    }

    pub fn rejected(mut self, triggers: &[ObsTrigger]) -> Self {
        self.rejected = triggers.to_vec();
        self
    }
}

/// A command that moves the observing state machine through its hook
#[derive(Clone)]
pub struct ObservationCommand {
    fsm: Arc<ObservingStateMachine>,
    hook: ActionHook,
}

impl ObservationCommand {
    pub fn new(fsm: Arc<ObservingStateMachine>, hook: ActionHook) -> Self {
        Self { fsm, hook }
    }

    pub fn fsm(&self) -> &Arc<ObservingStateMachine> {
        &self.fsm
    }

    pub fn hook(&self) -> &ActionHook {
        &self.hook
    }

    /// Whether the first trigger of the hook is declared from the current state
    pub fn is_allowed(&self) -> bool {
        match self.hook.started.or(self.hook.succeeded) {
            Some(trigger) => self.fsm.may_trigger(trigger),
            None => true,
        }
    }

    /// Fire the `started` trigger, if the hook has one
    pub fn started(&self) -> Result<ObsState, StateError> {
        self.start().map(|(_, dest)| dest)
    }

    /// Fire the `started` trigger, returning `(source, dest)` read under the
    /// machine's lock
    ///
    /// Without a started trigger both are the current state.
    pub fn start(&self) -> Result<(ObsState, ObsState), StateError> {
        match self.hook.started {
            Some(trigger) => self.fsm.transition(trigger),
            None => {
                let state = self.fsm.state();
                Ok((state, state))
            }
        }
    }

    /// Fire the `succeeded` trigger, if the hook has one
    pub fn completed(&self) -> Result<ObsState, StateError> {
        self.fire(self.hook.succeeded)
    }

    /// Fire the `failed` trigger, falling back to the fatal error trigger
    pub fn failed(&self) -> Result<ObsState, StateError> {
        self.fire(Some(self.hook.failed.unwrap_or(ObsTrigger::FatalError)))
    }

    /// Fire the fatal error trigger, which is declared from every state
    pub fn fatal_error(&self) -> Result<ObsState, StateError> {
        self.fsm.trigger(ObsTrigger::FatalError)
    }

    fn fire(&self, trigger: Option<ObsTrigger>) -> Result<ObsState, StateError> {
        match trigger {
            Some(trigger) => self.fsm.trigger(trigger),
            None => Ok(self.fsm.state()),
        }
    }
}
