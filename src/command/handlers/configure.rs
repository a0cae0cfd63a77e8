//! Configure command handler

use super::{fail, finish, report_aborted, run_progress, submitted_reply, HandlerContext};
use crate::command::base::{ActionHook, ObservationCommand};
use crate::command::validated::ValidatedCommand;
use crate::executor::{notify, TaskCallback, TaskUpdate};
use lrc_shared::state_machine::ObsTrigger;
use lrc_shared::{CommandReply, ResultCode, TaskStatus};
use serde::Deserialize;
use tracing::info;

/// Progress values reported while a configuration is applied
pub const CONFIGURE_PROGRESS: [u32; 5] = [1, 25, 50, 74, 100];

/// JSON input of the Configure command
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigureRequest {
    pub config_id: String,
    #[serde(default)]
    pub receptors: Vec<String>,
    /// Make the configuration fail once its steps have run
    #[serde(default)]
    pub simulate_fault: bool,
}

/// Triggers fired by Configure
pub fn configure_hook() -> ActionHook {
    ActionHook::new("Configure")
        .started(ObsTrigger::ConfigureStarted)
        .succeeded(ObsTrigger::ConfigureSucceeded)
        .failed(ObsTrigger::ConfigureFailed)
        .rejected(&[
            ObsTrigger::ConfigureRejectedToIdle,
            ObsTrigger::ConfigureRejectedToReady,
        ])
}

/// Applies a configuration as a long-running task
pub struct ConfigureCommand {
    ctx: HandlerContext,
}

impl ConfigureCommand {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

impl ValidatedCommand for ConfigureCommand {
    fn validate_input(&self, argin: &str) -> CommandReply {
        match serde_json::from_str::<ConfigureRequest>(argin) {
            Ok(request) if request.config_id.trim().is_empty() => {
                (ResultCode::Failed, "config_id must not be empty".into())
            }
            Ok(_) => (ResultCode::Ok, "Configure input valid".into()),
            Err(e) => (ResultCode::Failed, format!("Malformed configuration: {e}")),
        }
    }

    fn do_command(
        &self,
        argin: Option<&str>,
        task_callback: Option<TaskCallback>,
    ) -> anyhow::Result<CommandReply> {
        let request = argin
            .map(serde_json::from_str::<ConfigureRequest>)
            .transpose()?;
        let (config_id, receptors, simulate_fault) = match request {
            Some(request) => (request.config_id, request.receptors.len(), request.simulate_fault),
            None => ("default".to_string(), 0, false),
        };

        let command = ObservationCommand::new(self.ctx.fsm.clone(), configure_hook());
        let step_delay = self.ctx.step_delay;

        let submitted = self.ctx.executor.submit(
            move |abort, callback| {
                notify(&callback, TaskUpdate::status(TaskStatus::InProgress));
                if !run_progress(&abort, &callback, &CONFIGURE_PROGRESS, step_delay) {
                    info!("[CONFIGURE] {} aborted", config_id);
                    report_aborted(&callback);
                    return;
                }

                if simulate_fault {
                    fail(&command, &callback, format!("Configuration {config_id} could not be applied"));
                    return;
                }

                info!("[CONFIGURE] Applied {} with {} receptors", config_id, receptors);
                finish(&command, &callback, format!("Configured {config_id}"));
            },
            task_callback,
        );

        Ok(submitted_reply(submitted))
    }
}
