//! Scan command handler

use super::{fail, finish, report_aborted, run_progress, submitted_reply, HandlerContext};
use crate::command::base::{ActionHook, ObservationCommand};
use crate::command::validated::ValidatedCommand;
use crate::executor::{notify, TaskCallback, TaskUpdate};
use lrc_shared::state_machine::ObsTrigger;
use lrc_shared::{CommandReply, ResultCode, TaskStatus};
use serde::Deserialize;
use tracing::info;

const SCAN_PROGRESS: [u32; 4] = [25, 50, 75, 100];

/// JSON input of the Scan command
#[derive(Debug, Clone, Deserialize)]
pub struct ScanRequest {
    pub scan_id: u64,
    /// Make the scan fail once its steps have run
    #[serde(default)]
    pub simulate_fault: bool,
}

pub fn scan_hook() -> ActionHook {
    ActionHook::new("Scan")
        .started(ObsTrigger::ScanStarted)
        .succeeded(ObsTrigger::ScanSucceeded)
        .failed(ObsTrigger::ScanFailed)
        .rejected(&[ObsTrigger::ScanRejected])
}

/// Runs a scan as a long-running task
pub struct ScanCommand {
    ctx: HandlerContext,
}

impl ScanCommand {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

impl ValidatedCommand for ScanCommand {
    fn validate_input(&self, argin: &str) -> CommandReply {
        match serde_json::from_str::<ScanRequest>(argin) {
            Ok(request) if request.scan_id == 0 => (ResultCode::Failed, "scan_id must be positive".into()),
            Ok(_) => (ResultCode::Ok, "Scan input valid".into()),
            Err(e) => (ResultCode::Failed, format!("Malformed scan request: {e}")),
        }
    }

    fn do_command(
        &self,
        argin: Option<&str>,
        task_callback: Option<TaskCallback>,
    ) -> anyhow::Result<CommandReply> {
        let request = match argin {
            Some(argin) => serde_json::from_str::<ScanRequest>(argin)?,
            None => anyhow::bail!("Scan requires a scan_id"),
        };
        let scan_id = request.scan_id;
        let simulate_fault = request.simulate_fault;

        let command = ObservationCommand::new(self.ctx.fsm.clone(), scan_hook());
        let step_delay = self.ctx.step_delay;

        let submitted = self.ctx.executor.submit(
            move |abort, callback| {
                notify(&callback, TaskUpdate::status(TaskStatus::InProgress));
                info!("[SCAN] Scan {} running", scan_id);
                if !run_progress(&abort, &callback, &SCAN_PROGRESS, step_delay) {
                    report_aborted(&callback);
                    return;
                }
                if simulate_fault {
                    fail(&command, &callback, format!("Scan {scan_id} lost its data stream"));
                    return;
                }
                finish(&command, &callback, format!("Scan {scan_id} completed"));
            },
            task_callback,
        );

        Ok(submitted_reply(submitted))
    }
}
