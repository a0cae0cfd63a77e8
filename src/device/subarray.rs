//! Subarray component: observing commands on a local device

use super::local::{CommandHandler, LocalDevice};
use super::{DeviceConfig, DeviceError};
use crate::command::handlers::{
    configure_hook, end_hook, handle_abort, handle_queued_transition, obs_reset_hook, scan_hook,
    ConfigureCommand, HandlerContext, ScanCommand,
};
use crate::command::{
    ActionHook, CommandError, InputValidatedCommand, ObservationCommand, ValidatedCommand,
};
use lrc_shared::state_machine::{ObsState, ObservingStateMachine};
use lrc_shared::{CommandReply, ResultCode};
use std::sync::Arc;
use tracing::{info, warn};

/// Attribute publishing the observing state
pub const OBS_STATE_ATTR: &str = "obsState";

/// A subarray device with Configure, Scan, End, Abort and ObsReset
pub struct Subarray {
    device: Arc<LocalDevice>,
    fsm: Arc<ObservingStateMachine>,
}

impl Subarray {
    pub fn new(config: DeviceConfig) -> Result<Self, DeviceError> {
        let step_delay = config.step_delay;
        let device = Arc::new(LocalDevice::new(config)?);

        let events = device.events();
        events.register(OBS_STATE_ATTR, vec![ObsState::Idle.to_string()]);
        let fsm = Arc::new(ObservingStateMachine::new(Some(Box::new(move |state| {
            events.push(OBS_STATE_ATTR, vec![state.to_string()]);
        })))?);

        let ctx = HandlerContext {
            fsm: fsm.clone(),
            executor: device.executor(),
            step_delay,
        };

        let configure = Arc::new(InputValidatedCommand::new(
            fsm.clone(),
            configure_hook(),
            ConfigureCommand::new(ctx.clone()),
        ));
        device.register_command("Configure", validated_handler(configure));

        let scan = Arc::new(InputValidatedCommand::new(
            fsm.clone(),
            scan_hook(),
            ScanCommand::new(ctx.clone()),
        ));
        device.register_command("Scan", validated_handler(scan));

        device.register_command("End", queued_transition_handler(&ctx, end_hook()));
        device.register_command("ObsReset", queued_transition_handler(&ctx, obs_reset_hook()));

        let abort_ctx = ctx;
        device.register_command(
            "Abort",
            Arc::new(move |_argin, callback| handle_abort(&abort_ctx, callback)),
        );

        info!("[SUBARRAY] {} commands registered", device.config().name);
        Ok(Self { device, fsm })
    }

    /// The device serving this subarray's commands
    pub fn device(&self) -> Arc<LocalDevice> {
        self.device.clone()
    }

    pub fn obs_state(&self) -> ObsState {
        self.fsm.state()
    }
}

/// Expose an input-validated command as a device handler
fn validated_handler<C>(command: Arc<InputValidatedCommand<C>>) -> CommandHandler
where
    C: ValidatedCommand + 'static,
{
    Arc::new(move |argin, callback| {
        match command.invoke(argin.as_deref(), Some(callback)) {
            Ok(reply) => reply,
            Err(CommandError::NotAllowed(e)) => (ResultCode::NotAllowed, e.to_string()),
            Err(e) => {
                warn!("[SUBARRAY] {}", e);
                (ResultCode::Failed, e.to_string())
            }
        }
    })
}

fn queued_transition_handler(ctx: &HandlerContext, hook: ActionHook) -> CommandHandler {
    let ctx = ctx.clone();
    Arc::new(move |_argin, callback| -> CommandReply {
        let command = ObservationCommand::new(ctx.fsm.clone(), hook.clone());
        handle_queued_transition(&ctx, command, Some(callback))
    })
}
