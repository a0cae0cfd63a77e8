//! Observing commands for the subarray device
//!
//! This module handles:
//! - Binding commands to observing state machine triggers
//! - Validating command input before dispatch
//! - Rolling the observing state back when input is rejected
//! - Handlers for Configure, Scan, End, ObsReset and Abort

mod base;
pub mod handlers;
mod validated;

pub use base::{ActionHook, CommandError, ObservationCommand};
pub use validated::{InputValidatedCommand, ValidatedCommand};
