//! Long-running command device
//!
//! Hosts long-running commands on a bounded worker pool, tracks their
//! status, progress and result as device attributes, and drives the
//! observing state machine of a subarray through validated commands.

pub mod command;
pub mod device;
pub mod executor;
