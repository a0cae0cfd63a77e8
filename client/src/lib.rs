//! Long-Running Command Client
//!
//! Invokes long-running commands on a device proxy and turns the device's
//! status, progress and result event streams for that one command into a
//! single callback. The returned [`LrcSubscriptions`] handle owns the event
//! subscriptions; dropping it stops all callbacks.

mod error;
mod invoke;
mod retry;
mod subscription;

pub use error::LrcError;
pub use invoke::{invoke_lrc, LrcCallback, LrcClient, LrcClientConfig, LrcUpdate};
pub use retry::retry_call;
pub use subscription::LrcSubscriptions;
