//! Errors raised when invoking a long-running command

use lrc_shared::{ProxyError, ResultCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LrcError {
    /// The device refused to queue the command
    #[error("Command {command} rejected: {message}")]
    CommandRejected { command: String, message: String },

    /// The device answered with a code other than QUEUED or STARTED
    #[error("Command {command} returned unexpected result code {code}: {message}")]
    ResultCode {
        command: String,
        code: ResultCode,
        message: String,
    },

    /// A proxy call still failed after all retries
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}
