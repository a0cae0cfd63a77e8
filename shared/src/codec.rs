//! Flat-tuple codec for LRC attributes
//!
//! Long-running command attributes travel as a flat list of strings that
//! alternates command id and payload:
//! ```text
//! [ id_0, payload_0, id_1, payload_1, ... ]
//! ```
//!
//! Inside the crate these are handled as structured entries keyed by command
//! id; the flat form only exists at the attribute boundary.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::TaskStatus;

/// Errors that can occur while decoding LRC attribute values
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Attribute tuple has odd length: {0}")]
    OddLength(usize),

    #[error("Unknown task status: {0}")]
    InvalidStatus(String),

    #[error("Invalid progress value: {0}")]
    InvalidProgress(String),

    #[error("Invalid JSON result: {0}")]
    InvalidResult(#[from] serde_json::Error),
}

/// Flatten `(command_id, payload)` entries into the wire tuple
pub fn encode_entries<I, K, V>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut flat = Vec::new();
    for (id, payload) in entries {
        flat.push(id.into());
        flat.push(payload.into());
    }
    flat
}

/// Decode a wire tuple into a map from command id to raw payload
///
/// If an id appears more than once the last occurrence wins, matching the
/// order in which the device appended them.
pub fn decode_entries(flat: &[String]) -> Result<HashMap<String, String>, CodecError> {
    if flat.len() % 2 != 0 {
        return Err(CodecError::OddLength(flat.len()));
    }

    Ok(flat
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect())
}

/// Payload for one command extracted from an LRC attribute
#[derive(Debug, Clone, PartialEq)]
pub enum LrcPayload {
    Status(TaskStatus),
    Progress(u32),
    Result(Value),
}

/// Which of the monitored LRC attributes a value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrcAttribute {
    Status,
    Progress,
    Result,
}

impl LrcAttribute {
    /// Map an attribute name to the monitored attribute, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(&crate::lrc::STATUS_ATTR.to_ascii_lowercase()) {
            Some(LrcAttribute::Status)
        } else if name.ends_with(&crate::lrc::PROGRESS_ATTR.to_ascii_lowercase()) {
            Some(LrcAttribute::Progress)
        } else if name.ends_with(&crate::lrc::RESULT_ATTR.to_ascii_lowercase()) {
            Some(LrcAttribute::Result)
        } else {
            None
        }
    }

    /// Parse the raw payload for this attribute into its typed form
    pub fn parse(self, raw: &str) -> Result<LrcPayload, CodecError> {
        match self {
            LrcAttribute::Status => raw.parse().map(LrcPayload::Status),
            LrcAttribute::Progress => raw
                .trim()
                .parse()
                .map(LrcPayload::Progress)
                .map_err(|_| CodecError::InvalidProgress(raw.to_string())),
            LrcAttribute::Result => Ok(LrcPayload::Result(serde_json::from_str(raw)?)),
        }
    }
}

/// Find and parse the payload for `command_id` in a wire tuple
///
/// Returns `Ok(None)` when the tuple has no entry for this command; entries
/// for other commands are not an error.
pub fn extract(
    attribute: LrcAttribute,
    flat: &[String],
    command_id: &str,
) -> Result<Option<LrcPayload>, CodecError> {
    let entries = decode_entries(flat)?;
    entries
        .get(command_id)
        .map(|raw| attribute.parse(raw))
        .transpose()
}
