//! Command and record messages carried inside frames.
//!
//! Payloads are compact JSON objects. Host commands are tagged by `cmd`,
//! controller records by `type`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::{self, FrameError};
use crate::sweep::{SampleRecord, SweepRequest};

/// Bumped whenever a message shape changes incompatibly.
pub const PROTOCOL_VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum HostToController {
    Version,
    Sweep(SweepRequest),
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerToHost {
    Version { firmware: String, protocol: u16 },
    Sample(SampleRecord),
    /// Terminal marker: no further samples follow for this sweep.
    Done { count: u16 },
    Error { message: String },
    Aborted,
}

impl ControllerToHost {
    pub fn error(message: impl Into<String>) -> Self {
        ControllerToHost::Error { message: message.into() }
    }
}

/// Serialize a message and wrap it in a frame.
pub fn encode_message<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(message)?;
    Ok(frame::encode(&payload))
}

/// Parse a payload already stripped of its checksum.
pub fn decode_message<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}
