//! Run failures, grouped by where they came from.

use std::time::Duration;

use thiserror::Error;
use tmeter_shared::{ProtocolError, SweepError};

use crate::persist::PersistError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Link could not be opened, I/O failed, or the controller went quiet.
    Communication,
    /// Damaged, malformed, or out-of-sequence traffic.
    Protocol,
    /// The controller reported a failure or acknowledged an abort.
    Measurement,
    /// The request was rejected before anything was sent.
    Request,
    /// Artifacts could not be rendered or written.
    Output,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: std::io::Error,
    },
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("link closed by controller")]
    Closed,
    #[error("no record within {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("expected {expected}, received {received}")]
    OutOfSequence { expected: String, received: String },
    #[error("controller reported {reported} samples, received {received}, requested {requested}")]
    CountMismatch {
        requested: u16,
        reported: u16,
        received: usize,
    },
    #[error("controller speaks protocol {controller}, host speaks {host}")]
    VersionMismatch { controller: u16, host: u16 },
    #[error("controller error: {0}")]
    Controller(String),
    #[error("sweep aborted by controller")]
    Aborted,
    #[error("invalid sweep: {0}")]
    Sweep(#[from] SweepError),
    #[error("output error: {0}")]
    Persist(#[from] PersistError),
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::Open { .. } | RunError::Io(_) | RunError::Closed | RunError::Timeout(_) => {
                ErrorKind::Communication
            }
            RunError::Protocol(_)
            | RunError::OutOfSequence { .. }
            | RunError::CountMismatch { .. }
            | RunError::VersionMismatch { .. } => ErrorKind::Protocol,
            RunError::Controller(_) | RunError::Aborted => ErrorKind::Measurement,
            RunError::Sweep(_) => ErrorKind::Request,
            RunError::Persist(_) => ErrorKind::Output,
        }
    }

    /// Whether the controller may still be mid-sweep after this failure.
    pub fn controller_may_be_busy(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Communication | ErrorKind::Protocol
        )
    }
}
