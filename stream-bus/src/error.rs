//! Driver-level errors.
//!
//! None of these cross a thread boundary: each driver resolves its own errors
//! through its retry policy, and only the resulting [`ExitStatus`] reaches the
//! supervisor.

use thiserror::Error;

use crate::endpoint::ExitStatus;
use crate::signal::Interruption;

#[derive(Error, Debug)]
pub enum StreamError {
    /// Cannot open, bind, connect or accept.
    #[error("{endpoint}: cannot open: {source}")]
    Open {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Read or write failed mid-stream.
    #[error("{endpoint}: i/o failure: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Address lookup yielded nothing usable.
    #[error("{endpoint}: cannot resolve {address}")]
    Unresolved { endpoint: String, address: String },

    /// A termination signal interrupted a wait.
    #[error("terminated by signal")]
    Signal,

    /// The supervisor cancelled the driver.
    #[error("cancelled")]
    Cancelled,
}

impl StreamError {
    pub fn open(endpoint: impl Into<String>, source: std::io::Error) -> Self {
        StreamError::Open {
            endpoint: endpoint.into(),
            source,
        }
    }

    pub fn io(endpoint: impl Into<String>, source: std::io::Error) -> Self {
        StreamError::Io {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Status a driver records for this error.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            StreamError::Open { .. } | StreamError::Io { .. } | StreamError::Unresolved { .. } => {
                ExitStatus::IoError
            }
            StreamError::Signal => ExitStatus::Killed,
            // Cancellation keeps whatever the driver had recorded; callers handle it.
            StreamError::Cancelled => ExitStatus::Clean,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            StreamError::Open { .. } => "open_failure",
            StreamError::Io { .. } => "io_failure",
            StreamError::Unresolved { .. } => "unresolved",
            StreamError::Signal => "signal_termination",
            StreamError::Cancelled => "cancelled",
        }
    }

    pub fn interruption(&self) -> Option<Interruption> {
        match self {
            StreamError::Signal => Some(Interruption::Signal),
            StreamError::Cancelled => Some(Interruption::Cancelled),
            _ => None,
        }
    }
}

impl From<Interruption> for StreamError {
    fn from(interruption: Interruption) -> Self {
        match interruption {
            Interruption::Signal => StreamError::Signal,
            Interruption::Cancelled => StreamError::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
