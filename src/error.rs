//! Custom error types for the application.
//!
//! This module defines the primary error type, `TunerError`, used by the
//! supervisor, the run loop, the sample stream and the configuration layer.
//!
//! ## Error Hierarchy
//!
//! - **`DeviceUnreachable`**: no actuator answered on the bus (at connect,
//!   at start, or when a bounded resynchronization gives up). Surfaced to the
//!   user; the supervisor stays usable.
//! - **`UnknownChannel`** / **`ChannelsSealed`** / **`OutOfOrderSample`**:
//!   programming errors in how a run declares and feeds its sample stream.
//! - **`SessionBusy`**: the device session is leased to an active run.
//! - **`ResyncAborted`**: the window was closed while waiting for the device
//!   to come back after a configuration save.
//! - **`Device`**: wraps the `anyhow::Error` returned by a driver call.
//! - **`Config`** / **`Configuration`**: parse and validation failures of the
//!   layered configuration.
//!
//! Starting a run while another is active is not an error: the supervisor
//! resolves it with its stop-in-place policy and reports it through
//! [`StartOutcome`](crate::experiment::StartOutcome).

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, TunerError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum TunerError {
    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    #[error("Unknown channel '{0}'")]
    UnknownChannel(String),

    #[error("Channel '{0}' declared after acquisition started")]
    ChannelsSealed(String),

    #[error("Sample for '{channel}' at {elapsed:?} precedes previous sample at {previous:?}")]
    OutOfOrderSample {
        channel: String,
        elapsed: Duration,
        previous: Duration,
    },

    #[error("Device session is held by an active run")]
    SessionBusy,

    #[error("Resynchronization aborted before the device reappeared")]
    ResyncAborted,

    #[error("Invalid run request: {0}")]
    InvalidRequest(String),

    #[error("Device error: {0:#}")]
    Device(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run task failed: {0}")]
    TaskJoin(String),
}

impl From<figment::Error> for TunerError {
    fn from(value: figment::Error) -> Self {
        TunerError::Config(Box::new(value))
    }
}

impl TunerError {
    /// Whether the control loop can keep running after reporting this error.
    ///
    /// Stream bookkeeping errors indicate a declare/append mismatch in the
    /// run loop itself and are treated as fatal.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TunerError::DeviceUnreachable(_)
            | TunerError::SessionBusy
            | TunerError::ResyncAborted
            | TunerError::InvalidRequest(_)
            | TunerError::Device(_)
            | TunerError::TaskJoin(_) => true,
            TunerError::UnknownChannel(_)
            | TunerError::ChannelsSealed(_)
            | TunerError::OutOfOrderSample { .. }
            | TunerError::Config(_)
            | TunerError::Configuration(_)
            | TunerError::Io(_) => false,
        }
    }
}
