//! The broker's error taxonomy.
//!
//! Every handler returns [`BrokerError`]; the dispatcher is the single place
//! that turns an `Err` into a `RESP_ERROR` packet (see [`crate::proto`]).

use std::io;

/// Kind-not-type error taxonomy for the broker.
///
/// Each variant corresponds to one of the kinds described in the protocol
/// design: a failed syscall, a malformed request, a request that targets a
/// mountpoint the broker doesn't own, an unsupported wire message, or a
/// subprocess that misbehaved.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// An underlying syscall failed.
    #[error("{context}: {source}")]
    System { context: String, source: io::Error },

    /// Arguments were malformed, exceeded a fixed buffer, or the requested
    /// operation is unsupported on this platform.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// The request named a mountpoint the broker does not believe it owns.
    #[error("not a known mount: {0}")]
    Domain(String),

    /// The wire message itself could not be parsed or named an unsupported
    /// version/kind.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A supervised child process failed to start, stop, or exited
    /// unexpectedly.
    #[error("subprocess error: {0}")]
    Subprocess(String),
}

impl BrokerError {
    pub fn system(context: impl Into<String>, source: io::Error) -> Self {
        BrokerError::System {
            context: context.into(),
            source,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        BrokerError::Validation(msg.into())
    }

    pub fn domain(msg: impl Into<String>) -> Self {
        BrokerError::Domain(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        BrokerError::Protocol(msg.into())
    }

    pub fn subprocess(msg: impl Into<String>) -> Self {
        BrokerError::Subprocess(msg.into())
    }

    /// The errno-equivalent to report on the wire, if this error wraps one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            BrokerError::System { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// The single-byte exception kind tag used in the wire error record.
    pub fn wire_kind(&self) -> u8 {
        match self {
            BrokerError::System { .. } => 1,
            BrokerError::Validation(_) => 2,
            BrokerError::Domain(_) => 3,
            BrokerError::Protocol(_) => 4,
            BrokerError::Subprocess(_) => 5,
        }
    }
}

impl From<io::Error> for BrokerError {
    fn from(source: io::Error) -> Self {
        BrokerError::System {
            context: String::new(),
            source,
        }
    }
}

impl From<nix::Error> for BrokerError {
    fn from(err: nix::Error) -> Self {
        BrokerError::System {
            context: String::new(),
            source: io::Error::from(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
