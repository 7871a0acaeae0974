//! Daemon error types.

use thiserror::Error;
use wattd_proto::{Ack, ProtoError};

/// Errors produced by the daemon's command handling and propagation paths.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A command argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A policy name did not resolve against the policy table.
    #[error("unknown policy: {0}")]
    UnknownPolicy(String),

    /// A numeric policy id exceeded the configured table.
    #[error("policy id {0} out of range")]
    PolicyIdOutOfRange(u32),

    /// No table frequency at or below the requested value.
    #[error("no valid frequency below {0} kHz")]
    NoLowerFrequency(u64),

    /// A p-state index exceeded the platform table.
    #[error("p-state {pstate} out of range (have {count})")]
    PstateOutOfRange {
        /// Requested p-state.
        pstate: u32,
        /// Number of p-states in the table.
        count: usize,
    },

    /// Could not connect to a peer within the configured timeout.
    #[error("connect timeout to {addr} after {timeout_ms}ms")]
    ConnectTimeout {
        /// Peer address.
        addr: String,
        /// Timeout that expired, in milliseconds.
        timeout_ms: u64,
    },

    /// A read or write to a peer timed out.
    #[error("i/o timeout talking to {addr}")]
    IoTimeout {
        /// Peer address.
        addr: String,
    },

    /// The configuration file failed structural validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Wire protocol violation.
    #[error(transparent)]
    Proto(#[from] ProtoError),

    /// Underlying socket or file error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    /// Maps an error to the wire acknowledgement code.
    pub fn ack(&self) -> Ack {
        Ack::Error
    }
}

/// Convenience alias for daemon results.
pub type Result<T> = std::result::Result<T, DaemonError>;
