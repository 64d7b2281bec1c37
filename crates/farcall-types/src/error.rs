//! Shared error types for the Farcall system.

use crate::envelope::{ErrorRecord, Value};
use thiserror::Error;

/// Top-level error type for remote calls.
#[derive(Error, Debug)]
pub enum RpcError {
    /// An envelope signature did not verify (tampering or a secret mismatch).
    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    /// Transport-level credentials or token were rejected.
    ///
    /// Only ever observed server-side; callers see an opaque not-found status.
    #[error("Authentication failed")]
    AuthenticationFailure,

    /// The requested target type is not registered on the remote side.
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// The invoked method raised a failure on the remote side.
    #[error("Remote failure: {0}")]
    Remote(ErrorRecord),

    /// The remote side answered with a non-success transport status.
    #[error("Call {method} failed with status {status}")]
    RemoteCallFailed {
        /// Method that was being invoked.
        method: String,
        /// HTTP status code returned by the remote side.
        status: u16,
        /// Return value, only when the body carried a verified envelope.
        return_value: Option<Value>,
    },

    /// The request could not be delivered or the reply could not be read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A body was not a well-formed envelope.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A serialization/deserialization error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// The remote error record, if this failure was raised by the invoked method.
    pub fn remote_record(&self) -> Option<&ErrorRecord> {
        match self {
            RpcError::Remote(record) => Some(record),
            _ => None,
        }
    }
}

/// Alias for Result with RpcError.
pub type RpcResult<T> = Result<T, RpcError>;
