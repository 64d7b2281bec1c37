//! Call and response envelopes.
//!
//! Both envelopes travel as JSON objects with short field names. The `h`
//! field carries the signature computed over every other field; it is
//! excluded from the signed form on both ends.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Dynamic value carried as arguments and return values.
pub type Value = serde_json::Value;

/// Name of the signature field in both envelopes.
pub const SIGNATURE_FIELD: &str = "h";

/// One outbound call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Logical name of the remote type to instantiate.
    #[serde(rename = "c")]
    pub target_type: String,
    /// Method to invoke on the instantiated target.
    #[serde(rename = "f")]
    pub method: String,
    /// Positional arguments.
    #[serde(rename = "a", default)]
    pub arguments: Vec<Value>,
    /// Relative source path of the type, when the caller knows it.
    #[serde(rename = "p", default)]
    pub location_hint: Option<String>,
    /// Signature over all other fields.
    #[serde(rename = "h", default)]
    pub signature: String,
}

impl CallEnvelope {
    /// Build an unsigned call envelope.
    pub fn new(
        target_type: impl Into<String>,
        method: impl Into<String>,
        arguments: Vec<Value>,
        location_hint: Option<String>,
    ) -> Self {
        Self {
            target_type: target_type.into(),
            method: method.into(),
            arguments,
            location_hint,
            signature: String::new(),
        }
    }
}

/// One reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Return value, present only on success. A method returning nothing
    /// yields `Some(Value::Null)`.
    #[serde(
        rename = "return",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub return_value: Option<Value>,
    /// Output written while the method executed.
    #[serde(rename = "stdOut", default)]
    pub captured_output: String,
    /// Failure raised by the method, mutually exclusive with `return_value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Signature over all other fields.
    #[serde(rename = "h", default)]
    pub signature: String,
}

impl ResponseEnvelope {
    /// Successful outcome.
    pub fn success(value: Value, captured_output: String) -> Self {
        Self {
            return_value: Some(value),
            captured_output,
            error: None,
            signature: String::new(),
        }
    }

    /// Failed outcome.
    pub fn failure(error: ErrorRecord, captured_output: String) -> Self {
        Self {
            return_value: None,
            captured_output,
            error: Some(error),
            signature: String::new(),
        }
    }
}

/// Keeps an explicit `null` distinct from a missing field.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Structured representation of a failure raised on the remote side.
///
/// Targets return this from failed invocations and callers receive it back
/// unchanged. It never carries executable or opaque foreign data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ErrorRecord {
    /// Failure category name.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorRecord {
    /// Kind used for failures raised by application code.
    pub const EXECUTION_KIND: &'static str = "RemoteExecutionFailure";

    /// A record with an arbitrary kind string and no details.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            details: None,
        }
    }

    /// A failure raised by a target method.
    pub fn raised(message: impl Into<String>) -> Self {
        Self::new(Self::EXECUTION_KIND, message)
    }

    /// Build a record from one of the protocol's well-known kinds.
    pub fn of(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::new(kind.as_str(), message)
    }

    /// Attach structured context, e.g. the offending argument index.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Classify the kind string.
    pub fn known_kind(&self) -> FailureKind {
        FailureKind::from_kind(&self.kind)
    }
}

/// Failure categories the protocol itself produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The call envelope did not verify.
    SignatureMismatch,
    /// The request body was not a JSON envelope.
    MalformedEnvelope,
    /// The target type is not registered.
    TargetNotFound,
    /// The target does not expose the method.
    MethodNotFound,
    /// An argument was missing or had the wrong shape.
    InvalidArguments,
    /// The target panicked during invocation.
    Panic,
    /// Application-defined kind.
    Other(String),
}

impl FailureKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &str {
        match self {
            FailureKind::SignatureMismatch => "SignatureMismatch",
            FailureKind::MalformedEnvelope => "MalformedEnvelope",
            FailureKind::TargetNotFound => "TargetNotFound",
            FailureKind::MethodNotFound => "MethodNotFound",
            FailureKind::InvalidArguments => "InvalidArguments",
            FailureKind::Panic => "Panic",
            FailureKind::Other(kind) => kind,
        }
    }

    /// Inverse of [`FailureKind::as_str`]. Unknown names become
    /// [`FailureKind::Other`] so application kinds survive the round trip.
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "SignatureMismatch" => FailureKind::SignatureMismatch,
            "MalformedEnvelope" => FailureKind::MalformedEnvelope,
            "TargetNotFound" => FailureKind::TargetNotFound,
            "MethodNotFound" => FailureKind::MethodNotFound,
            "InvalidArguments" => FailureKind::InvalidArguments,
            "Panic" => FailureKind::Panic,
            other => FailureKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
