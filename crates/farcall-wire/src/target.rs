//! Callable remote targets.
//!
//! A target is a type the dispatcher can construct with no arguments and
//! then call by method name. Targets write their incidental output into the
//! [`CaptureScope`] they are handed and report failures as [`ErrorRecord`]s.

use crate::capture::CaptureScope;
use farcall_types::envelope::{ErrorRecord, FailureKind, Value};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;

/// A type that can be invoked remotely.
pub trait RemoteTarget: Send {
    /// Call `method` with positional `args`.
    ///
    /// Unknown methods should return [`method_not_found`].
    fn invoke(
        &mut self,
        method: &str,
        args: &Args<'_>,
        out: &mut CaptureScope,
    ) -> Result<Value, ErrorRecord>;
}

/// Zero-argument constructor for a registered target.
pub type TargetFactory = Arc<dyn Fn() -> Box<dyn RemoteTarget> + Send + Sync>;

/// Factory for any `Default` target.
pub fn default_factory<T>() -> TargetFactory
where
    T: RemoteTarget + Default + 'static,
{
    Arc::new(|| Box::new(T::default()) as Box<dyn RemoteTarget>)
}

/// Failure for a method the target does not expose.
pub fn method_not_found(type_name: &str, method: &str) -> ErrorRecord {
    ErrorRecord::of(
        FailureKind::MethodNotFound,
        format!("Call to undefined method {type_name}::{method}()"),
    )
    .with_details(json!({ "type": type_name, "method": method }))
}

/// Positional arguments of one call.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn new(values: &'a [Value]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn raw(&self, index: usize) -> Option<&'a Value> {
        self.values.get(index)
    }

    pub fn as_slice(&self) -> &'a [Value] {
        self.values
    }

    /// Decode a required argument.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, ErrorRecord> {
        let value = self.values.get(index).ok_or_else(|| {
            ErrorRecord::of(
                FailureKind::InvalidArguments,
                format!("missing argument {index}"),
            )
            .with_details(json!({ "index": index, "given": self.values.len() }))
        })?;
        decode(index, value)
    }

    /// Decode an optional argument; missing and `null` both give `None`.
    pub fn optional<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>, ErrorRecord> {
        match self.values.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => decode(index, value).map(Some),
        }
    }
}

fn decode<T: DeserializeOwned>(index: usize, value: &Value) -> Result<T, ErrorRecord> {
    T::deserialize(value).map_err(|e| {
        ErrorRecord::of(
            FailureKind::InvalidArguments,
            format!("argument {index}: {e}"),
        )
        .with_details(json!({ "index": index }))
    })
}
