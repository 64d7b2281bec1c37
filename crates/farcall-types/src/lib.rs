//! Core types for the Farcall remote call protocol.
//!
//! This crate defines the data shared by both ends of a call: the signed
//! call/response envelopes, the structured error record carried back from a
//! failed invocation, the error taxonomy, and the configuration layout. It
//! contains no transport or dispatch logic.

pub mod config;
pub mod envelope;
pub mod error;

pub use envelope::{CallEnvelope, ErrorRecord, FailureKind, ResponseEnvelope, Value};
pub use error::{RpcError, RpcResult};
