//! Call proxy: the client-side stand-in for a remote type.
//!
//! A [`CallProxy`] is bound to one target type name. Each [`CallProxy::call`]
//! builds a signed envelope, performs exactly one HTTP exchange, verifies the
//! reply and unpacks it into a value or a typed [`RpcError`].

use crate::connection::ConnectionDescriptor;
use crate::signing::EnvelopeSigner;
use crate::transport::{HttpTransport, ReqwestTransport};
use farcall_types::config::RpcConfig;
use farcall_types::envelope::{CallEnvelope, ErrorRecord, FailureKind, ResponseEnvelope, Value};
use farcall_types::{RpcError, RpcResult};
use serde::de::DeserializeOwned;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Receives output captured on the remote side.
pub trait OutputSink: Send + Sync {
    fn emit(&self, output: &str);
}

/// Writes remote output to this process's stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn emit(&self, output: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(output.as_bytes());
        let _ = stdout.flush();
    }
}

/// Collects remote output in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    buf: Mutex<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        self.buf.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl OutputSink for MemorySink {
    fn emit(&self, output: &str) {
        self.buf
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_str(output);
    }
}

/// Client-side handle for one remote type.
#[derive(Clone)]
pub struct CallProxy {
    target_type: String,
    location_hint: Option<String>,
    descriptor: Arc<ConnectionDescriptor>,
    signer: Arc<EnvelopeSigner>,
    transport: Arc<dyn HttpTransport>,
    output: Arc<dyn OutputSink>,
}

impl std::fmt::Debug for CallProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallProxy")
            .field("target_type", &self.target_type)
            .field("location_hint", &self.location_hint)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl CallProxy {
    /// Bind a proxy to `target_type`. The location hint is looked up in the
    /// descriptor's location table; a missing entry is tolerated.
    pub fn new(
        target_type: &str,
        descriptor: Arc<ConnectionDescriptor>,
        signer: Arc<EnvelopeSigner>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let location_hint = descriptor.location_of(target_type).map(String::from);
        if location_hint.is_none() {
            warn!(
                target_type,
                "could not locate type path, provide it manually"
            );
        }
        Self {
            target_type: target_type.to_string(),
            location_hint,
            descriptor,
            signer,
            transport,
            output: Arc::new(StdoutSink),
        }
    }

    /// Proxy wired from configuration with a reqwest transport.
    pub fn from_config(target_type: &str, config: &RpcConfig) -> RpcResult<Self> {
        let descriptor = ConnectionDescriptor::from_config(config);
        let transport =
            ReqwestTransport::new(descriptor.connect_timeout(), descriptor.request_timeout())?;
        let signer = EnvelopeSigner::from_config(&config.signing)?;
        Ok(Self::new(
            target_type,
            Arc::new(descriptor),
            Arc::new(signer),
            Arc::new(transport),
        ))
    }

    /// Override the location hint taken from the descriptor.
    pub fn with_location_hint(mut self, hint: &str) -> Self {
        self.location_hint = Some(hint.to_string());
        self
    }

    /// Send relayed remote output to `output` instead of stdout.
    pub fn with_output(mut self, output: Arc<dyn OutputSink>) -> Self {
        self.output = output;
        self
    }

    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    pub fn location_hint(&self) -> Option<&str> {
        self.location_hint.as_deref()
    }

    /// Invoke `method` remotely with positional `arguments`.
    pub async fn call(&self, method: &str, arguments: Vec<Value>) -> RpcResult<Value> {
        let mut envelope = CallEnvelope::new(
            &self.target_type,
            method,
            arguments,
            self.location_hint.clone(),
        );
        self.signer.sign_call(&mut envelope)?;
        let body = serde_json::to_vec(&envelope)?;

        let endpoint = self.descriptor.endpoint();
        debug!(target_type = %self.target_type, method, endpoint = %endpoint, "Calling");
        let reply = self
            .transport
            .post(&endpoint, &self.descriptor.auth_headers(), body)
            .await?;

        if !reply.is_success() {
            let return_value = self
                .signer
                .open_response(&reply.body)
                .ok()
                .and_then(|r| r.return_value);
            warn!(method, status = reply.status, "Remote call failed");
            return Err(RpcError::RemoteCallFailed {
                method: method.to_string(),
                status: reply.status,
                return_value,
            });
        }

        let response = self.signer.open_response(&reply.body).map_err(|e| match e {
            RpcError::MalformedEnvelope(msg) => {
                RpcError::SignatureMismatch(format!("unverifiable response: {msg}"))
            }
            other => other,
        })?;
        self.unpack(response)
    }

    /// [`CallProxy::call`] followed by decoding the returned value.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        arguments: Vec<Value>,
    ) -> RpcResult<T> {
        let value = self.call(method, arguments).await?;
        Ok(serde_json::from_value(value)?)
    }

    fn unpack(&self, response: ResponseEnvelope) -> RpcResult<Value> {
        if !response.captured_output.is_empty() {
            self.output.emit(&response.captured_output);
        }
        match response.error {
            Some(record) => Err(remote_error(record)),
            None => Ok(response.return_value.unwrap_or(Value::Null)),
        }
    }
}

/// Map an in-band failure onto the local error taxonomy.
fn remote_error(record: ErrorRecord) -> RpcError {
    match record.known_kind() {
        FailureKind::SignatureMismatch => RpcError::SignatureMismatch(record.message),
        FailureKind::TargetNotFound => RpcError::TargetNotFound(record.message),
        FailureKind::MalformedEnvelope => RpcError::MalformedEnvelope(record.message),
        _ => RpcError::Remote(record),
    }
}
