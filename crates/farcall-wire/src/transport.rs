//! HTTP transport used by the call proxy.

use async_trait::async_trait;
use bytes::Bytes;
use farcall_types::{RpcError, RpcResult};
use std::time::Duration;
use tracing::debug;

/// Raw reply from the remote side.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Delivers one JSON body and returns the raw reply.
///
/// Implementations must not retry: the protocol performs exactly one
/// exchange per call.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(
        &self,
        endpoint: &str,
        headers: &[(&'static str, String)],
        body: Vec<u8>,
    ) -> RpcResult<TransportResponse>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Option<Duration>) -> RpcResult<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| RpcError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(
        &self,
        endpoint: &str,
        headers: &[(&'static str, String)],
        body: Vec<u8>,
    ) -> RpcResult<TransportResponse> {
        let mut request = self
            .client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        debug!(endpoint, status, bytes = body.len(), "Received reply");

        Ok(TransportResponse { status, body })
    }
}
