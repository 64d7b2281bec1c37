//! HTTP surface of the remote dispatcher.
//!
//! Exposes a single route, `/{agent_name}`, accepting any method so that the
//! dispatcher itself decides what a rejection looks like. Every other path
//! answers 404.
//!
//! The body is only read after the caller is authenticated, so an
//! unauthenticated request gets the same opaque 404 whatever it carries.

use crate::dispatcher::{dispatch_span, DispatchReply, RemoteDispatcher};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use farcall_types::{RpcError, RpcResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
struct RouteState {
    dispatcher: Arc<RemoteDispatcher>,
    max_body_bytes: usize,
}

/// Build the router serving `dispatcher` under `/{agent_name}`.
///
/// Bodies larger than `max_body_bytes` from authenticated callers are
/// answered with a signed `MalformedEnvelope` failure.
pub fn router(dispatcher: Arc<RemoteDispatcher>, agent_name: &str, max_body_bytes: usize) -> Router {
    let path = format!("/{}", agent_name.trim_matches('/'));
    Router::new()
        .route(&path, any(dispatch_handler))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .layer(TraceLayer::new_for_http())
        .with_state(RouteState {
            dispatcher,
            max_body_bytes,
        })
}

async fn dispatch_handler(
    State(state): State<RouteState>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let span = dispatch_span();
    if span
        .in_scope(|| state.dispatcher.authorize(&method, &headers))
        .is_err()
    {
        return DispatchReply::not_found().into_response();
    }

    let limit = state.max_body_bytes;
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let reason = format!("request body unreadable or larger than {limit} bytes: {e}");
            return span
                .in_scope(|| state.dispatcher.reject_body(&reason))
                .into_response();
        }
    };

    // Target code is synchronous and may block.
    let dispatcher = state.dispatcher;
    match tokio::task::spawn_blocking(move || span.in_scope(|| dispatcher.dispatch_body(&bytes)))
        .await
    {
        Ok(reply) => reply.into_response(),
        Err(e) => {
            error!("Dispatch task failed: {e}");
            DispatchReply {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: None,
            }
            .into_response()
        }
    }
}

/// A running dispatcher server. Call [`RpcServer::shutdown`] to stop it.
pub struct RpcServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RpcServer {
    /// Bind `listen_addr` and start serving in the background.
    ///
    /// Port 0 picks a free port; read it back with [`RpcServer::local_addr`].
    pub async fn start(
        listen_addr: &str,
        dispatcher: Arc<RemoteDispatcher>,
        agent_name: &str,
        max_body_bytes: usize,
    ) -> RpcResult<Self> {
        let listener = tokio::net::TcpListener::bind(listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let app = router(dispatcher, agent_name, max_body_bytes);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        info!("Dispatcher listening on http://{local_addr}/{agent_name}");

        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|v| *v).await;
                info!("Dispatcher received shutdown signal");
            });
            if let Err(e) = server.await {
                error!("Dispatcher server error: {e}");
            }
        });

        Ok(Self {
            local_addr,
            shutdown_tx,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal graceful shutdown and wait for in-flight requests.
    pub async fn shutdown(self) -> RpcResult<()> {
        let _ = self.shutdown_tx.send(true);
        self.wait().await
    }

    /// Wait until the server stops.
    pub async fn wait(self) -> RpcResult<()> {
        self.task
            .await
            .map_err(|e| RpcError::Transport(format!("server task failed: {e}")))
    }
}
