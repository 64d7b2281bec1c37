//! `farcall serve`: run the remote dispatcher until Ctrl+C.

use crate::targets::builtin_registry;
use farcall_types::config::RpcConfig;
use farcall_types::RpcResult;
use farcall_wire::{RemoteDispatcher, RpcServer};
use std::sync::Arc;
use tracing::info;

pub async fn run(config: &RpcConfig, listen: Option<String>) -> RpcResult<()> {
    let registry = builtin_registry();
    let dispatcher = Arc::new(RemoteDispatcher::from_config(config, registry)?);
    info!(targets = ?dispatcher.registry().names(), "Serving targets");

    let listen_addr = listen.unwrap_or_else(|| config.server.listen_addr.clone());
    let server = RpcServer::start(
        &listen_addr,
        dispatcher,
        &config.server.agent_name,
        config.server.max_body_bytes,
    )
    .await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.shutdown().await
}
