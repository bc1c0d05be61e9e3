//! Serve command implementation.

use journal_sync_server::{ServerConfig, SyncServer, TokenDigestAuthorizer};
use std::net::SocketAddr;
use std::path::Path;
use tracing::{info, warn};

/// Runs the server until Ctrl-C.
pub fn run(
    data_dir: &Path,
    bind: SocketAddr,
    token_digests: Vec<String>,
    max_batch_items: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::new(bind, data_dir).with_max_batch_items(max_batch_items);
    let server = SyncServer::new(config)?;
    let server = if token_digests.is_empty() {
        warn!("no token digests configured, accepting every request");
        server
    } else {
        info!(tokens = token_digests.len(), "bearer authorization enabled");
        server.with_authorizer(TokenDigestAuthorizer::new(token_digests))
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server.serve(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
    }))?;
    Ok(())
}
