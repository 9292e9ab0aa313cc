//! Plasma Root Chain Server
//!
//! Runs the root chain behind a WebSocket server.

use std::sync::Arc;
use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use plasma_root_chain::{
    network::{AuthConfig, RootChainServer, RootChainService, ServerConfig, ServiceConfig},
    SystemClock, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("Plasma Root Chain v{}", VERSION);

    let service_config = ServiceConfig::from_env().context("invalid service configuration")?;
    let server_config = ServerConfig::from_env().context("invalid server configuration")?;
    let auth_config = AuthConfig::from_env();

    info!("Operator: {}", service_config.operator);
    info!("Finalize budget: {} exits per pass", service_config.finalize_step_budget);

    let service = Arc::new(RootChainService::new(service_config, Arc::new(SystemClock)));
    let server = Arc::new(
        RootChainServer::new(server_config, &auth_config, service).context("failed to set up authentication")?,
    );

    let shutdown_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            shutdown_server.shutdown();
        }
    });

    server.run().await.context("server stopped with an error")?;

    let book = server.service().payout_book().await;
    info!("Custody {} / paid out {}", book.custody, book.paid_out);

    Ok(())
}
