//! Asya gateway entry point: envelope creation, status, and progress stream.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use asya_core::gateway::{router, AppState, EnvelopeService, ProgressRegistry};
use asya_core::transport;
use asya_core::types::{GatewayConfig, TransportConfig};

#[derive(Parser, Debug)]
#[command(name = "asya-gateway", about = "Asya gateway: tool calls in, envelopes out")]
struct Args {
    /// HTTP listen address (overrides ASYA_GATEWAY_ADDR).
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    asya_core::observability::init_tracing("gateway");
    let args = Args::parse();

    let mut config = GatewayConfig::from_env()?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    let transport_config = TransportConfig::from_env()?;
    let transport = transport::connect(&transport_config).await?;

    let registry = Arc::new(ProgressRegistry::new(
        config.terminal_linger,
        config.registry_ttl,
    ));
    registry.spawn_sweeper(Duration::from_secs(60));

    let listen_addr = config.listen_addr.clone();
    let service = EnvelopeService::new(config, transport, registry);
    let state = Arc::new(AppState { service });

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!("Gateway listening on {}", listen_addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(signal) => signal,
        Err(e) => {
            tracing::error!("Failed to install SIGTERM handler: {}", e);
            return std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    tracing::warn!("Received termination signal, shutting down");
}
