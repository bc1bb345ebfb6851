//! Asya actor runtime - Unix socket server entry point.

use clap::Parser;
use std::sync::Arc;

use asya_core::endactor;
use asya_core::runtime::{self, HandlerRegistry};
use asya_core::storage::S3Store;
use asya_core::types::{RuntimeConfig, StorageConfig};

#[derive(Parser, Debug)]
#[command(name = "asya-runtime", about = "Asya actor runtime: serves one handler over a Unix socket")]
struct Args {
    /// Handler descriptor, e.g. `handlers.echo` (overrides ASYA_HANDLER).
    #[arg(long)]
    handler: Option<String>,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    asya_core::observability::init_tracing("runtime");
    let args = Args::parse();

    let mut config = RuntimeConfig::from_env()?;
    if let Some(handler) = args.handler {
        config.handler = handler;
        config.validate()?;
    }

    let mut registry = HandlerRegistry::new();
    runtime::samples::register_samples(&mut registry)?;
    if config.end_actor {
        let storage_config = StorageConfig::from_env()?;
        let store = Arc::new(S3Store::connect(&storage_config).await?);
        endactor::register_end_actors(&mut registry, store, &storage_config)?;
    }

    let mut server = runtime::build_server(config, &registry)?;
    let cancel = server.cancellation_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    server.serve().await?;
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
