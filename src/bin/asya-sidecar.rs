//! Asya actor sidecar entry point.

use clap::Parser;
use std::sync::Arc;

use asya_core::progress::{HttpProgressSink, NullProgressSink, ProgressSink};
use asya_core::sidecar::Sidecar;
use asya_core::transport;
use asya_core::types::{SidecarConfig, TransportConfig};

#[derive(Parser, Debug)]
#[command(name = "asya-sidecar", about = "Asya actor sidecar: consumes a queue and drives the runtime")]
struct Args {
    /// Actor name (overrides ASYA_ACTOR_NAME).
    #[arg(long)]
    actor: Option<String>,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    asya_core::observability::init_tracing("sidecar");
    let args = Args::parse();

    let mut config = SidecarConfig::from_env()?;
    if let Some(actor) = args.actor {
        config.actor = actor;
    }

    let transport_config = TransportConfig::from_env()?;
    let transport = transport::connect(&transport_config).await?;

    let sink: Arc<dyn ProgressSink> = match &config.progress_url {
        Some(url) => Arc::new(HttpProgressSink::new(url.clone())),
        None => Arc::new(NullProgressSink),
    };

    let sidecar = Sidecar::new(config, transport, sink);
    let cancel = sidecar.cancellation_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    sidecar.run().await?;
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
