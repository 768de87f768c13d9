//! Rendezvous-Server für den Peer-Signaling-Pfad
//!
//! Bind-Adresse über `PEER_CALL_BIND`, Logging über `RUST_LOG`.

use anyhow::Context;
use peer_call::rendezvous::{serve, RendezvousHub};
use peer_call::RendezvousConfig;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    peer_call::init_logging();

    let config = RendezvousConfig::from_env();
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    let hub = RendezvousHub::new();

    tokio::select! {
        result = serve(listener, hub.clone()) => {
            result.context("rendezvous server stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down rendezvous server ({:?})", hub);
        }
    }

    Ok(())
}
