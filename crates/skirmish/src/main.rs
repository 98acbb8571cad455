use std::net::SocketAddr;

use skirmish::prelude::*;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Relay address to announce when the relay binds a wildcard address.
const PUBLIC_RELAY_VAR: &str = "SKIRMISH_RELAY_PUBLIC";

#[tokio::main]
async fn main() -> Result<(), SkirmishError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(true))
        .init();

    let mut builder = SkirmishServer::builder()
        .lobby_bind("0.0.0.0:8200")
        .relay_bind("0.0.0.0:8210");
    if let Ok(value) = std::env::var(PUBLIC_RELAY_VAR) {
        match value.parse::<SocketAddr>() {
            Ok(addr) => builder = builder.relay_public_addr(addr),
            Err(e) => tracing::warn!(value = %value, error = %e, "ignoring {PUBLIC_RELAY_VAR}"),
        }
    }

    let server = builder.build().await?;
    let cancel = CancellationToken::new();
    let running = server.start(cancel.clone());

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
    tracing::info!("shutting down");
    cancel.cancel();
    if let Err(e) = running.task.await {
        tracing::error!(error = %e, "shutdown failed");
    }
    Ok(())
}
