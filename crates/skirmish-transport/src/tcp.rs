//! TCP listener that spawns a connection actor per accepted socket.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::{ConnectionConfig, ConnectionHandle, EventSink, Framing, TransportError, spawn_actor};

/// A bound TCP listener.
pub struct TcpTransport {
    listener: TcpListener,
    config: ConnectionConfig,
}

impl TcpTransport {
    /// Binds a new TCP transport to the given address.
    pub async fn bind(addr: &str, config: ConnectionConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "TCP transport listening");
        Ok(Self { listener, config })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for the next connection and starts its actor.
    ///
    /// `sink` receives the open, frame and close events of this one
    /// connection; callers may share a single sink across connections or
    /// build a fresh one per accept.
    pub async fn accept<F, K>(&self, framing: F, sink: Arc<K>) -> Result<ConnectionHandle, TransportError>
    where
        F: Framing,
        K: EventSink<F::Frame>,
    {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%addr, error = %e, "could not disable Nagle");
        }

        Ok(spawn_actor(stream, addr, framing, sink, self.config.clone()))
    }
}
