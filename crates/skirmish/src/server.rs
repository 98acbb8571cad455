//! `SkirmishServer` builder and server loop.
//!
//! Ties the tiers together: the lobby listener feeds the coordinator, the
//! coordinator publishes hand-offs, and the relay listeners (TCP and UDP
//! on the same port) admit battle participants by those hand-offs.

use std::net::SocketAddr;
use std::sync::Arc;

use skirmish_handoff::{HandoffConfig, HandoffStore, MemoryHandoffStore, spawn_sweeper};
use skirmish_lobby::{
    Coordinator, CoordinatorConfig, CoordinatorHandle, MemoryPersistence, Persistence,
    RelayAllocator, StaticRelay, spawn_coordinator,
};
use skirmish_protocol::{BincodeCodec, MessageFraming};
use skirmish_relay::{DatagramConfig, DatagramRelay, RelayHub, StreamRelay};
use skirmish_transport::{ConnectionConfig, TcpTransport, TransportError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::SkirmishError;

/// Builder for configuring and starting a Skirmish server.
///
/// # Example
///
/// ```rust,no_run
/// use skirmish::SkirmishServer;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo() -> Result<(), skirmish::SkirmishError> {
/// let server = SkirmishServer::builder()
///     .lobby_bind("0.0.0.0:8200")
///     .relay_bind("0.0.0.0:8210")
///     .relay_public_addr("203.0.113.7:8210".parse().unwrap())
///     .build()
///     .await?;
/// server.run(CancellationToken::new()).await;
/// # Ok(())
/// # }
/// ```
pub struct SkirmishServerBuilder {
    lobby_addr: String,
    relay_addr: String,
    relay_public_addr: Option<SocketAddr>,
    connection: ConnectionConfig,
    coordinator: CoordinatorConfig,
    handoff: HandoffConfig,
    datagram: DatagramConfig,
    persistence: Option<Arc<dyn Persistence>>,
    allocator: Option<Arc<dyn RelayAllocator>>,
}

impl SkirmishServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            lobby_addr: "127.0.0.1:8200".to_string(),
            relay_addr: "127.0.0.1:8210".to_string(),
            relay_public_addr: None,
            connection: ConnectionConfig::default(),
            coordinator: CoordinatorConfig::default(),
            handoff: HandoffConfig::default(),
            datagram: DatagramConfig::default(),
            persistence: None,
            allocator: None,
        }
    }

    /// Address of the lobby listener.
    pub fn lobby_bind(mut self, addr: &str) -> Self {
        self.lobby_addr = addr.to_string();
        self
    }

    /// Address of the relay listeners. TCP and UDP share it.
    pub fn relay_bind(mut self, addr: &str) -> Self {
        self.relay_addr = addr.to_string();
        self
    }

    /// Relay address announced to clients in battle notices. Defaults to
    /// the bound relay address, which is only reachable if it is not a
    /// wildcard.
    pub fn relay_public_addr(mut self, addr: SocketAddr) -> Self {
        self.relay_public_addr = Some(addr);
        self
    }

    /// Deadlines of lobby and stream relay connections.
    pub fn connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }

    pub fn coordinator_config(mut self, config: CoordinatorConfig) -> Self {
        self.coordinator = config;
        self
    }

    pub fn handoff_config(mut self, config: HandoffConfig) -> Self {
        self.handoff = config;
        self
    }

    pub fn datagram_config(mut self, config: DatagramConfig) -> Self {
        self.datagram = config;
        self
    }

    /// Account and battle storage. Defaults to [`MemoryPersistence`].
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Relay resolution. Overrides [`relay_public_addr`](Self::relay_public_addr).
    pub fn allocator(mut self, allocator: Arc<dyn RelayAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Binds every listener.
    pub async fn build(self) -> Result<SkirmishServer, SkirmishError> {
        let lobby = TcpTransport::bind(&self.lobby_addr, self.connection.clone()).await?;
        let lobby_addr = lobby.local_addr().map_err(TransportError::AcceptFailed)?;
        let relay_stream = TcpTransport::bind(&self.relay_addr, self.connection).await?;
        let relay_addr = relay_stream
            .local_addr()
            .map_err(TransportError::AcceptFailed)?;

        let handoff: Arc<dyn HandoffStore> = Arc::new(MemoryHandoffStore::new(self.handoff.clone()));
        let hub = Arc::new(RelayHub::new(Arc::clone(&handoff)));
        let relay_datagram = DatagramRelay::bind(
            &relay_addr.to_string(),
            Arc::clone(&hub),
            BincodeCodec,
            self.datagram,
        )
        .await?;

        let announced = self.relay_public_addr.unwrap_or(relay_addr);
        let allocator: Arc<dyn RelayAllocator> = match self.allocator {
            Some(allocator) => allocator,
            None => Arc::new(StaticRelay::new(announced)),
        };
        let persistence: Arc<dyn Persistence> = match self.persistence {
            Some(persistence) => persistence,
            None => Arc::new(MemoryPersistence::new()),
        };
        let coordinator = Coordinator::new(self.coordinator, persistence, allocator, Arc::clone(&handoff));

        Ok(SkirmishServer {
            lobby,
            lobby_addr,
            relay_stream,
            relay_datagram,
            relay_addr,
            coordinator,
            handoff,
            handoff_config: self.handoff,
            hub,
        })
    }
}

impl Default for SkirmishServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound, not yet running, Skirmish server.
pub struct SkirmishServer {
    lobby: TcpTransport,
    lobby_addr: SocketAddr,
    relay_stream: TcpTransport,
    relay_datagram: DatagramRelay<BincodeCodec>,
    relay_addr: SocketAddr,
    coordinator: Coordinator,
    handoff: Arc<dyn HandoffStore>,
    handoff_config: HandoffConfig,
    hub: Arc<RelayHub>,
}

/// A started server.
pub struct RunningServer {
    /// Reaches the coordinator, e.g. for [`CoordinatorHandle::status`].
    pub coordinator: CoordinatorHandle,
    /// Finishes once every task of the server has stopped.
    pub task: JoinHandle<()>,
}

impl SkirmishServer {
    /// Creates a new builder.
    pub fn builder() -> SkirmishServerBuilder {
        SkirmishServerBuilder::new()
    }

    /// Address of the lobby listener.
    pub fn lobby_addr(&self) -> SocketAddr {
        self.lobby_addr
    }

    /// Address of the relay listeners (TCP and UDP).
    pub fn relay_addr(&self) -> SocketAddr {
        self.relay_addr
    }

    /// The hand-off registry shared by lobby and relay.
    pub fn handoff(&self) -> Arc<dyn HandoffStore> {
        Arc::clone(&self.handoff)
    }

    /// Starts every task. They all stop when `cancel` fires.
    pub fn start(self, cancel: CancellationToken) -> RunningServer {
        let (coordinator, coordinator_task) = spawn_coordinator(self.coordinator, cancel.clone());
        let sweeper = spawn_sweeper(Arc::clone(&self.handoff), &self.handoff_config, cancel.clone());

        let stream_relay = Arc::new(StreamRelay::new(Arc::clone(&self.hub)));
        let stream_task = tokio::spawn(stream_relay.serve(self.relay_stream, cancel.clone()));
        let datagram_task = tokio::spawn(Arc::new(self.relay_datagram).run(cancel.clone()));

        let lobby_task = tokio::spawn(serve_lobby(self.lobby, coordinator.clone(), cancel.clone()));

        tracing::info!(lobby = %self.lobby_addr, relay = %self.relay_addr, "skirmish server running");
        let hub = self.hub;
        let task = tokio::spawn(async move {
            cancel.cancelled().await;
            hub.close_all();
            for (name, task) in [
                ("lobby", lobby_task),
                ("coordinator", coordinator_task),
                ("sweeper", sweeper),
                ("stream relay", stream_task),
                ("datagram relay", datagram_task),
            ] {
                if let Err(e) = task.await {
                    tracing::error!(task = name, error = %e, "server task failed");
                }
            }
            tracing::info!("skirmish server stopped");
        });

        RunningServer { coordinator, task }
    }

    /// Runs until `cancel` fires and every task has stopped.
    pub async fn run(self, cancel: CancellationToken) {
        let running = self.start(cancel);
        if let Err(e) = running.task.await {
            tracing::error!(error = %e, "server supervisor failed");
        }
    }
}

/// Accepts lobby connections into the coordinator until `cancel` fires.
async fn serve_lobby(transport: TcpTransport, coordinator: CoordinatorHandle, cancel: CancellationToken) {
    let sink = coordinator.sink();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = transport.accept(MessageFraming, Arc::clone(&sink)) => match accepted {
                Ok(conn) => tracing::debug!(id = %conn.id(), peer = %conn.peer_addr(), "lobby connection"),
                Err(e) => tracing::warn!(error = %e, "lobby accept failed"),
            },
        }
    }
    tracing::debug!("lobby listener stopped");
}
