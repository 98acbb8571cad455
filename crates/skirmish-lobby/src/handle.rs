//! Talking to the coordinator from other tasks.

use std::sync::Arc;
use std::time::Duration;

use skirmish_protocol::Message;
use skirmish_tick::TickScheduler;
use skirmish_transport::{ConnectionHandle, ConnectionId, EventSink};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Coordinator, CoordinatorStatus, Event, LobbyError};

/// Cheap-to-clone sender into the coordinator's event queue.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl CoordinatorHandle {
    /// An [`EventSink`] that forwards lobby connection events.
    pub fn sink(&self) -> Arc<CoordinatorSink> {
        Arc::new(CoordinatorSink {
            tx: self.tx.clone(),
        })
    }

    /// Queues a tick, as the timer task would.
    pub fn tick(&self) -> Result<(), LobbyError> {
        self.tx.send(Event::Tick).map_err(|_| LobbyError::Unavailable)
    }

    /// Runs `work` on the coordinator task, in queue order, and returns
    /// its result.
    pub async fn exclusive<R, F>(&self, work: F) -> Result<R, LobbyError>
    where
        F: FnOnce(&mut Coordinator) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Event::Exclusive(Box::new(move |coordinator| {
                let _ = reply_tx.send(work(coordinator));
            })))
            .map_err(|_| LobbyError::Unavailable)?;
        reply_rx.await.map_err(|_| LobbyError::Unavailable)
    }

    /// A snapshot of peer, lobby and battle counts.
    pub async fn status(&self) -> Result<CoordinatorStatus, LobbyError> {
        self.exclusive(|c| c.status()).await
    }
}

/// Forwards a lobby connection's lifecycle into the coordinator's queue.
pub struct CoordinatorSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink<Message> for CoordinatorSink {
    fn on_open(&self, conn: ConnectionHandle) {
        if let Err(mpsc::error::SendError(Event::Connected { handle })) =
            self.tx.send(Event::Connected { handle: conn })
        {
            tracing::warn!(id = %handle.id(), "coordinator gone, refusing connection");
            handle.close();
        }
    }

    fn on_frame(&self, id: ConnectionId, msg: Message) {
        let _ = self.tx.send(Event::Message { id, msg });
    }

    fn on_closed(&self, id: ConnectionId) {
        let _ = self.tx.send(Event::Disconnected { id });
    }
}

/// Starts the coordinator task and, unless its tick period is zero, the
/// timer task feeding it ticks. Both stop when `cancel` fires.
pub fn spawn_coordinator(
    coordinator: Coordinator,
    cancel: CancellationToken,
) -> (CoordinatorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = CoordinatorHandle { tx };

    let period = coordinator.config().tick_period;
    if !period.is_zero() {
        spawn_timer(handle.clone(), period, cancel.clone());
    }

    let task = tokio::spawn(coordinator.run(rx, cancel));
    (handle, task)
}

fn spawn_timer(handle: CoordinatorHandle, period: Duration, cancel: CancellationToken) {
    let mut scheduler = TickScheduler::every(period);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = scheduler.wait_for_tick() => {
                    if handle.tick().is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("coordinator timer stopped");
    });
}
