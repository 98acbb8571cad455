//! The connection actor: read, dispatch and write duties for one socket.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{ConnectionId, EventSink, Framing, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Deadlines and buffer sizes for a connection actor.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// A read that makes no progress for this long tears the connection down.
    pub read_timeout: Duration,
    /// A flush that cannot complete within this long tears the connection down.
    pub write_timeout: Duration,
    /// Size of the scratch buffer handed to each socket read.
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(180),
            write_timeout: Duration::from_secs(10),
            read_buffer_size: 4096,
        }
    }
}

/// State shared between the three duties and every [`ConnectionHandle`].
struct Shared {
    id: ConnectionId,
    peer_addr: SocketAddr,
    /// Unbounded: a stalled peer grows this until its write deadline fires.
    outbound: Mutex<BytesMut>,
    write_ready: Notify,
    close_after_flush: AtomicBool,
    cancel: CancellationToken,
}

/// Handle to a running connection actor.
///
/// Cheap to clone. Sending only appends to the outbound buffer and wakes
/// the write duty, so it never blocks and can be called from synchronous
/// code such as the coordinator's event handlers.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Returns the connection's unique ID.
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Returns the remote address of the socket.
    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer_addr
    }

    /// Queues bytes for the write duty.
    ///
    /// # Errors
    /// Returns [`TransportError::ConnectionClosed`] once teardown started
    /// (including after [`close_after_flush`](Self::close_after_flush)).
    pub fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.shared.cancel.is_cancelled()
            || self.shared.close_after_flush.load(Ordering::Acquire)
        {
            return Err(TransportError::ConnectionClosed(format!(
                "{} is shutting down",
                self.shared.id
            )));
        }
        self.shared.outbound.lock().extend_from_slice(data);
        self.shared.write_ready.notify_one();
        Ok(())
    }

    /// Tears the connection down immediately, dropping unsent bytes.
    pub fn close(&self) {
        self.shared.cancel.cancel();
    }

    /// Refuses further sends, flushes what is queued, then tears down.
    pub fn close_after_flush(&self) {
        self.shared.close_after_flush.store(true, Ordering::Release);
        self.shared.write_ready.notify_one();
    }

    /// Returns `true` once teardown has started.
    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Resolves when teardown starts.
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await;
    }

    /// Number of bytes queued but not yet written.
    pub fn pending_outbound(&self) -> usize {
        self.shared.outbound.lock().len()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.shared.id)
            .field("peer_addr", &self.shared.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Spawns the actor for `stream` and returns a handle to it.
///
/// `sink.on_open` runs before this returns, so an owner that forwards
/// events into a queue sees the open event ahead of any frame.
pub fn spawn_actor<S, F, K>(
    stream: S,
    peer_addr: SocketAddr,
    framing: F,
    sink: Arc<K>,
    config: ConnectionConfig,
) -> ConnectionHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    F: Framing,
    K: EventSink<F::Frame>,
{
    let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
    let shared = Arc::new(Shared {
        id,
        peer_addr,
        outbound: Mutex::new(BytesMut::new()),
        write_ready: Notify::new(),
        close_after_flush: AtomicBool::new(false),
        cancel: CancellationToken::new(),
    });
    let handle = ConnectionHandle {
        shared: Arc::clone(&shared),
    };

    sink.on_open(handle.clone());
    tracing::debug!(%id, %peer_addr, "connection actor started");

    let (reader, writer) = tokio::io::split(stream);
    tokio::spawn(async move {
        let inbound = Mutex::new(BytesMut::with_capacity(config.read_buffer_size));
        let dispatch_ready = Notify::new();
        let read_done = AtomicBool::new(false);

        tokio::join!(
            read_duty(reader, &shared, &inbound, &dispatch_ready, &read_done, &config),
            dispatch_duty(framing, &shared, &inbound, &dispatch_ready, &read_done, sink.as_ref()),
            write_duty(writer, &shared, &config),
        );

        tracing::debug!(%id, "connection actor stopped");
        sink.on_closed(id);
    });

    handle
}

/// Ends on EOF, a read error or the read deadline by handing over to the
/// dispatch duty, which decodes what is left and then starts teardown.
async fn read_duty<R>(
    mut reader: R,
    shared: &Shared,
    inbound: &Mutex<BytesMut>,
    dispatch_ready: &Notify,
    read_done: &AtomicBool,
    config: &ConnectionConfig,
) where
    R: AsyncRead + Unpin,
{
    let id = shared.id;
    let mut scratch = vec![0u8; config.read_buffer_size.max(1)];

    loop {
        let read = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            r = tokio::time::timeout(config.read_timeout, reader.read(&mut scratch)) => r,
        };

        match read {
            Ok(Ok(0)) => {
                tracing::debug!(%id, "peer closed the connection");
                break;
            }
            Ok(Ok(n)) => {
                inbound.lock().extend_from_slice(&scratch[..n]);
                dispatch_ready.notify_one();
            }
            Ok(Err(e)) => {
                tracing::debug!(%id, error = %e, "read failed");
                break;
            }
            Err(_) => {
                tracing::info!(%id, "read deadline elapsed");
                break;
            }
        }
    }

    read_done.store(true, Ordering::Release);
    dispatch_ready.notify_one();
}

async fn dispatch_duty<F, K>(
    mut framing: F,
    shared: &Shared,
    inbound: &Mutex<BytesMut>,
    dispatch_ready: &Notify,
    read_done: &AtomicBool,
    sink: &K,
) where
    F: Framing,
    K: EventSink<F::Frame>,
{
    let id = shared.id;

    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            _ = dispatch_ready.notified() => {}
        }

        // Loaded before decoding: every byte read before EOF is then in `inbound`.
        let finished = read_done.load(Ordering::Acquire);
        let mut frames = Vec::new();
        let mut failure = None;
        {
            let mut buf = inbound.lock();
            loop {
                match framing.decode(&mut buf) {
                    Ok(Some(frame)) => frames.push(frame),
                    Ok(None) => break,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        for frame in frames {
            // Nothing is delivered once teardown has started.
            if shared.cancel.is_cancelled() {
                return;
            }
            sink.on_frame(id, frame);
        }

        if let Some(e) = failure {
            tracing::warn!(%id, error = %e, "dropping connection");
            shared.cancel.cancel();
            break;
        }

        if finished {
            shared.cancel.cancel();
            break;
        }
    }
}

async fn write_duty<W>(mut writer: W, shared: &Shared, config: &ConnectionConfig)
where
    W: AsyncWrite + Unpin,
{
    let id = shared.id;

    'outer: loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = shared.write_ready.notified() => {}
        }

        loop {
            let pending = {
                let mut out = shared.outbound.lock();
                if out.is_empty() {
                    break;
                }
                out.split().freeze()
            };

            let written = tokio::select! {
                _ = shared.cancel.cancelled() => break 'outer,
                r = tokio::time::timeout(config.write_timeout, writer.write_all(&pending)) => r,
            };
            match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(%id, error = %e, "write failed");
                    break 'outer;
                }
                Err(_) => {
                    tracing::info!(%id, queued = pending.len(), "write deadline elapsed");
                    break 'outer;
                }
            }
        }

        if shared.close_after_flush.load(Ordering::Acquire) {
            break;
        }
    }

    shared.cancel.cancel();
    let _ = tokio::time::timeout(config.write_timeout, writer.shutdown()).await;
}
