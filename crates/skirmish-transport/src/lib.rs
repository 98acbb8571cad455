//! Connection plumbing for Skirmish.
//!
//! Every accepted socket is driven by a **connection actor**: three
//! cooperating duties running on one Tokio task.
//!
//! - **read**: deadline-bounded socket reads into an inbound buffer
//! - **dispatch**: slices the inbound buffer into frames with a
//!   [`Framing`] and hands each frame to the owner's [`EventSink`]
//! - **write**: flushes the outbound buffer filled by
//!   [`ConnectionHandle::send`]
//!
//! The duties signal each other with single-permit [`tokio::sync::Notify`]
//! values and share one cancellation token. When the peer hangs up, the
//! frames already read are still delivered before teardown. Whatever the
//! cause of teardown, the sink sees exactly one `on_closed` call.
//!
//! ```text
//! socket ─read─▶ inbound ─dispatch─▶ EventSink (coordinator / relay room)
//! socket ◀─write─ outbound ◀─────── ConnectionHandle::send
//! ```

mod actor;
mod error;
mod tcp;

pub use actor::{ConnectionConfig, ConnectionHandle, spawn_actor};
pub use error::TransportError;
pub use tcp::TcpTransport;

use std::fmt;

use bytes::BytesMut;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Splits an inbound byte stream into frames.
///
/// `decode` is called repeatedly by the dispatch duty until it returns
/// `Ok(None)`. An implementation must consume exactly the bytes of the frame
/// it returns and leave any partial frame in `buf` untouched, so the next
/// read can complete it.
pub trait Framing: Send + 'static {
    /// The decoded unit handed to the [`EventSink`].
    type Frame: Send + 'static;

    /// Tries to take one complete frame off the front of `buf`.
    ///
    /// # Errors
    /// Returns [`TransportError::MalformedFrame`] when the stream can never
    /// be framed again (the connection is torn down).
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Frame>, TransportError>;
}

/// Receives the lifecycle of a connection: open, frames, close.
///
/// Called from the connection's own task, so implementations must not
/// block. The usual implementation forwards into a channel owned by a
/// single-threaded consumer.
pub trait EventSink<F>: Send + Sync + 'static {
    /// The actor is running and `conn` can be used to send. Always called
    /// before the first `on_frame`.
    fn on_open(&self, conn: ConnectionHandle) {
        let _ = conn;
    }

    /// A complete frame arrived.
    fn on_frame(&self, id: ConnectionId, frame: F);

    /// The connection is gone. Called exactly once, after every duty exited.
    fn on_closed(&self, id: ConnectionId);
}
