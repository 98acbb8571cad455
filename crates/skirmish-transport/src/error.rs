/// Errors that can occur in the transport layer.
///
/// Read and write failures never surface here: they end the connection,
/// and the owner learns about it through [`EventSink::on_closed`](crate::EventSink::on_closed).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection is closed or closing; nothing more can be sent.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Binding the listener, or accepting from it, failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The inbound bytes can never be framed again.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_failed_keeps_io_source() {
        let err = TransportError::AcceptFailed(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "taken",
        ));
        assert_eq!(err.to_string(), "accept failed: taken");
        assert!(std::error::Error::source(&err).is_some());
    }
}
