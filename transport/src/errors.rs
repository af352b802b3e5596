use dbgp_codec::FramingError;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// An operation that needs a live socket was attempted without one.
    #[error("no live connection to the engine")]
    NotConnected,
    #[error("socket error: {0}")]
    Connection(#[from] std::io::Error),
    #[error("stream closed by the engine")]
    Closed,
    #[error(transparent)]
    Framing(#[from] FramingError),
    /// The reply was readable as a frame but not as the expected XML shape.
    #[error("malformed response: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether the current connection is unusable after this error.
    ///
    /// Protocol errors are scoped to one reply; everything else means the
    /// socket or framing state cannot be trusted any more.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_are_recoverable() {
        assert!(!TransportError::Protocol("missing attribute".into()).is_fatal());
    }

    #[test]
    fn connection_errors_are_fatal() {
        assert!(TransportError::NotConnected.is_fatal());
        assert!(TransportError::Closed.is_fatal());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(TransportError::Connection(io).is_fatal());
        assert!(TransportError::Framing(FramingError::LengthMismatch {
            declared: 4,
            actual: 5
        })
        .is_fatal());
    }
}
