//! Error types for the controller client.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// How the resilience policy treats a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection refused or host unreachable. Retried a bounded number of times.
    Unreachable,
    /// The per-call deadline fired.
    DeadlineExceeded,
    /// Handshake, broken pipe, reset, unimplemented or empty response. Always retried.
    TransportTransient,
    /// Anything else.
    Unclassified,
}

/// A failure raised by a single transport attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("TLS handshake with {peer} failed: {message}")]
    Handshake { peer: String, message: String },

    #[error("connection reset by {0}")]
    ConnectionReset(String),

    #[error("broken pipe to {0}")]
    BrokenPipe(String),

    #[error("procedure not implemented by controller: {0}")]
    Unimplemented(String),

    #[error("empty response for {0}")]
    EmptyResponse(String),

    #[error("controller answered {procedure} with HTTP {status}")]
    Status { procedure: String, status: u16 },

    #[error("controller reported an error for {procedure}: {message}")]
    Remote { procedure: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error talking to {peer}: {source}")]
    Io {
        peer: String,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// Classify this failure for the retry policy.
    pub fn kind(&self) -> FailureKind {
        match self {
            TransportError::ConnectionRefused(_) | TransportError::HostUnreachable(_) => {
                FailureKind::Unreachable
            }
            TransportError::DeadlineExceeded(_) => FailureKind::DeadlineExceeded,
            TransportError::Handshake { .. }
            | TransportError::ConnectionReset(_)
            | TransportError::BrokenPipe(_)
            | TransportError::Unimplemented(_)
            | TransportError::EmptyResponse(_) => FailureKind::TransportTransient,
            TransportError::Status { .. }
            | TransportError::Remote { .. }
            | TransportError::Protocol(_)
            | TransportError::Io { .. } => FailureKind::Unclassified,
        }
    }

    /// Map a socket-level error onto the transport taxonomy.
    pub fn from_io(err: io::Error, peer: &str) -> Self {
        let peer = peer.to_string();
        match err.kind() {
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(peer),
            io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
                TransportError::HostUnreachable(peer)
            }
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                TransportError::ConnectionReset(peer)
            }
            io::ErrorKind::BrokenPipe => TransportError::BrokenPipe(peer),
            _ => TransportError::Io { peer, source: err },
        }
    }
}

/// Errors surfaced to callers of the client.
///
/// Retryable transport failures never show up here: the executor absorbs
/// them. What remains is fatal, a cancellation, or a local problem.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("controller at {target} unreachable after {attempts} attempts ({operation})")]
    NodeUnreachable {
        operation: &'static str,
        target: String,
        attempts: u32,
    },

    #[error("controller at {target} rejected the shared secret")]
    AuthenticationFailed { target: String },

    #[error("{operation} against {target} failed: {source}")]
    Fatal {
        operation: &'static str,
        target: String,
        #[source]
        source: TransportError,
    },

    #[error("{operation} failed and the failure was tolerated")]
    Tolerated { operation: &'static str },

    #[error("{operation} cancelled by shutdown signal")]
    Cancelled { operation: &'static str },

    #[error("could not decode {operation} response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Whether this error is one of the fatal outcomes routed to the fatal sink.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::NodeUnreachable { .. }
                | ClientError::AuthenticationFailed { .. }
                | ClientError::Fatal { .. }
                | ClientError::Decode { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_and_unreachable_are_bounded() {
        let refused = TransportError::from_io(io::ErrorKind::ConnectionRefused.into(), "10.0.0.1:17443");
        assert_eq!(refused.kind(), FailureKind::Unreachable);

        let unreachable = TransportError::from_io(io::ErrorKind::HostUnreachable.into(), "10.0.0.1:17443");
        assert_eq!(unreachable.kind(), FailureKind::Unreachable);

        let network = TransportError::from_io(io::ErrorKind::NetworkUnreachable.into(), "10.0.0.1:17443");
        assert_eq!(network.kind(), FailureKind::Unreachable);
    }

    #[test]
    fn pipe_and_reset_are_transient() {
        for kind in [
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
        ] {
            let err = TransportError::from_io(kind.into(), "peer");
            assert_eq!(err.kind(), FailureKind::TransportTransient, "{kind:?}");
        }
    }

    #[test]
    fn other_io_errors_are_unclassified() {
        let err = TransportError::from_io(io::ErrorKind::PermissionDenied.into(), "peer");
        assert_eq!(err.kind(), FailureKind::Unclassified);
        assert!(err.to_string().contains("peer"));
    }

    #[test]
    fn protocol_level_classification() {
        assert_eq!(
            TransportError::Unimplemented("status".into()).kind(),
            FailureKind::TransportTransient
        );
        assert_eq!(
            TransportError::EmptyResponse("status".into()).kind(),
            FailureKind::TransportTransient
        );
        assert_eq!(
            TransportError::Status { procedure: "status".into(), status: 500 }.kind(),
            FailureKind::Unclassified
        );
        assert_eq!(
            TransportError::DeadlineExceeded(Duration::from_secs(10)).kind(),
            FailureKind::DeadlineExceeded
        );
    }

    #[test]
    fn fatal_errors() {
        let unreachable = ClientError::NodeUnreachable {
            operation: "get_status",
            target: "10.0.0.1:17443".into(),
            attempts: 6,
        };
        assert!(unreachable.is_fatal());
        assert!(ClientError::AuthenticationFailed { target: "x".into() }.is_fatal());
        assert!(ClientError::Decode { operation: "get_status", message: "x".into() }.is_fatal());
        assert!(!ClientError::Cancelled { operation: "get_status" }.is_fatal());
        assert!(!ClientError::Tolerated { operation: "get_status" }.is_fatal());
    }
}
