//! Client error types.

use fb_codec::CodecError;
use fb_protocol::{ProtocolError, ProtocolVersion, ServerStatus};
use thiserror::Error;

/// Errors that can occur during client operations.
///
/// Transport, malformed-response and negotiation failures are fatal: the
/// connection refuses further use afterwards. Server-reported failures leave
/// the connection and, unless documented otherwise, the handle usable.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Client and server have no protocol in common.
    #[error("protocol negotiation failed: {reason}")]
    ProtocolNegotiationFailed {
        /// Why the server's answer was not usable.
        reason: String,
    },

    /// Socket failure or timeout.
    #[error("{operation} failed: {source}")]
    Transport {
        /// Operation in progress.
        operation: &'static str,
        /// Underlying transport error.
        #[source]
        source: CodecError,
    },

    /// The server sent something the protocol grammar does not allow.
    #[error("malformed response to {operation}: {detail}")]
    MalformedResponse {
        /// Operation in progress.
        operation: &'static str,
        /// What was wrong.
        detail: String,
    },

    /// The server returned an error status.
    #[error("{operation} failed{}: {status}", on_handle(.handle))]
    Server {
        /// Operation in progress.
        operation: &'static str,
        /// Handle the operation was issued on.
        handle: Option<i32>,
        /// Status vector returned by the server.
        status: ServerStatus,
    },

    /// A value cannot be represented on the wire.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The handle is not in a state that allows the operation.
    #[error("cannot {operation} {handle} in state {state}")]
    InvalidState {
        /// Kind of handle.
        handle: &'static str,
        /// Current state.
        state: &'static str,
        /// Rejected operation.
        operation: &'static str,
    },

    /// The negotiated protocol does not support the operation.
    #[error("{feature} is not supported by {version}")]
    Unsupported {
        /// Missing feature.
        feature: &'static str,
        /// Negotiated protocol version.
        version: ProtocolVersion,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

fn on_handle(handle: &Option<i32>) -> String {
    handle.map(|h| format!(" on handle {h}")).unwrap_or_default()
}

impl Error {
    pub(crate) fn transport(operation: &'static str, source: CodecError) -> Self {
        match source {
            CodecError::Protocol(e) => Self::protocol(operation, e),
            source => Self::Transport { operation, source },
        }
    }

    pub(crate) fn protocol(operation: &'static str, error: ProtocolError) -> Self {
        match error {
            ProtocolError::Encoding(msg) => Self::Encoding(msg),
            other => Self::MalformedResponse {
                operation,
                detail: other.to_string(),
            },
        }
    }

    pub(crate) fn malformed(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::MalformedResponse {
            operation,
            detail: detail.into(),
        }
    }

    /// Attach the handle id to a server error.
    #[must_use]
    pub(crate) fn with_handle(self, id: i32) -> Self {
        match self {
            Self::Server {
                operation, status, ..
            } => Self::Server {
                operation,
                handle: Some(id),
                status,
            },
            other => other,
        }
    }

    /// Check if the connection is unusable after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::MalformedResponse { .. }
                | Self::ProtocolNegotiationFailed { .. }
        )
    }

    /// Check if this error is a timeout of the transport.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_timeout())
    }

    /// Check if this is a server error carrying `code`.
    #[must_use]
    pub fn is_server_error(&self, code: i32) -> bool {
        matches!(self, Self::Server { status, .. } if status.has_code(code))
    }

    /// First error code of a server error.
    #[must_use]
    pub fn error_code(&self) -> Option<i32> {
        match self {
            Self::Server { status, .. } => status.error_code(),
            _ => None,
        }
    }

    /// SQLSTATE of a server error, if the server sent one.
    #[must_use]
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Server { status, .. } => status.sql_state(),
            _ => None,
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::protocol("decode", e)
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
