//! Codec-level error types.

use std::time::Duration;

use fb_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by the framing and transport layer.
///
/// Every variant except [`CodecError::Protocol`] with an encoding cause
/// leaves the connection unusable.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Socket read or write failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// More bytes were buffered than any valid frame can hold.
    #[error("frame too large: {size} bytes buffered (max {max})")]
    FrameTooLarge {
        /// Bytes buffered so far.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// An operation did not finish in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What timed out.
        operation: &'static str,
        /// Configured timeout.
        after: Duration,
    },

    /// A previous failure left the connection in an undefined state.
    #[error("connection is broken by an earlier failure")]
    Broken,
}

impl CodecError {
    /// Returns `true` for timeouts.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
