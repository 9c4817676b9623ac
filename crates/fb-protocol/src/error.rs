//! Protocol-level error types.

use thiserror::Error;

/// Errors raised while encoding or decoding wire protocol structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The input ended before the structure was complete.
    ///
    /// The framing layer treats this as "wait for more bytes".
    #[error("incomplete data: needed {needed} more bytes")]
    Incomplete {
        /// Minimum number of additional bytes required.
        needed: usize,
    },

    /// A length prefix was negative or exceeded the allowed maximum.
    #[error("invalid length {length} (max {max})")]
    InvalidLength {
        /// Length read from the wire.
        length: i64,
        /// Maximum accepted length.
        max: usize,
    },

    /// An operation code that is not valid at this point of the exchange.
    #[error("unexpected operation code {0}")]
    UnexpectedOperation(i32),

    /// An unknown operation code.
    #[error("unknown operation code {0}")]
    UnknownOperation(i32),

    /// A value could not be represented in its declared wire type or length.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// An info or status buffer did not follow its grammar.
    #[error("malformed {what}: {detail}")]
    Malformed {
        /// Structure being parsed.
        what: &'static str,
        /// Description of the inconsistency.
        detail: String,
    },

    /// A row frame arrived but no row shape was installed to decode it.
    #[error("row data received without a row description")]
    MissingRowShape,
}

impl ProtocolError {
    /// Shorthand for a [`ProtocolError::Malformed`] error.
    pub fn malformed(what: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            detail: detail.into(),
        }
    }

    /// Returns `true` if more input could complete the structure.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }
}
