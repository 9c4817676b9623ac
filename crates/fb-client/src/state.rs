//! Handle state machines.
//!
//! Every handle moves between states only when the server confirmed the
//! corresponding exchange.
//!
//! ## State Transitions
//!
//! ```text
//! Transaction:
//!   Active -> Preparing -> Prepared            (prepare)
//!   Active|Prepared -> Committing -> Ended     (commit)
//!   Active|Prepared -> RollingBack -> Ended    (rollback)
//!   Committing|RollingBack -> previous state   (server failure)
//!
//! Statement:
//!   New -> Allocated                           (allocate)
//!   New|Allocated|Prepared -> Prepared         (prepare)
//!   Prepared -> CursorOpen                     (execute of a cursor statement)
//!   CursorOpen -> Prepared                     (close cursor)
//!   any -> Errored                             (transport or protocol failure)
//!   any -> Closed                              (free)
//!
//! Input blob:   New -> Open -> Eof -> Closed
//! Output blob:  New -> Open -> Closed
//! ```

use std::fmt;

/// State of a transaction handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Started and usable.
    Active,
    /// Two-phase prepare in flight.
    Preparing,
    /// Prepared for two-phase commit.
    Prepared,
    /// Commit in flight.
    Committing,
    /// Rollback in flight.
    RollingBack,
    /// Committed or rolled back.
    Ended,
}

impl TransactionState {
    /// State name used in error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Committing => "committing",
            Self::RollingBack => "rolling back",
            Self::Ended => "ended",
        }
    }

    /// Whether commit or rollback may be issued.
    #[must_use]
    pub fn can_end(self) -> bool {
        matches!(self, Self::Active | Self::Prepared)
    }

    /// Whether statements and blobs may use the transaction.
    #[must_use]
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Active | Self::Prepared)
    }
}

/// State of a statement handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementState {
    /// Created locally, nothing sent yet.
    New,
    /// Server handle allocated.
    Allocated,
    /// Prepared and described.
    Prepared,
    /// Executed with an open cursor.
    CursorOpen,
    /// Freed.
    Closed,
    /// A fatal failure left the server-side state unknown.
    Errored,
}

impl StatementState {
    /// State name used in error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Allocated => "allocated",
            Self::Prepared => "prepared",
            Self::CursorOpen => "cursor open",
            Self::Closed => "closed",
            Self::Errored => "errored",
        }
    }

    /// Whether a statement text may be prepared.
    #[must_use]
    pub fn can_prepare(self) -> bool {
        matches!(self, Self::New | Self::Allocated | Self::Prepared)
    }
}

/// State of a blob handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobState {
    /// Created locally, not yet opened on the server.
    New,
    /// Open for reading or writing.
    Open,
    /// All segments were read.
    Eof,
    /// Closed or cancelled.
    Closed,
}

impl BlobState {
    /// State name used in error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Open => "open",
            Self::Eof => "at end",
            Self::Closed => "closed",
        }
    }
}

macro_rules! display_name {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        })*
    };
}

display_name!(TransactionState, StatementState, BlobState);
