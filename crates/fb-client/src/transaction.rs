//! Transaction support.
//!
//! This module provides the transaction parameters sent on start and the
//! [`Transaction`] handle with its commit, rollback and two-phase prepare
//! exchanges.

use std::time::Duration;

use bytes::Bytes;
use fb_protocol::{Argument, Operation, ProtocolVersion};

use crate::database::Database;
use crate::error::{Error, Result};
use crate::protocol::TransactionExchange;
use crate::state::TransactionState;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Snapshot of the database at transaction start.
    #[default]
    Concurrency,

    /// Snapshot with table-level locks on the tables read.
    Consistency,

    /// Sees changes committed by other transactions.
    ReadCommitted {
        /// Read the latest committed version instead of waiting for
        /// uncommitted ones.
        record_version: bool,
    },
}

/// What to do when a record is locked by another transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResolution {
    /// Wait for the lock, at most `timeout` when set.
    Wait {
        /// Lock timeout, `None` to wait indefinitely.
        timeout: Option<Duration>,
    },
    /// Fail immediately.
    NoWait,
}

impl Default for LockResolution {
    fn default() -> Self {
        Self::Wait { timeout: None }
    }
}

/// Parameters of a new transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct TransactionOptions {
    /// Isolation level.
    pub isolation: IsolationLevel,
    /// Read-only access.
    pub read_only: bool,
    /// Lock conflict handling.
    pub lock_resolution: LockResolution,
    /// Commit after every statement.
    pub autocommit: bool,
    /// Extra parameters appended verbatim, in order.
    pub extra_parameters: Vec<Argument>,
}

impl TransactionOptions {
    /// Default options: concurrency, read-write, wait.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level.
    #[must_use]
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Set read-only access.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set the lock resolution.
    #[must_use]
    pub fn lock_resolution(mut self, resolution: LockResolution) -> Self {
        self.lock_resolution = resolution;
        self
    }

    /// Set autocommit.
    #[must_use]
    pub fn autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    /// Append an extra parameter.
    #[must_use]
    pub fn extra_parameter(mut self, argument: Argument) -> Self {
        self.extra_parameters.push(argument);
        self
    }
}

/// A started transaction.
///
/// Commit and rollback take `&mut self`, so they cannot run while a blob
/// opened under the transaction is alive. A server failure on commit,
/// rollback or prepare leaves the transaction in the state it had before, so
/// the call can be retried.
pub struct Transaction<'db> {
    database: &'db Database,
    handle: i32,
    state: TransactionState,
    exchange: &'static dyn TransactionExchange,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(
        database: &'db Database,
        handle: i32,
        state: TransactionState,
        exchange: &'static dyn TransactionExchange,
    ) -> Self {
        Self {
            database,
            handle,
            state,
            exchange,
        }
    }

    /// Server handle.
    #[must_use]
    pub fn handle(&self) -> i32 {
        self.handle
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Protocol version whose exchanges this transaction uses.
    #[must_use]
    pub fn origin(&self) -> ProtocolVersion {
        self.exchange.origin()
    }

    pub(crate) fn database(&self) -> &'db Database {
        self.database
    }

    pub(crate) fn ensure_usable(&self, operation: &'static str) -> Result<()> {
        if self.state.is_usable() {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            handle: "transaction",
            state: self.state.name(),
            operation,
        }
    }

    /// Commit and end the transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.end(Operation::Commit, TransactionState::Committing, TransactionState::Ended)
            .await
    }

    /// Roll back and end the transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.end(Operation::Rollback, TransactionState::RollingBack, TransactionState::Ended)
            .await
    }

    /// Commit and keep the transaction context open.
    pub async fn commit_retaining(&mut self) -> Result<()> {
        self.end(
            Operation::CommitRetaining,
            TransactionState::Committing,
            TransactionState::Active,
        )
        .await
    }

    /// Roll back and keep the transaction context open.
    pub async fn rollback_retaining(&mut self) -> Result<()> {
        self.end(
            Operation::RollbackRetaining,
            TransactionState::RollingBack,
            TransactionState::Active,
        )
        .await
    }

    /// First phase of a two-phase commit.
    ///
    /// `message` is stored with the prepared transaction for recovery tools.
    pub async fn prepare(&mut self, message: Option<&[u8]>) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(self.invalid_state("prepare transaction"));
        }
        let message = message.map(Bytes::copy_from_slice).unwrap_or_default();
        self.transition(TransactionState::Preparing);

        let result = {
            let mut channel = self.database.channel().await;
            self.exchange.prepare(&mut channel, self.handle, message).await
        };
        match result {
            Ok(()) => {
                self.transition(TransactionState::Prepared);
                Ok(())
            }
            Err(e) => {
                self.transition(TransactionState::Active);
                Err(e)
            }
        }
    }

    async fn end(
        &mut self,
        operation: Operation,
        pending: TransactionState,
        done: TransactionState,
    ) -> Result<()> {
        if !self.state.can_end() {
            return Err(self.invalid_state(match operation {
                Operation::Commit => "commit",
                Operation::Rollback => "rollback",
                Operation::CommitRetaining => "commit retaining",
                _ => "rollback retaining",
            }));
        }
        let previous = self.state;
        self.transition(pending);

        let result = {
            let mut channel = self.database.channel().await;
            self.exchange.end(&mut channel, self.handle, operation).await
        };
        match result {
            Ok(()) => {
                self.transition(done);
                Ok(())
            }
            Err(e) => {
                self.transition(previous);
                Err(e)
            }
        }
    }

    fn transition(&mut self, state: TransactionState) {
        tracing::debug!(
            handle = self.handle,
            from = %self.state,
            to = %state,
            "transaction state"
        );
        self.state = state;
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state.is_usable() {
            tracing::warn!(
                handle = self.handle,
                state = %self.state,
                "transaction dropped without commit or rollback"
            );
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("origin", &self.exchange.origin())
            .finish_non_exhaustive()
    }
}
