//! Statement handles.
//!
//! A statement is prepared against a transaction, executed with raw
//! parameter values and, when it opens a cursor, fetched in batches of the
//! configured fetch size. Input and output messages are derived from the
//! describe information with the type-length calculator of the database's
//! current dialect, on every prepare.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use fb_protocol::consts::free;
use fb_protocol::{
    FieldDescription, ProtocolVersion, Row, RowDescriptor, RowShape, StatementDescription,
    StatementType, TypeLengthCalculator,
};

use crate::database::Database;
use crate::error::{Error, Result};
use crate::protocol::{ExecuteRequest, ExecutionExchange, PrepareRequest, StatementExchange};
use crate::query::FinalizedQuery;
use crate::state::StatementState;
use crate::transaction::Transaction;

/// BLR and XDR shape of one message.
#[derive(Debug, Clone, Default)]
struct Message {
    blr: Bytes,
    shape: RowShape,
}

impl Message {
    fn describe(calculator: &TypeLengthCalculator, fields: &[FieldDescription]) -> Result<Self> {
        let row: RowDescriptor = fields.iter().map(|f| f.descriptor.clone()).collect();
        Ok(Self {
            blr: calculator.blr(&row)?,
            shape: calculator.row_shape(&row)?,
        })
    }
}

/// A statement handle.
pub struct Statement<'db> {
    database: &'db Database,
    lifecycle: &'static dyn StatementExchange,
    execution: &'static dyn ExecutionExchange,
    handle: Option<i32>,
    state: StatementState,
    description: Option<StatementDescription>,
    input: Message,
    output: Message,
    returns_generated_keys: bool,
    fetch_size: i32,
    rows: VecDeque<Row>,
    eof: bool,
}

impl<'db> Statement<'db> {
    pub(crate) fn new(
        database: &'db Database,
        lifecycle: &'static dyn StatementExchange,
        execution: &'static dyn ExecutionExchange,
        fetch_size: i32,
    ) -> Self {
        Self {
            database,
            lifecycle,
            execution,
            handle: None,
            state: StatementState::New,
            description: None,
            input: Message::default(),
            output: Message::default(),
            returns_generated_keys: false,
            fetch_size,
            rows: VecDeque::new(),
            eof: false,
        }
    }

    /// Server handle, once allocated.
    #[must_use]
    pub fn handle(&self) -> Option<i32> {
        self.handle
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> StatementState {
        self.state
    }

    /// Description of the prepared statement.
    #[must_use]
    pub fn description(&self) -> Option<&StatementDescription> {
        self.description.as_ref()
    }

    /// Kind of the prepared statement.
    #[must_use]
    pub fn statement_type(&self) -> Option<StatementType> {
        self.description.as_ref().and_then(StatementDescription::kind)
    }

    /// Whether the prepared text returns generated keys.
    #[must_use]
    pub fn returns_generated_keys(&self) -> bool {
        self.returns_generated_keys
    }

    /// Protocol version of the allocate, prepare and free exchanges.
    #[must_use]
    pub fn origin(&self) -> ProtocolVersion {
        self.lifecycle.origin()
    }

    /// Protocol version of the execute and fetch exchanges.
    #[must_use]
    pub fn execution_origin(&self) -> ProtocolVersion {
        self.execution.origin()
    }

    /// BLR of the input message of the prepared statement.
    #[must_use]
    pub fn input_blr(&self) -> &Bytes {
        &self.input.blr
    }

    /// BLR of the output message of the prepared statement.
    #[must_use]
    pub fn output_blr(&self) -> &Bytes {
        &self.output.blr
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            handle: "statement",
            state: self.state.name(),
            operation,
        }
    }

    fn require_handle(&self, operation: &'static str) -> Result<i32> {
        self.handle.ok_or_else(|| self.invalid_state(operation))
    }

    fn fail(&mut self, error: Error) -> Error {
        if error.is_fatal() {
            tracing::debug!(handle = ?self.handle, error = %error, "statement errored");
            self.state = StatementState::Errored;
        }
        error
    }

    /// Send `op_allocate_statement` now instead of with the first prepare.
    pub async fn allocate(&mut self) -> Result<()> {
        if self.state != StatementState::New {
            return Err(self.invalid_state("allocate statement"));
        }
        let database = self.database.attached_handle("allocate statement")?;
        let result = {
            let mut channel = self.database.channel().await;
            self.lifecycle.allocate(&mut channel, database).await
        };
        match result {
            Ok(handle) => {
                tracing::debug!(handle, "statement allocated");
                self.handle = Some(handle);
                self.state = StatementState::Allocated;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Prepare `query` and derive the input and output messages.
    ///
    /// An open cursor is closed first. On a server failure the statement
    /// keeps its previous state and description. When the server's
    /// description cannot be encoded in the connection dialect, the
    /// statement falls back to `Allocated` without a description.
    pub async fn prepare(
        &mut self,
        transaction: &Transaction<'_>,
        query: impl FinalizedQuery,
    ) -> Result<()> {
        if self.state == StatementState::CursorOpen {
            self.close_cursor().await?;
        }
        if !self.state.can_prepare() {
            return Err(self.invalid_state("prepare"));
        }
        transaction.ensure_usable("prepare")?;
        let database = self.database.attached_handle("prepare")?;
        let calculator = self.database.type_length_calculator();
        let request = PrepareRequest {
            database,
            statement: self.handle,
            transaction: transaction.handle(),
            dialect: calculator.dialect().number(),
            sql: query.sql(),
        };

        let result = {
            let mut channel = self.database.channel().await;
            self.lifecycle.prepare(&mut channel, request).await
        };
        let prepared = match result {
            Ok(prepared) => prepared,
            Err(failure) => {
                if let Some(handle) = failure.statement {
                    self.handle = Some(handle);
                    if self.state == StatementState::New {
                        self.state = StatementState::Allocated;
                    }
                }
                return Err(self.fail(failure.error));
            }
        };

        self.handle = Some(prepared.statement);
        let description = prepared.description;
        let messages = Message::describe(&calculator, &description.parameters).and_then(|input| {
            Message::describe(&calculator, &description.fields).map(|output| (input, output))
        });
        let (input, output) = match messages {
            Ok(messages) => messages,
            Err(e) => {
                // the server now holds the new text
                tracing::debug!(handle = prepared.statement, error = %e, "description not usable");
                self.description = None;
                self.input = Message::default();
                self.output = Message::default();
                self.rows.clear();
                self.eof = false;
                self.state = StatementState::Allocated;
                return Err(self.fail(e));
            }
        };
        self.input = input;
        self.output = output;
        tracing::debug!(
            handle = prepared.statement,
            statement_type = ?description.kind(),
            parameters = description.parameters.len(),
            fields = description.fields.len(),
            "statement prepared"
        );
        self.description = Some(description);
        self.returns_generated_keys = query.returns_generated_keys();
        self.rows.clear();
        self.eof = false;
        self.state = StatementState::Prepared;
        Ok(())
    }

    /// Execute with one raw value per parameter, `None` for null.
    ///
    /// An open cursor is closed first. Returns the output row of statements
    /// that produce a singleton result, such as `EXECUTE PROCEDURE` or DML
    /// with `RETURNING`.
    pub async fn execute(
        &mut self,
        transaction: &Transaction<'_>,
        parameters: &[Option<Bytes>],
    ) -> Result<Option<Row>> {
        if self.state == StatementState::CursorOpen {
            self.close_cursor().await?;
        }
        if self.state != StatementState::Prepared {
            return Err(self.invalid_state("execute"));
        }
        transaction.ensure_usable("execute")?;
        let statement = self.require_handle("execute")?;

        let mut input = BytesMut::new();
        self.input.shape.encode(parameters, &mut input)?;

        let kind = self.statement_type();
        let singleton = kind == Some(StatementType::ExecProcedure) && !self.output.shape.is_empty();
        let request = ExecuteRequest {
            statement,
            transaction: transaction.handle(),
            input_blr: self.input.blr.clone(),
            input: input.freeze(),
            output_blr: singleton.then(|| self.output.blr.clone()),
        };

        let result = {
            let mut channel = self.database.channel().await;
            if singleton {
                channel.set_row_shape(Some(self.output.shape.clone()));
            }
            self.execution.execute(&mut channel, request).await
        };
        match result {
            Ok(row) => {
                if kind.is_some_and(StatementType::has_cursor) {
                    tracing::debug!(handle = statement, "cursor opened");
                    self.rows.clear();
                    self.eof = false;
                    self.state = StatementState::CursorOpen;
                }
                Ok(row)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Next row of the open cursor, `None` at the end.
    pub async fn fetch(&mut self) -> Result<Option<Row>> {
        if self.state != StatementState::CursorOpen {
            return Err(self.invalid_state("fetch"));
        }
        if let Some(row) = self.rows.pop_front() {
            return Ok(Some(row));
        }
        if self.eof {
            return Ok(None);
        }
        let statement = self.require_handle("fetch")?;

        let result = {
            let mut channel = self.database.channel().await;
            channel.set_row_shape(Some(self.output.shape.clone()));
            self.execution
                .fetch(&mut channel, statement, self.output.blr.clone(), self.fetch_size)
                .await
        };
        match result {
            Ok(batch) => {
                self.eof = batch.eof;
                self.rows.extend(batch.rows);
                Ok(self.rows.pop_front())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// All remaining rows of the open cursor.
    pub async fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Close the open cursor, keeping the statement prepared.
    ///
    /// Does nothing when no cursor is open.
    pub async fn close_cursor(&mut self) -> Result<()> {
        if self.state != StatementState::CursorOpen {
            return Ok(());
        }
        let statement = self.require_handle("close cursor")?;
        let result = {
            let mut channel = self.database.channel().await;
            self.lifecycle
                .free(&mut channel, statement, free::DSQL_CLOSE)
                .await
        };
        match result {
            Ok(()) => {
                tracing::debug!(handle = statement, "cursor closed");
                self.rows.clear();
                self.eof = false;
                self.state = StatementState::Prepared;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Drop the server statement.
    pub async fn close(&mut self) -> Result<()> {
        let Some(statement) = self.handle else {
            self.state = StatementState::Closed;
            return Ok(());
        };
        if self.state == StatementState::Closed {
            return Ok(());
        }
        let result = {
            let mut channel = self.database.channel().await;
            self.lifecycle
                .free(&mut channel, statement, free::DSQL_DROP)
                .await
        };
        match result {
            Ok(()) => {
                tracing::debug!(handle = statement, "statement dropped");
                self.state = StatementState::Closed;
                self.handle = None;
                self.description = None;
                self.rows.clear();
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }
}

impl std::fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("statement_type", &self.statement_type())
            .field("buffered_rows", &self.rows.len())
            .field("eof", &self.eof)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use fb_protocol::{Dialect, SqlType, TypeDescriptor, XdrShape};

    fn field(descriptor: TypeDescriptor) -> FieldDescription {
        FieldDescription {
            descriptor,
            field_name: String::new(),
            alias: String::new(),
            relation: String::new(),
            relation_alias: String::new(),
            owner: String::new(),
        }
    }

    #[test]
    fn test_message_from_fields() {
        let calculator = TypeLengthCalculator::new(Dialect::V3);
        let message = Message::describe(
            &calculator,
            &[
                field(TypeDescriptor::new(SqlType::Long)),
                field(TypeDescriptor::varying(10)),
            ],
        )
        .unwrap();
        assert_eq!(
            message.shape.fields(),
            &[XdrShape::Fixed(4), XdrShape::Varying(10)]
        );
        assert_eq!(&message.blr[..3], &[5, 2, 4]);
    }

    #[test]
    fn test_empty_message() {
        let calculator = TypeLengthCalculator::new(Dialect::V3);
        let message = Message::describe(&calculator, &[]).unwrap();
        assert!(message.blr.is_empty());
        assert!(message.shape.is_empty());
    }
}
