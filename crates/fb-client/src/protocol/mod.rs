//! Per-version exchange strategies.
//!
//! A protocol version is described by a [`ProtocolFamily`]: one strategy per
//! group of wire exchanges. A newer version overrides only the exchanges
//! whose wire behaviour changed and points the others at the strategy of
//! the version that introduced them:
//!
//! | exchange      | v10 | v11 | v12 |
//! |---------------|-----|-----|-----|
//! | database      | v10 | v10 | v12 |
//! | transaction   | v10 | v10 | v10 |
//! | statement     | v10 | v11 | v11 |
//! | execution     | v10 | v10 | v10 |
//! | blob          | v10 | v10 | v10 |
//! | parameters    | v10 | v10 | v10 |
//!
//! Every strategy reports the version that introduced it through `origin()`.

use async_trait::async_trait;
use bytes::Bytes;
use fb_codec::CancelHandle;
use fb_protocol::{Operation, ParameterBuffer, ProtocolVersion, Row, StatementDescription};

use crate::blob::BlobOptions;
use crate::channel::{BoxedTransport, Channel};
use crate::config::ConnectionOptions;
use crate::error::Result;
use crate::transaction::TransactionOptions;

pub mod v10;
pub mod v11;
pub mod v12;

/// Database-level exchanges.
#[async_trait]
pub trait DatabaseExchange: Send + Sync {
    /// Protocol version that introduced this strategy.
    fn origin(&self) -> ProtocolVersion;

    /// `op_attach`; returns the database handle.
    async fn attach(&self, channel: &mut Channel, database: &str, dpb: Bytes) -> Result<i32>;

    /// `op_info_database`; returns the raw info response.
    async fn info(
        &self,
        channel: &mut Channel,
        database: i32,
        items: Bytes,
        buffer_length: i32,
    ) -> Result<Bytes>;

    /// `op_detach`.
    async fn detach(&self, channel: &mut Channel, database: i32) -> Result<()>;

    /// `op_cancel`, sent outside the request/response discipline.
    async fn cancel(&self, canceller: &CancelHandle<BoxedTransport>, kind: i32) -> Result<()>;
}

/// Transaction exchanges.
#[async_trait]
pub trait TransactionExchange: Send + Sync {
    /// Protocol version that introduced this strategy.
    fn origin(&self) -> ProtocolVersion;

    /// `op_transaction`; returns the transaction handle.
    async fn start(&self, channel: &mut Channel, database: i32, tpb: Bytes) -> Result<i32>;

    /// `op_prepare2`.
    async fn prepare(&self, channel: &mut Channel, transaction: i32, message: Bytes) -> Result<()>;

    /// `op_commit`, `op_rollback`, `op_commit_retaining` or
    /// `op_rollback_retaining`.
    async fn end(&self, channel: &mut Channel, transaction: i32, operation: Operation) -> Result<()>;
}

/// A statement text to prepare.
#[derive(Debug, Clone)]
pub struct PrepareRequest<'a> {
    /// Database handle, used when the statement is not yet allocated.
    pub database: i32,
    /// Statement handle, `None` when not yet allocated.
    pub statement: Option<i32>,
    /// Transaction handle.
    pub transaction: i32,
    /// Client dialect number.
    pub dialect: i32,
    /// Statement text.
    pub sql: &'a str,
}

/// Outcome of a successful prepare.
#[derive(Debug, Clone)]
pub struct Prepared {
    /// Statement handle.
    pub statement: i32,
    /// Statement type and columns.
    pub description: StatementDescription,
}

/// Statement lifecycle exchanges.
#[async_trait]
pub trait StatementExchange: Send + Sync {
    /// Protocol version that introduced this strategy.
    fn origin(&self) -> ProtocolVersion;

    /// `op_allocate_statement`; returns the statement handle.
    async fn allocate(&self, channel: &mut Channel, database: i32) -> Result<i32>;

    /// `op_prepare_statement` plus describe continuations.
    ///
    /// Allocates the statement first when `request.statement` is `None`.
    /// A server failure on allocation is reported as such; a failure on
    /// prepare carries the allocated handle in [`PrepareError`].
    async fn prepare(
        &self,
        channel: &mut Channel,
        request: PrepareRequest<'_>,
    ) -> std::result::Result<Prepared, PrepareError>;

    /// `op_free_statement` with `DSQL_close` or `DSQL_drop`.
    async fn free(&self, channel: &mut Channel, statement: i32, option: i32) -> Result<()>;
}

/// A failed prepare, with the statement handle if one was allocated.
#[derive(Debug)]
pub struct PrepareError {
    /// Handle allocated before the failure.
    pub statement: Option<i32>,
    /// The failure.
    pub error: crate::error::Error,
}

impl From<crate::error::Error> for PrepareError {
    fn from(error: crate::error::Error) -> Self {
        Self {
            statement: None,
            error,
        }
    }
}

/// An execute request.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    /// Statement handle.
    pub statement: i32,
    /// Transaction handle.
    pub transaction: i32,
    /// BLR of the input message.
    pub input_blr: Bytes,
    /// Encoded input row.
    pub input: Bytes,
    /// BLR of the output message when a singleton row is expected.
    pub output_blr: Option<Bytes>,
}

/// Rows returned by one fetch round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchBatch {
    /// Rows in cursor order.
    pub rows: Vec<Row>,
    /// Whether the cursor is exhausted.
    pub eof: bool,
}

/// Execution exchanges.
#[async_trait]
pub trait ExecutionExchange: Send + Sync {
    /// Protocol version that introduced this strategy.
    fn origin(&self) -> ProtocolVersion;

    /// `op_execute` or `op_execute2`; returns the singleton row of the
    /// latter.
    async fn execute(&self, channel: &mut Channel, request: ExecuteRequest) -> Result<Option<Row>>;

    /// `op_fetch`; reads one batch of `op_fetch_response` messages.
    async fn fetch(
        &self,
        channel: &mut Channel,
        statement: i32,
        blr: Bytes,
        fetch_size: i32,
    ) -> Result<FetchBatch>;
}

/// What `op_get_segment` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    /// Whole segments were returned.
    Complete,
    /// The last segment continues in the next call.
    Partial,
    /// No more data.
    Eof,
}

/// Data returned by one `op_get_segment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Segment bytes, concatenated.
    pub data: Bytes,
    /// Status of the blob after the call.
    pub status: SegmentStatus,
}

/// Blob exchanges.
#[async_trait]
pub trait BlobExchange: Send + Sync {
    /// Protocol version that introduced this strategy.
    fn origin(&self) -> ProtocolVersion;

    /// `op_create_blob2`; returns the blob handle and the new blob id.
    async fn create(
        &self,
        channel: &mut Channel,
        transaction: i32,
        bpb: Bytes,
    ) -> Result<(i32, i64)>;

    /// `op_open_blob2`; returns the blob handle.
    async fn open(
        &self,
        channel: &mut Channel,
        transaction: i32,
        bpb: Bytes,
        blob_id: i64,
    ) -> Result<i32>;

    /// `op_get_segment`.
    async fn get_segment(
        &self,
        channel: &mut Channel,
        blob: i32,
        max_length: i32,
    ) -> Result<Segment>;

    /// `op_put_segment`, split into segments the server accepts.
    async fn put_segment(&self, channel: &mut Channel, blob: i32, data: &[u8]) -> Result<()>;

    /// `op_close_blob` or `op_cancel_blob`.
    async fn release(&self, channel: &mut Channel, blob: i32, operation: Operation) -> Result<()>;
}

/// Builds the parameter buffers a protocol version sends.
pub trait ParameterBufferEncoder: Send + Sync {
    /// Protocol version that introduced this strategy.
    fn origin(&self) -> ProtocolVersion;

    /// Database parameter buffer for `op_attach`.
    fn database_buffer(&self, options: &ConnectionOptions) -> ParameterBuffer;

    /// Transaction parameter buffer for `op_transaction`.
    fn transaction_buffer(&self, options: &TransactionOptions) -> ParameterBuffer;

    /// Blob parameter buffer for `op_create_blob2` and `op_open_blob2`.
    fn blob_buffer(&self, options: &BlobOptions) -> ParameterBuffer;

    /// User identification buffer for `op_connect`.
    fn identification_buffer(&self, user: Option<&str>, host: &str) -> ParameterBuffer;
}

/// The exchange strategies of one protocol version.
#[derive(Clone, Copy)]
pub struct ProtocolFamily {
    /// Family name for logging.
    pub name: &'static str,
    /// Database exchanges.
    pub database: &'static dyn DatabaseExchange,
    /// Transaction exchanges.
    pub transaction: &'static dyn TransactionExchange,
    /// Statement lifecycle exchanges.
    pub statement: &'static dyn StatementExchange,
    /// Execute and fetch exchanges.
    pub execution: &'static dyn ExecutionExchange,
    /// Blob exchanges.
    pub blob: &'static dyn BlobExchange,
    /// Parameter buffer encoding.
    pub parameters: &'static dyn ParameterBufferEncoder,
}

impl std::fmt::Debug for ProtocolFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolFamily")
            .field("name", &self.name)
            .field("database", &self.database.origin())
            .field("transaction", &self.transaction.origin())
            .field("statement", &self.statement.origin())
            .field("execution", &self.execution.origin())
            .field("blob", &self.blob.origin())
            .field("parameters", &self.parameters.origin())
            .finish()
    }
}

/// Protocol version 10.
pub static VERSION_10: ProtocolFamily = ProtocolFamily {
    name: "version 10",
    database: &v10::V10Database,
    transaction: &v10::V10Transaction,
    statement: &v10::V10Statement,
    execution: &v10::V10Execution,
    blob: &v10::V10Blob,
    parameters: &v10::V10Parameters,
};

/// Protocol version 11: deferred statement allocation and cursor close.
pub static VERSION_11: ProtocolFamily = ProtocolFamily {
    name: "version 11",
    database: &v10::V10Database,
    transaction: &v10::V10Transaction,
    statement: &v11::V11Statement,
    execution: &v10::V10Execution,
    blob: &v10::V10Blob,
    parameters: &v10::V10Parameters,
};

/// Protocol version 12: adds `op_cancel`.
pub static VERSION_12: ProtocolFamily = ProtocolFamily {
    name: "version 12",
    database: &v12::V12Database,
    transaction: &v10::V10Transaction,
    statement: &v11::V11Statement,
    execution: &v10::V10Execution,
    blob: &v10::V10Blob,
    parameters: &v10::V10Parameters,
};
