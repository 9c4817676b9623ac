//! Protocol version 10 exchanges.
//!
//! Every request is answered before the next one is sent.

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use fb_codec::CancelHandle;
use fb_protocol::consts::{bpb, cnct, dpb, fetch, segment, tpb};
use fb_protocol::info::describe_items;
use fb_protocol::{
    DescribeParser, DescribeProgress, Frame, Operation, ParameterBuffer, ParameterBufferKind,
    ProtocolVersion, Request, Row, StatementDescription,
};

use super::{
    BlobExchange, DatabaseExchange, ExecuteRequest, ExecutionExchange, FetchBatch,
    ParameterBufferEncoder, PrepareError, PrepareRequest, Prepared, Segment, SegmentStatus,
    StatementExchange, TransactionExchange,
};
use crate::blob::BlobOptions;
use crate::channel::{BoxedTransport, Channel};
use crate::config::ConnectionOptions;
use crate::error::{Error, Result};
use crate::transaction::{IsolationLevel, LockResolution, TransactionOptions};

/// Size of the response buffer requested for describe information.
pub const DESCRIBE_BUFFER_LENGTH: i32 = 32_000;

/// Database exchanges of version 10.
#[derive(Debug, Clone, Copy, Default)]
pub struct V10Database;

#[async_trait]
impl DatabaseExchange for V10Database {
    fn origin(&self) -> ProtocolVersion {
        ProtocolVersion::V10
    }

    async fn attach(&self, channel: &mut Channel, database: &str, dpb: Bytes) -> Result<i32> {
        let request = Request::Attach {
            database: database.to_string(),
            dpb,
        };
        let response = channel.exchange("attach", &request).await?;
        Ok(response.object)
    }

    async fn info(
        &self,
        channel: &mut Channel,
        database: i32,
        items: Bytes,
        buffer_length: i32,
    ) -> Result<Bytes> {
        let request = Request::InfoDatabase {
            database,
            items,
            buffer_length,
        };
        let response = channel
            .exchange("database info", &request)
            .await
            .map_err(|e| e.with_handle(database))?;
        Ok(response.data)
    }

    async fn detach(&self, channel: &mut Channel, database: i32) -> Result<()> {
        channel
            .exchange("detach", &Request::Detach { database })
            .await
            .map_err(|e| e.with_handle(database))?;
        Ok(())
    }

    async fn cancel(&self, _canceller: &CancelHandle<BoxedTransport>, _kind: i32) -> Result<()> {
        Err(Error::Unsupported {
            feature: "op_cancel",
            version: self.origin(),
        })
    }
}

/// Transaction exchanges of version 10.
#[derive(Debug, Clone, Copy, Default)]
pub struct V10Transaction;

#[async_trait]
impl TransactionExchange for V10Transaction {
    fn origin(&self) -> ProtocolVersion {
        ProtocolVersion::V10
    }

    async fn start(&self, channel: &mut Channel, database: i32, tpb: Bytes) -> Result<i32> {
        let response = channel
            .exchange("start transaction", &Request::StartTransaction { database, tpb })
            .await
            .map_err(|e| e.with_handle(database))?;
        Ok(response.object)
    }

    async fn prepare(&self, channel: &mut Channel, transaction: i32, message: Bytes) -> Result<()> {
        let request = Request::PrepareTransaction {
            transaction,
            message,
        };
        channel
            .exchange("prepare transaction", &request)
            .await
            .map_err(|e| e.with_handle(transaction))?;
        Ok(())
    }

    async fn end(&self, channel: &mut Channel, transaction: i32, operation: Operation) -> Result<()> {
        let name = match operation {
            Operation::Commit => "commit",
            Operation::Rollback => "rollback",
            Operation::CommitRetaining => "commit retaining",
            Operation::RollbackRetaining => "rollback retaining",
            other => {
                return Err(Error::Encoding(format!(
                    "{other:?} does not end a transaction"
                )));
            }
        };
        let request = Request::EndTransaction {
            operation,
            transaction,
        };
        channel
            .exchange(name, &request)
            .await
            .map_err(|e| e.with_handle(transaction))?;
        Ok(())
    }
}

/// Statement lifecycle exchanges of version 10.
#[derive(Debug, Clone, Copy, Default)]
pub struct V10Statement;

impl V10Statement {
    /// Send `op_prepare_statement` for an allocated statement and complete
    /// the description.
    pub(crate) async fn prepare_allocated(
        channel: &mut Channel,
        statement: i32,
        request: &PrepareRequest<'_>,
    ) -> Result<StatementDescription> {
        let prepare = prepare_request(statement, request);
        let response = channel
            .exchange("prepare", &prepare)
            .await
            .map_err(|e| e.with_handle(statement))?;
        describe(channel, statement, response.data).await
    }
}

pub(crate) fn prepare_request(statement: i32, request: &PrepareRequest<'_>) -> Request {
    Request::PrepareStatement {
        transaction: request.transaction,
        statement,
        dialect: request.dialect,
        sql: request.sql.to_string(),
        items: describe_items(),
        buffer_length: DESCRIBE_BUFFER_LENGTH,
    }
}

/// Feed describe responses to a parser, asking for the rest while the
/// server reports truncation.
pub(crate) async fn describe(
    channel: &mut Channel,
    statement: i32,
    first: Bytes,
) -> Result<StatementDescription> {
    let mut parser = DescribeParser::new();
    let mut data = first;
    loop {
        let progress = parser
            .feed(&data)
            .map_err(|e| channel.protocol_violation("prepare", e.to_string()))?;
        match progress {
            DescribeProgress::Complete => break,
            DescribeProgress::Continue(items) => {
                tracing::debug!(statement, "describe truncated, requesting more");
                let request = Request::InfoSql {
                    statement,
                    items,
                    buffer_length: DESCRIBE_BUFFER_LENGTH,
                };
                data = channel
                    .exchange("describe", &request)
                    .await
                    .map_err(|e| e.with_handle(statement))?
                    .data;
            }
        }
    }
    Ok(parser.finish())
}

#[async_trait]
impl StatementExchange for V10Statement {
    fn origin(&self) -> ProtocolVersion {
        ProtocolVersion::V10
    }

    async fn allocate(&self, channel: &mut Channel, database: i32) -> Result<i32> {
        let response = channel
            .exchange("allocate statement", &Request::AllocateStatement { database })
            .await
            .map_err(|e| e.with_handle(database))?;
        Ok(response.object)
    }

    async fn prepare(
        &self,
        channel: &mut Channel,
        request: PrepareRequest<'_>,
    ) -> std::result::Result<Prepared, PrepareError> {
        let statement = match request.statement {
            Some(handle) => handle,
            None => self.allocate(channel, request.database).await?,
        };
        match Self::prepare_allocated(channel, statement, &request).await {
            Ok(description) => Ok(Prepared {
                statement,
                description,
            }),
            Err(error) => Err(PrepareError {
                statement: Some(statement),
                error,
            }),
        }
    }

    async fn free(&self, channel: &mut Channel, statement: i32, option: i32) -> Result<()> {
        channel
            .exchange("free statement", &Request::FreeStatement { statement, option })
            .await
            .map_err(|e| e.with_handle(statement))?;
        Ok(())
    }
}

/// Execute and fetch exchanges of version 10.
#[derive(Debug, Clone, Copy, Default)]
pub struct V10Execution;

#[async_trait]
impl ExecutionExchange for V10Execution {
    fn origin(&self) -> ProtocolVersion {
        ProtocolVersion::V10
    }

    async fn execute(&self, channel: &mut Channel, request: ExecuteRequest) -> Result<Option<Row>> {
        let statement = request.statement;
        let singleton = request.output_blr.is_some();
        let operation = if singleton { "execute2" } else { "execute" };
        let execute = Request::Execute {
            statement,
            transaction: request.transaction,
            input_blr: request.input_blr,
            input: request.input,
            output_blr: request.output_blr,
        };
        channel.send(&[(operation, &execute)]).await?;

        let row = if singleton {
            match channel.receive(operation).await? {
                Frame::Sql(response) => response.row,
                Frame::Response(response) => {
                    // failure before any row was produced
                    channel
                        .check(operation, response)
                        .map_err(|e| e.with_handle(statement))?;
                    return Ok(None);
                }
                other => return Err(channel.unexpected(operation, &other)),
            }
        } else {
            None
        };

        channel
            .receive_response(operation)
            .await
            .map_err(|e| e.with_handle(statement))?;
        Ok(row)
    }

    async fn fetch(
        &self,
        channel: &mut Channel,
        statement: i32,
        blr: Bytes,
        fetch_size: i32,
    ) -> Result<FetchBatch> {
        let request = Request::Fetch {
            statement,
            blr,
            fetch_size,
        };
        channel.send(&[("fetch", &request)]).await?;

        let mut batch = FetchBatch::default();
        loop {
            match channel.receive("fetch").await? {
                Frame::Fetch(response) if response.count > 0 => match response.row {
                    Some(row) => batch.rows.push(row),
                    None => {
                        return Err(channel.protocol_violation("fetch", "row count without row"));
                    }
                },
                Frame::Fetch(response) => {
                    batch.eof = response.status == fetch::STATUS_EOF;
                    break;
                }
                Frame::Response(response) => {
                    channel
                        .check("fetch", response)
                        .map_err(|e| e.with_handle(statement))?;
                    return Err(channel.protocol_violation("fetch", "op_response without error"));
                }
                other => return Err(channel.unexpected("fetch", &other)),
            }
        }
        tracing::debug!(statement, rows = batch.rows.len(), eof = batch.eof, "fetched");
        Ok(batch)
    }
}

/// Blob exchanges of version 10.
#[derive(Debug, Clone, Copy, Default)]
pub struct V10Blob;

/// Split a `op_get_segment` response buffer into its payload.
///
/// The buffer holds segments as `u16le length, bytes`.
pub(crate) fn join_segments(mut data: &[u8]) -> std::result::Result<Bytes, String> {
    let mut joined = BytesMut::with_capacity(data.len());
    while data.has_remaining() {
        if data.remaining() < 2 {
            return Err("truncated segment length".into());
        }
        let len = usize::from(data.get_u16_le());
        if data.remaining() < len {
            return Err(format!(
                "segment of {len} bytes overruns response of {} bytes",
                data.remaining()
            ));
        }
        joined.extend_from_slice(&data[..len]);
        data.advance(len);
    }
    Ok(joined.freeze())
}

#[async_trait]
impl BlobExchange for V10Blob {
    fn origin(&self) -> ProtocolVersion {
        ProtocolVersion::V10
    }

    async fn create(
        &self,
        channel: &mut Channel,
        transaction: i32,
        bpb: Bytes,
    ) -> Result<(i32, i64)> {
        let response = channel
            .exchange("create blob", &Request::CreateBlob { bpb, transaction })
            .await
            .map_err(|e| e.with_handle(transaction))?;
        Ok((response.object, response.blob_id))
    }

    async fn open(
        &self,
        channel: &mut Channel,
        transaction: i32,
        bpb: Bytes,
        blob_id: i64,
    ) -> Result<i32> {
        let request = Request::OpenBlob {
            bpb,
            transaction,
            blob_id,
        };
        let response = channel
            .exchange("open blob", &request)
            .await
            .map_err(|e| e.with_handle(transaction))?;
        Ok(response.object)
    }

    async fn get_segment(
        &self,
        channel: &mut Channel,
        blob: i32,
        max_length: i32,
    ) -> Result<Segment> {
        let response = channel
            .exchange(
                "get segment",
                &Request::GetSegment {
                    blob,
                    length: max_length,
                },
            )
            .await
            .map_err(|e| e.with_handle(blob))?;

        let status = match response.object {
            segment::COMPLETE => SegmentStatus::Complete,
            segment::PARTIAL => SegmentStatus::Partial,
            segment::EOF => SegmentStatus::Eof,
            other => {
                return Err(channel.protocol_violation(
                    "get segment",
                    format!("unknown segment status {other}"),
                ));
            }
        };
        let data =
            join_segments(&response.data).map_err(|e| channel.protocol_violation("get segment", e))?;
        Ok(Segment { data, status })
    }

    async fn put_segment(&self, channel: &mut Channel, blob: i32, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(segment::MAX_SEGMENT_SIZE) {
            let request = Request::PutSegment {
                blob,
                data: Bytes::copy_from_slice(chunk),
            };
            channel
                .exchange("put segment", &request)
                .await
                .map_err(|e| e.with_handle(blob))?;
        }
        Ok(())
    }

    async fn release(&self, channel: &mut Channel, blob: i32, operation: Operation) -> Result<()> {
        let name = match operation {
            Operation::CloseBlob => "close blob",
            Operation::CancelBlob => "cancel blob",
            other => return Err(Error::Encoding(format!("{other:?} does not release a blob"))),
        };
        channel
            .exchange(name, &Request::ReleaseBlob { operation, blob })
            .await
            .map_err(|e| e.with_handle(blob))?;
        Ok(())
    }
}

/// Parameter buffers of version 10.
#[derive(Debug, Clone, Copy, Default)]
pub struct V10Parameters;

fn saturating_i32(value: u64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

impl ParameterBufferEncoder for V10Parameters {
    fn origin(&self) -> ProtocolVersion {
        ProtocolVersion::V10
    }

    fn database_buffer(&self, options: &ConnectionOptions) -> ParameterBuffer {
        let mut buffer = ParameterBuffer::new(ParameterBufferKind::Database);
        buffer.add_string(dpb::LC_CTYPE, options.encoding.clone());
        if let Some(pages) = options.page_cache_size {
            buffer.add_int(dpb::NUM_BUFFERS, saturating_i32(u64::from(pages)));
        }
        if let Some(user) = &options.user {
            buffer.add_string(dpb::USER_NAME, user.clone());
        }
        if let Some(password) = &options.password {
            buffer.add_string(dpb::PASSWORD, password.clone());
        }
        if let Some(role) = &options.role {
            buffer.add_string(dpb::SQL_ROLE_NAME, role.clone());
        }
        buffer.add_int(dpb::SQL_DIALECT, options.dialect.number());
        if let Some(timeout) = options.connect_timeout {
            buffer.add_int(dpb::CONNECT_TIMEOUT, saturating_i32(timeout.as_secs()));
        }
        buffer.extend(options.extra_parameters.iter().cloned());
        buffer
    }

    fn transaction_buffer(&self, options: &TransactionOptions) -> ParameterBuffer {
        let mut buffer = ParameterBuffer::new(ParameterBufferKind::Transaction);
        match options.isolation {
            IsolationLevel::Concurrency => {
                buffer.add_flag(tpb::CONCURRENCY);
            }
            IsolationLevel::Consistency => {
                buffer.add_flag(tpb::CONSISTENCY);
            }
            IsolationLevel::ReadCommitted { record_version } => {
                buffer.add_flag(tpb::READ_COMMITTED).add_flag(if record_version {
                    tpb::REC_VERSION
                } else {
                    tpb::NO_REC_VERSION
                });
            }
        }
        buffer.add_flag(if options.read_only { tpb::READ } else { tpb::WRITE });
        match options.lock_resolution {
            LockResolution::Wait { timeout } => {
                buffer.add_flag(tpb::WAIT);
                if let Some(timeout) = timeout {
                    buffer.add_int(tpb::LOCK_TIMEOUT, saturating_i32(timeout.as_secs()));
                }
            }
            LockResolution::NoWait => {
                buffer.add_flag(tpb::NOWAIT);
            }
        }
        if options.autocommit {
            buffer.add_flag(tpb::AUTOCOMMIT);
        }
        buffer.extend(options.extra_parameters.iter().cloned());
        buffer
    }

    fn blob_buffer(&self, options: &BlobOptions) -> ParameterBuffer {
        let mut buffer = ParameterBuffer::new(ParameterBufferKind::Blob);
        if options.stream {
            buffer.add_int(bpb::TYPE, bpb::TYPE_STREAM);
        }
        if let Some(source) = options.source_type {
            buffer.add_int(bpb::SOURCE_TYPE, i32::from(source));
        }
        if let Some(target) = options.target_type {
            buffer.add_int(bpb::TARGET_TYPE, i32::from(target));
        }
        if let Some(interp) = options.source_interp {
            buffer.add_int(bpb::SOURCE_INTERP, i32::from(interp));
        }
        if let Some(interp) = options.target_interp {
            buffer.add_int(bpb::TARGET_INTERP, i32::from(interp));
        }
        buffer
    }

    fn identification_buffer(&self, user: Option<&str>, host: &str) -> ParameterBuffer {
        let mut buffer = ParameterBuffer::new(ParameterBufferKind::ConnectIdentification);
        buffer
            .add_string(cnct::USER, user.unwrap_or_default())
            .add_string(cnct::HOST, host)
            .add_bytes(cnct::USER_VERIFICATION, Bytes::new());
        buffer
    }
}
