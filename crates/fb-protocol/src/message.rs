//! Request and response messages of the remote protocol.
//!
//! Every message starts with its operation code. Requests are encoded by the
//! client; responses are decoded one frame at a time by the codec. Row data
//! inside fetch and singleton responses can only be decoded with the row
//! shape of the statement that produced it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::consts::{CONNECT_VERSION2, Operation};
use crate::error::ProtocolError;
use crate::row::{Row, RowShape};
use crate::status::ServerStatus;
use crate::version::{Architecture, ProtocolFlags, ProtocolType, ProtocolVersion};
use crate::xdr;

/// One protocol the client offers in `op_connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolOffer {
    /// Protocol version.
    pub version: ProtocolVersion,
    /// Architecture.
    pub architecture: Architecture,
    /// Lowest acceptable protocol type.
    pub min_type: ProtocolType,
    /// Highest acceptable protocol type.
    pub max_type: ProtocolType,
    /// Preference among offers.
    pub weight: i32,
}

/// The `op_connect` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Database file name or alias.
    pub database: String,
    /// Serialized user identification buffer.
    pub user_identification: Bytes,
    /// Offered protocols, most preferred first.
    pub offers: Vec<ProtocolOffer>,
}

impl ConnectRequest {
    /// Encode the request.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        let count = i32::try_from(self.offers.len())
            .map_err(|_| ProtocolError::Encoding("too many protocol offers".into()))?;
        xdr::write_int(dst, Operation::Connect.code());
        xdr::write_int(dst, Operation::Attach.code());
        xdr::write_int(dst, CONNECT_VERSION2);
        xdr::write_int(dst, Architecture::Generic.code());
        xdr::write_string(dst, &self.database)?;
        xdr::write_int(dst, count);
        xdr::write_buffer(dst, &self.user_identification)?;
        for offer in &self.offers {
            xdr::write_int(dst, offer.version.into());
            xdr::write_int(dst, offer.architecture.code());
            xdr::write_int(dst, offer.min_type.code());
            xdr::write_int(dst, offer.max_type.code());
            xdr::write_int(dst, offer.weight);
        }
        Ok(())
    }
}

/// Client requests sent after the connection was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Request {
    /// `op_attach`.
    Attach {
        /// Database file name or alias.
        database: String,
        /// Serialized database parameter buffer.
        dpb: Bytes,
    },
    /// `op_detach`.
    Detach {
        /// Database handle.
        database: i32,
    },
    /// `op_info_database`.
    InfoDatabase {
        /// Database handle.
        database: i32,
        /// Requested items.
        items: Bytes,
        /// Size of the response buffer.
        buffer_length: i32,
    },
    /// `op_transaction`.
    StartTransaction {
        /// Database handle.
        database: i32,
        /// Serialized transaction parameter buffer.
        tpb: Bytes,
    },
    /// `op_commit`, `op_rollback`, `op_commit_retaining` or
    /// `op_rollback_retaining`.
    EndTransaction {
        /// One of the four transaction-ending operations.
        operation: Operation,
        /// Transaction handle.
        transaction: i32,
    },
    /// `op_prepare2`.
    PrepareTransaction {
        /// Transaction handle.
        transaction: i32,
        /// Message recorded with the prepared transaction.
        message: Bytes,
    },
    /// `op_allocate_statement`.
    AllocateStatement {
        /// Database handle.
        database: i32,
    },
    /// `op_prepare_statement`.
    PrepareStatement {
        /// Transaction handle.
        transaction: i32,
        /// Statement handle.
        statement: i32,
        /// Client dialect.
        dialect: i32,
        /// Statement text.
        sql: String,
        /// Describe items.
        items: Bytes,
        /// Size of the response buffer.
        buffer_length: i32,
    },
    /// `op_info_sql`.
    InfoSql {
        /// Statement handle.
        statement: i32,
        /// Requested items.
        items: Bytes,
        /// Size of the response buffer.
        buffer_length: i32,
    },
    /// `op_execute` or `op_execute2`.
    Execute {
        /// Statement handle.
        statement: i32,
        /// Transaction handle.
        transaction: i32,
        /// BLR of the input message.
        input_blr: Bytes,
        /// Encoded input row, empty when the statement has no parameters.
        input: Bytes,
        /// BLR of the output message, set for `op_execute2`.
        output_blr: Option<Bytes>,
    },
    /// `op_fetch`.
    Fetch {
        /// Statement handle.
        statement: i32,
        /// BLR of the output message.
        blr: Bytes,
        /// Rows to fetch in one batch.
        fetch_size: i32,
    },
    /// `op_free_statement`.
    FreeStatement {
        /// Statement handle.
        statement: i32,
        /// `DSQL_close` or `DSQL_drop`.
        option: i32,
    },
    /// `op_create_blob2`.
    CreateBlob {
        /// Serialized blob parameter buffer.
        bpb: Bytes,
        /// Transaction handle.
        transaction: i32,
    },
    /// `op_open_blob2`.
    OpenBlob {
        /// Serialized blob parameter buffer.
        bpb: Bytes,
        /// Transaction handle.
        transaction: i32,
        /// Blob id.
        blob_id: i64,
    },
    /// `op_get_segment`.
    GetSegment {
        /// Blob handle.
        blob: i32,
        /// Largest number of bytes to return.
        length: i32,
    },
    /// `op_put_segment`.
    PutSegment {
        /// Blob handle.
        blob: i32,
        /// Segment data.
        data: Bytes,
    },
    /// `op_close_blob` or `op_cancel_blob`.
    ReleaseBlob {
        /// `CloseBlob` or `CancelBlob`.
        operation: Operation,
        /// Blob handle.
        blob: i32,
    },
    /// `op_cancel`.
    Cancel {
        /// Cancel kind.
        kind: i32,
    },
    /// `op_dummy`.
    Dummy,
}

impl Request {
    /// Operation code of the request.
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::Attach { .. } => Operation::Attach,
            Self::Detach { .. } => Operation::Detach,
            Self::InfoDatabase { .. } => Operation::InfoDatabase,
            Self::StartTransaction { .. } => Operation::Transaction,
            Self::EndTransaction { operation, .. } | Self::ReleaseBlob { operation, .. } => {
                *operation
            }
            Self::PrepareTransaction { .. } => Operation::Prepare2,
            Self::AllocateStatement { .. } => Operation::AllocateStatement,
            Self::PrepareStatement { .. } => Operation::PrepareStatement,
            Self::InfoSql { .. } => Operation::InfoSql,
            Self::Execute {
                output_blr: Some(_),
                ..
            } => Operation::Execute2,
            Self::Execute { .. } => Operation::Execute,
            Self::Fetch { .. } => Operation::Fetch,
            Self::FreeStatement { .. } => Operation::FreeStatement,
            Self::CreateBlob { .. } => Operation::CreateBlob2,
            Self::OpenBlob { .. } => Operation::OpenBlob2,
            Self::GetSegment { .. } => Operation::GetSegment,
            Self::PutSegment { .. } => Operation::PutSegment,
            Self::Cancel { .. } => Operation::Cancel,
            Self::Dummy => Operation::Dummy,
        }
    }

    /// Encode the request.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        xdr::write_int(dst, self.operation().code());
        match self {
            Self::Attach { database, dpb } => {
                xdr::write_int(dst, 0);
                xdr::write_string(dst, database)?;
                xdr::write_buffer(dst, dpb)?;
            }
            Self::Detach { database } | Self::AllocateStatement { database } => {
                xdr::write_int(dst, *database);
            }
            Self::InfoDatabase {
                database,
                items,
                buffer_length,
            } => {
                xdr::write_int(dst, *database);
                xdr::write_int(dst, 0);
                xdr::write_buffer(dst, items)?;
                xdr::write_int(dst, *buffer_length);
            }
            Self::StartTransaction { database, tpb } => {
                xdr::write_int(dst, *database);
                xdr::write_buffer(dst, tpb)?;
            }
            Self::EndTransaction { transaction, .. } => xdr::write_int(dst, *transaction),
            Self::PrepareTransaction {
                transaction,
                message,
            } => {
                xdr::write_int(dst, *transaction);
                xdr::write_buffer(dst, message)?;
            }
            Self::PrepareStatement {
                transaction,
                statement,
                dialect,
                sql,
                items,
                buffer_length,
            } => {
                xdr::write_int(dst, *transaction);
                xdr::write_int(dst, *statement);
                xdr::write_int(dst, *dialect);
                xdr::write_string(dst, sql)?;
                xdr::write_buffer(dst, items)?;
                xdr::write_int(dst, *buffer_length);
            }
            Self::InfoSql {
                statement,
                items,
                buffer_length,
            } => {
                xdr::write_int(dst, *statement);
                xdr::write_int(dst, 0);
                xdr::write_buffer(dst, items)?;
                xdr::write_int(dst, *buffer_length);
            }
            Self::Execute {
                statement,
                transaction,
                input_blr,
                input,
                output_blr,
            } => {
                xdr::write_int(dst, *statement);
                xdr::write_int(dst, *transaction);
                xdr::write_buffer(dst, input_blr)?;
                xdr::write_int(dst, 0);
                xdr::write_int(dst, i32::from(!input_blr.is_empty()));
                if !input_blr.is_empty() {
                    dst.put_slice(input);
                }
                if let Some(output_blr) = output_blr {
                    xdr::write_buffer(dst, output_blr)?;
                    xdr::write_int(dst, 0);
                }
            }
            Self::Fetch {
                statement,
                blr,
                fetch_size,
            } => {
                xdr::write_int(dst, *statement);
                xdr::write_buffer(dst, blr)?;
                xdr::write_int(dst, 0);
                xdr::write_int(dst, *fetch_size);
            }
            Self::FreeStatement { statement, option } => {
                xdr::write_int(dst, *statement);
                xdr::write_int(dst, *option);
            }
            Self::CreateBlob { bpb, transaction } => {
                xdr::write_buffer(dst, bpb)?;
                xdr::write_int(dst, *transaction);
                xdr::write_long(dst, 0);
            }
            Self::OpenBlob {
                bpb,
                transaction,
                blob_id,
            } => {
                xdr::write_buffer(dst, bpb)?;
                xdr::write_int(dst, *transaction);
                xdr::write_long(dst, *blob_id);
            }
            Self::GetSegment { blob, length } => {
                xdr::write_int(dst, *blob);
                xdr::write_int(dst, *length);
                xdr::write_int(dst, 0);
            }
            Self::PutSegment { blob, data } => {
                let length = i32::try_from(data.len())
                    .map_err(|_| ProtocolError::Encoding("segment too large".into()))?;
                xdr::write_int(dst, *blob);
                xdr::write_int(dst, length);
                xdr::write_buffer(dst, data)?;
            }
            Self::ReleaseBlob { blob, .. } => xdr::write_int(dst, *blob),
            Self::Cancel { kind } => xdr::write_int(dst, *kind),
            Self::Dummy => {}
        }
        Ok(())
    }

    /// Encode the request into a new buffer.
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut dst = BytesMut::with_capacity(64);
        self.encode(&mut dst)?;
        Ok(dst.freeze())
    }
}

/// The `op_accept` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptResponse {
    /// Accepted protocol version.
    pub version: ProtocolVersion,
    /// Accepted architecture.
    pub architecture: Architecture,
    /// Accepted protocol type, possibly with flag bits.
    pub protocol_type: i32,
}

impl AcceptResponse {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let version = xdr::read_int(src)?;
        let architecture = xdr::read_int(src)?;
        let protocol_type = xdr::read_int(src)?;
        Ok(Self {
            version: ProtocolVersion::new(version as u32),
            architecture: Architecture::from_code(architecture),
            protocol_type,
        })
    }

    /// Accepted protocol type without flag bits.
    #[must_use]
    pub fn accepted_type(&self) -> Option<ProtocolType> {
        ProtocolType::from_code(self.protocol_type)
    }

    /// Flag bits of the accepted protocol type.
    #[must_use]
    pub fn flags(&self) -> ProtocolFlags {
        ProtocolFlags::from_type_code(self.protocol_type)
    }

    /// Encode the response, including its operation code.
    pub fn encode(&self, dst: &mut impl BufMut) {
        xdr::write_int(dst, Operation::Accept.code());
        xdr::write_int(dst, self.version.into());
        xdr::write_int(dst, self.architecture.code());
        xdr::write_int(dst, self.protocol_type);
    }
}

/// The generic `op_response`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericResponse {
    /// Object handle created by the request.
    pub object: i32,
    /// Blob id created by the request.
    pub blob_id: i64,
    /// Response data (info buffers, segments).
    pub data: Bytes,
    /// Status vector.
    pub status: ServerStatus,
}

impl GenericResponse {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        Ok(Self {
            object: xdr::read_int(src)?,
            blob_id: xdr::read_long(src)?,
            data: xdr::read_buffer(src)?,
            status: ServerStatus::decode(src)?,
        })
    }

    /// Encode the response, including its operation code.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        xdr::write_int(dst, Operation::Response.code());
        xdr::write_int(dst, self.object);
        xdr::write_long(dst, self.blob_id);
        xdr::write_buffer(dst, &self.data)?;
        self.status.encode(dst)
    }
}

/// The `op_fetch_response` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// `0` while rows follow, `100` at end of cursor.
    pub status: i32,
    /// Number of rows in this message (0 or 1).
    pub count: i32,
    /// The row, when `count` is non-zero.
    pub row: Option<Row>,
}

/// The `op_sql_response` message carrying a singleton row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlResponse {
    /// Number of rows (0 or 1).
    pub count: i32,
    /// The row, when `count` is non-zero.
    pub row: Option<Row>,
}

/// A decoded server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `op_accept`.
    Accept(AcceptResponse),
    /// `op_reject`.
    Reject,
    /// `op_response`.
    Response(GenericResponse),
    /// `op_fetch_response`.
    Fetch(FetchResponse),
    /// `op_sql_response`.
    Sql(SqlResponse),
    /// `op_dummy` keep-alive.
    Dummy,
    /// `op_disconnect` or `op_exit`.
    Disconnect,
}

impl Frame {
    /// Decode one frame.
    ///
    /// Fails with [`ProtocolError::Incomplete`] when `src` does not yet hold
    /// the whole frame; nothing useful is left in `src` in that case.
    pub fn decode(src: &mut impl Buf, row_shape: Option<&RowShape>) -> Result<Self, ProtocolError> {
        let op = xdr::read_int(src)?;
        match Operation::from_i32(op)? {
            Operation::Accept => Ok(Self::Accept(AcceptResponse::decode(src)?)),
            Operation::Reject => Ok(Self::Reject),
            Operation::Response => Ok(Self::Response(GenericResponse::decode(src)?)),
            Operation::FetchResponse => {
                let status = xdr::read_int(src)?;
                let count = xdr::read_int(src)?;
                let row = decode_row(src, count, row_shape)?;
                Ok(Self::Fetch(FetchResponse { status, count, row }))
            }
            Operation::SqlResponse => {
                let count = xdr::read_int(src)?;
                let row = decode_row(src, count, row_shape)?;
                Ok(Self::Sql(SqlResponse { count, row }))
            }
            Operation::Dummy => Ok(Self::Dummy),
            Operation::Disconnect | Operation::Exit => Ok(Self::Disconnect),
            _ => Err(ProtocolError::UnexpectedOperation(op)),
        }
    }

    /// Operation code of the frame.
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::Accept(_) => Operation::Accept,
            Self::Reject => Operation::Reject,
            Self::Response(_) => Operation::Response,
            Self::Fetch(_) => Operation::FetchResponse,
            Self::Sql(_) => Operation::SqlResponse,
            Self::Dummy => Operation::Dummy,
            Self::Disconnect => Operation::Disconnect,
        }
    }
}

fn decode_row(
    src: &mut impl Buf,
    count: i32,
    row_shape: Option<&RowShape>,
) -> Result<Option<Row>, ProtocolError> {
    if count == 0 {
        return Ok(None);
    }
    let shape = row_shape.ok_or(ProtocolError::MissingRowShape)?;
    Ok(Some(shape.decode(src)?))
}
