//! Operation codes, buffer tags and status codes of the remote protocol.
//!
//! All values are peer-compatibility contracts and must match the server.

use crate::error::ProtocolError;

/// Remote protocol operation code (`op_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
#[non_exhaustive]
pub enum Operation {
    /// Packet has been voided.
    Void = 0,
    /// Connect to the remote server.
    Connect = 1,
    /// Remote end has exited.
    Exit = 2,
    /// Server accepts connection.
    Accept = 3,
    /// Server rejects connection.
    Reject = 4,
    /// Protocol selection.
    Protocol = 5,
    /// Connection lost.
    Disconnect = 6,
    /// Generic response block.
    Response = 9,
    /// Attach database.
    Attach = 19,
    /// Create database.
    Create = 20,
    /// Detach database.
    Detach = 21,
    /// Start transaction.
    Transaction = 29,
    /// Commit.
    Commit = 30,
    /// Rollback.
    Rollback = 31,
    /// Create blob (legacy form without parameter buffer).
    CreateBlob = 34,
    /// Open blob (legacy form without parameter buffer).
    OpenBlob = 35,
    /// Get blob segment.
    GetSegment = 36,
    /// Put blob segment.
    PutSegment = 37,
    /// Cancel blob.
    CancelBlob = 38,
    /// Close blob.
    CloseBlob = 39,
    /// Database information request.
    InfoDatabase = 40,
    /// Request information request.
    InfoRequest = 41,
    /// Transaction information request.
    InfoTransaction = 42,
    /// Blob information request.
    InfoBlob = 43,
    /// Commit retaining the transaction context.
    CommitRetaining = 50,
    /// Two-phase prepare with message.
    Prepare2 = 51,
    /// Event notification.
    Event = 52,
    /// Open blob with parameter buffer.
    OpenBlob2 = 56,
    /// Create blob with parameter buffer.
    CreateBlob2 = 57,
    /// Allocate a statement handle.
    AllocateStatement = 62,
    /// Execute a prepared statement.
    Execute = 63,
    /// Execute immediate.
    ExecImmediate = 64,
    /// Fetch rows.
    Fetch = 65,
    /// Response to a fetch.
    FetchResponse = 66,
    /// Free or close a statement.
    FreeStatement = 67,
    /// Prepare a statement.
    PrepareStatement = 68,
    /// Set cursor name.
    SetCursor = 69,
    /// Statement information request.
    InfoSql = 70,
    /// Dummy packet used as keep-alive.
    Dummy = 71,
    /// Execute with an output message.
    Execute2 = 76,
    /// Singleton row response.
    SqlResponse = 78,
    /// Drop database.
    DropDatabase = 81,
    /// Rollback retaining the transaction context.
    RollbackRetaining = 86,
    /// Cancel the running operation.
    Cancel = 91,
    /// Ping.
    Ping = 93,
}

impl Operation {
    /// Create an operation from its raw code.
    pub fn from_i32(value: i32) -> Result<Self, ProtocolError> {
        Ok(match value {
            0 => Self::Void,
            1 => Self::Connect,
            2 => Self::Exit,
            3 => Self::Accept,
            4 => Self::Reject,
            5 => Self::Protocol,
            6 => Self::Disconnect,
            9 => Self::Response,
            19 => Self::Attach,
            20 => Self::Create,
            21 => Self::Detach,
            29 => Self::Transaction,
            30 => Self::Commit,
            31 => Self::Rollback,
            34 => Self::CreateBlob,
            35 => Self::OpenBlob,
            36 => Self::GetSegment,
            37 => Self::PutSegment,
            38 => Self::CancelBlob,
            39 => Self::CloseBlob,
            40 => Self::InfoDatabase,
            41 => Self::InfoRequest,
            42 => Self::InfoTransaction,
            43 => Self::InfoBlob,
            50 => Self::CommitRetaining,
            51 => Self::Prepare2,
            52 => Self::Event,
            56 => Self::OpenBlob2,
            57 => Self::CreateBlob2,
            62 => Self::AllocateStatement,
            63 => Self::Execute,
            64 => Self::ExecImmediate,
            65 => Self::Fetch,
            66 => Self::FetchResponse,
            67 => Self::FreeStatement,
            68 => Self::PrepareStatement,
            69 => Self::SetCursor,
            70 => Self::InfoSql,
            71 => Self::Dummy,
            76 => Self::Execute2,
            78 => Self::SqlResponse,
            81 => Self::DropDatabase,
            86 => Self::RollbackRetaining,
            91 => Self::Cancel,
            93 => Self::Ping,
            other => return Err(ProtocolError::UnknownOperation(other)),
        })
    }

    /// Raw operation code.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// Connect request version sent in `op_connect`.
pub const CONNECT_VERSION2: i32 = 2;

/// Mask applied to the accepted protocol type.
pub const PTYPE_MASK: i32 = 0xFF;

/// Flag set on the accepted protocol type when wire compression is enabled.
pub const PFLAG_COMPRESS: i32 = 0x100;

/// Handle placeholder referring to the object allocated by the preceding
/// deferred request.
pub const INVALID_OBJECT: i32 = 0xFFFF;

/// Statement free options for `op_free_statement`.
pub mod free {
    /// Close the cursor, keep the statement.
    pub const DSQL_CLOSE: i32 = 1;
    /// Drop the statement handle.
    pub const DSQL_DROP: i32 = 2;
}

/// Fetch status values in `op_fetch_response`.
pub mod fetch {
    /// More rows may follow.
    pub const STATUS_OK: i32 = 0;
    /// End of cursor.
    pub const STATUS_EOF: i32 = 100;
}

/// Object states reported in the response to `op_get_segment`.
pub mod segment {
    /// Segment returned completely.
    pub const COMPLETE: i32 = 0;
    /// Segment was larger than the requested buffer.
    pub const PARTIAL: i32 = 1;
    /// End of blob reached.
    pub const EOF: i32 = 2;
    /// Largest segment the client requests or sends.
    pub const MAX_SEGMENT_SIZE: usize = 32767;
}

/// Cancel kinds for `op_cancel`.
pub mod cancel {
    /// Disable cancellation.
    pub const DISABLE: i32 = 1;
    /// Enable cancellation.
    pub const ENABLE: i32 = 2;
    /// Cancel the running operation.
    pub const RAISE: i32 = 3;
    /// Abort the connection.
    pub const ABORT: i32 = 4;
}

/// Database parameter buffer tags (`isc_dpb_*`).
pub mod dpb {
    /// Buffer version byte.
    pub const VERSION1: u8 = 1;
    /// Page cache size.
    pub const NUM_BUFFERS: u8 = 5;
    /// User name.
    pub const USER_NAME: u8 = 28;
    /// Password.
    pub const PASSWORD: u8 = 29;
    /// Character set of the connection.
    pub const LC_CTYPE: u8 = 48;
    /// Connect timeout in seconds.
    pub const CONNECT_TIMEOUT: u8 = 57;
    /// Role name.
    pub const SQL_ROLE_NAME: u8 = 60;
    /// Client SQL dialect.
    pub const SQL_DIALECT: u8 = 63;
    /// Change the database dialect.
    pub const SET_DB_SQL_DIALECT: u8 = 65;
}

/// Transaction parameter buffer tags (`isc_tpb_*`).
pub mod tpb {
    /// Buffer version byte.
    pub const VERSION3: u8 = 3;
    /// Table-stability isolation.
    pub const CONSISTENCY: u8 = 1;
    /// Snapshot isolation.
    pub const CONCURRENCY: u8 = 2;
    /// Wait on lock conflicts.
    pub const WAIT: u8 = 6;
    /// Fail immediately on lock conflicts.
    pub const NOWAIT: u8 = 7;
    /// Read-only access.
    pub const READ: u8 = 8;
    /// Read-write access.
    pub const WRITE: u8 = 9;
    /// Read-committed isolation.
    pub const READ_COMMITTED: u8 = 15;
    /// Commit automatically after each statement.
    pub const AUTOCOMMIT: u8 = 16;
    /// Read the latest committed record version.
    pub const REC_VERSION: u8 = 17;
    /// Wait for uncommitted record versions.
    pub const NO_REC_VERSION: u8 = 18;
    /// Lock timeout in seconds.
    pub const LOCK_TIMEOUT: u8 = 21;
}

/// Blob parameter buffer tags (`isc_bpb_*`).
pub mod bpb {
    /// Buffer version byte.
    pub const VERSION1: u8 = 1;
    /// Source sub-type.
    pub const SOURCE_TYPE: u8 = 1;
    /// Target sub-type.
    pub const TARGET_TYPE: u8 = 2;
    /// Blob storage type.
    pub const TYPE: u8 = 3;
    /// Source character set.
    pub const SOURCE_INTERP: u8 = 4;
    /// Target character set.
    pub const TARGET_INTERP: u8 = 5;
    /// Value of [`TYPE`] for segmented blobs.
    pub const TYPE_SEGMENTED: i32 = 0;
    /// Value of [`TYPE`] for stream blobs.
    pub const TYPE_STREAM: i32 = 1;
}

/// User identification tags sent with `op_connect` (`CNCT_*`).
pub mod cnct {
    /// OS user name.
    pub const USER: u8 = 1;
    /// Password.
    pub const PASSWD: u8 = 2;
    /// Client host name.
    pub const HOST: u8 = 4;
    /// Group.
    pub const GROUP: u8 = 5;
    /// User verification request.
    pub const USER_VERIFICATION: u8 = 6;
}

/// Generic information items (`isc_info_*`).
pub mod info {
    /// End of the info buffer.
    pub const END: u8 = 1;
    /// The info buffer was too small.
    pub const TRUNCATED: u8 = 2;
    /// Error while answering the request.
    pub const ERROR: u8 = 3;
    /// On-disk structure major version.
    pub const ODS_VERSION: u8 = 32;
    /// On-disk structure minor version.
    pub const ODS_MINOR_VERSION: u8 = 33;
    /// Server implementation version string.
    pub const ISC_VERSION: u8 = 12;
    /// SQL dialect of the database.
    pub const DB_SQL_DIALECT: u8 = 62;
}

/// Statement information items (`isc_info_sql_*`).
pub mod sql_info {
    /// Describe the select list.
    pub const SELECT: u8 = 4;
    /// Describe the input parameters.
    pub const BIND: u8 = 5;
    /// Number of variables.
    pub const NUM_VARIABLES: u8 = 6;
    /// Start of variable descriptions.
    pub const DESCRIBE_VARS: u8 = 7;
    /// End of one variable description.
    pub const DESCRIBE_END: u8 = 8;
    /// Sequence number of the variable.
    pub const SQLDA_SEQ: u8 = 9;
    /// Message sequence.
    pub const MESSAGE_SEQ: u8 = 10;
    /// SQL type.
    pub const TYPE: u8 = 11;
    /// SQL sub-type or character set.
    pub const SUB_TYPE: u8 = 12;
    /// Scale.
    pub const SCALE: u8 = 13;
    /// Length in bytes.
    pub const LENGTH: u8 = 14;
    /// Null indicator.
    pub const NULL_IND: u8 = 15;
    /// Field name.
    pub const FIELD: u8 = 16;
    /// Relation name.
    pub const RELATION: u8 = 17;
    /// Owner name.
    pub const OWNER: u8 = 18;
    /// Column alias.
    pub const ALIAS: u8 = 19;
    /// Continue describing from the given index.
    pub const SQLDA_START: u8 = 20;
    /// Statement type.
    pub const STMT_TYPE: u8 = 21;
    /// Relation alias.
    pub const RELATION_ALIAS: u8 = 25;
}

/// Statement types reported by `isc_info_sql_stmt_type`.
pub mod stmt_type {
    /// `SELECT`.
    pub const SELECT: i32 = 1;
    /// `INSERT`.
    pub const INSERT: i32 = 2;
    /// `UPDATE`.
    pub const UPDATE: i32 = 3;
    /// `DELETE`.
    pub const DELETE: i32 = 4;
    /// DDL statement.
    pub const DDL: i32 = 5;
    /// Blob get-segment statement.
    pub const GET_SEGMENT: i32 = 6;
    /// Blob put-segment statement.
    pub const PUT_SEGMENT: i32 = 7;
    /// `EXECUTE PROCEDURE` or DML with `RETURNING`.
    pub const EXEC_PROCEDURE: i32 = 8;
    /// `SET TRANSACTION`.
    pub const START_TRANS: i32 = 9;
    /// `COMMIT`.
    pub const COMMIT: i32 = 10;
    /// `ROLLBACK`.
    pub const ROLLBACK: i32 = 11;
    /// `SELECT ... FOR UPDATE`.
    pub const SELECT_FOR_UPDATE: i32 = 12;
    /// `SET GENERATOR`.
    pub const SET_GENERATOR: i32 = 13;
    /// `SAVEPOINT`.
    pub const SAVEPOINT: i32 = 14;
}

/// Status vector argument kinds (`isc_arg_*`).
pub mod arg {
    /// End of the status vector.
    pub const END: i32 = 0;
    /// Error code.
    pub const GDS: i32 = 1;
    /// String parameter.
    pub const STRING: i32 = 2;
    /// Counted string parameter.
    pub const CSTRING: i32 = 3;
    /// Numeric parameter.
    pub const NUMBER: i32 = 4;
    /// Pre-formatted message.
    pub const INTERPRETED: i32 = 5;
    /// Warning code.
    pub const WARNING: i32 = 18;
    /// SQLSTATE.
    pub const SQL_STATE: i32 = 19;
}

/// Error and warning codes the client interprets (`isc_*`).
pub mod isc {
    /// Deadlock.
    pub const DEADLOCK: i32 = 335_544_336;
    /// Lock conflict on no-wait transaction.
    pub const LOCK_CONFLICT: i32 = 335_544_345;
    /// Segment buffer too small.
    pub const SEGMENT: i32 = 335_544_366;
    /// End of blob.
    pub const SEGSTR_EOF: i32 = 335_544_367;
    /// Unavailable database.
    pub const UNAVAILABLE: i32 = 335_544_375;
    /// Login failed.
    pub const LOGIN: i32 = 335_544_472;
    /// Dynamic SQL error.
    pub const DSQL_ERROR: i32 = 335_544_569;
    /// Network error.
    pub const NETWORK_ERROR: i32 = 335_544_721;
    /// Operation was cancelled.
    pub const CANCELLED: i32 = 335_544_794;
    /// Database dialect was reset.
    pub const DIALECT_RESET_WARNING: i32 = 335_544_807;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_from_i32() {
        assert_eq!(Operation::from_i32(9).unwrap(), Operation::Response);
        assert_eq!(Operation::from_i32(71).unwrap(), Operation::Dummy);
        assert_eq!(Operation::from_i32(91).unwrap(), Operation::Cancel);
        assert_eq!(
            Operation::from_i32(1000),
            Err(ProtocolError::UnknownOperation(1000))
        );
    }

    #[test]
    fn test_operation_code() {
        assert_eq!(Operation::AllocateStatement.code(), 62);
        assert_eq!(Operation::FetchResponse.code(), 66);
    }
}
