//! Protocol descriptors.
//!
//! A [`ProtocolDescriptor`] is what the client offers the server for one
//! protocol version, and the factory for the handles of that version once
//! the server accepted it.

use fb_codec::WireConnection;
use fb_protocol::{
    Architecture, Dialect, ProtocolFlags, ProtocolOffer, ProtocolType, ProtocolVersion,
    TypeLengthCalculator,
};

use crate::blob::{BlobOptions, InputBlob, OutputBlob};
use crate::channel::BoxedTransport;
use crate::config::Config;
use crate::database::Database;
use crate::error::{Error, Result};
use crate::protocol::{ParameterBufferEncoder, ProtocolFamily, VERSION_10, VERSION_11, VERSION_12};
use crate::state::TransactionState;
use crate::statement::Statement;
use crate::transaction::Transaction;

/// One protocol version the client can speak.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolDescriptor {
    version: ProtocolVersion,
    architecture: Architecture,
    min_type: ProtocolType,
    max_type: ProtocolType,
    weight: i32,
    family: &'static ProtocolFamily,
}

impl ProtocolDescriptor {
    /// Create a descriptor.
    ///
    /// Fails when `min_type` is above `max_type`.
    pub fn new(
        version: ProtocolVersion,
        architecture: Architecture,
        min_type: ProtocolType,
        max_type: ProtocolType,
        weight: i32,
        family: &'static ProtocolFamily,
    ) -> Result<Self> {
        if min_type > max_type {
            return Err(Error::Config(format!(
                "protocol {version}: minimum type {min_type:?} is above maximum type {max_type:?}"
            )));
        }
        Ok(Self {
            version,
            architecture,
            min_type,
            max_type,
            weight,
            family,
        })
    }

    /// Protocol version 10.
    #[must_use]
    pub fn v10() -> Self {
        Self {
            version: ProtocolVersion::V10,
            architecture: Architecture::Generic,
            min_type: ProtocolType::Rpc,
            max_type: ProtocolType::BatchSend,
            weight: 1,
            family: &VERSION_10,
        }
    }

    /// Protocol version 11.
    #[must_use]
    pub fn v11() -> Self {
        Self {
            version: ProtocolVersion::V11,
            architecture: Architecture::Generic,
            min_type: ProtocolType::Rpc,
            max_type: ProtocolType::LazySend,
            weight: 2,
            family: &VERSION_11,
        }
    }

    /// Protocol version 12.
    #[must_use]
    pub fn v12() -> Self {
        Self {
            version: ProtocolVersion::V12,
            architecture: Architecture::Generic,
            min_type: ProtocolType::Rpc,
            max_type: ProtocolType::LazySend,
            weight: 3,
            family: &VERSION_12,
        }
    }

    /// Protocol version.
    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Architecture.
    #[must_use]
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Lowest acceptable protocol type.
    #[must_use]
    pub fn min_type(&self) -> ProtocolType {
        self.min_type
    }

    /// Highest acceptable protocol type.
    #[must_use]
    pub fn max_type(&self) -> ProtocolType {
        self.max_type
    }

    /// Preference among descriptors of equal version.
    #[must_use]
    pub fn weight(&self) -> i32 {
        self.weight
    }

    /// Exchange strategies of this version.
    #[must_use]
    pub fn family(&self) -> &'static ProtocolFamily {
        self.family
    }

    /// The offer sent in `op_connect`.
    #[must_use]
    pub fn offer(&self) -> ProtocolOffer {
        ProtocolOffer {
            version: self.version,
            architecture: self.architecture,
            min_type: self.min_type,
            max_type: self.max_type,
            weight: self.weight,
        }
    }

    /// Whether the server's choice matches this descriptor.
    #[must_use]
    pub fn accepts(
        &self,
        version: ProtocolVersion,
        architecture: Architecture,
        protocol_type: ProtocolType,
    ) -> bool {
        self.version == version
            && self.architecture == architecture
            && (self.min_type..=self.max_type).contains(&protocol_type)
    }

    /// Wrap a negotiated connection in a database handle.
    #[must_use]
    pub fn create_database(
        &self,
        connection: WireConnection<BoxedTransport>,
        protocol_type: ProtocolType,
        flags: ProtocolFlags,
        config: Config,
    ) -> Database {
        let negotiated = NegotiatedProtocol {
            descriptor: *self,
            protocol_type,
            flags,
        };
        Database::new(connection, negotiated, config)
    }

    /// Transaction handle for a transaction started on `database`.
    #[must_use]
    pub fn create_transaction<'db>(
        &self,
        database: &'db Database,
        handle: i32,
        initial_state: TransactionState,
    ) -> Transaction<'db> {
        Transaction::new(database, handle, initial_state, self.family.transaction)
    }

    /// Statement handle on `database`; nothing is sent until it is prepared.
    #[must_use]
    pub fn create_statement<'db>(&self, database: &'db Database) -> Statement<'db> {
        Statement::new(
            database,
            self.family.statement,
            self.family.execution,
            database.fetch_size(),
        )
    }

    /// Blob handle for reading `blob_id`; nothing is sent until it is opened.
    #[must_use]
    pub fn create_input_blob<'a>(
        &self,
        database: &'a Database,
        transaction: &'a Transaction<'a>,
        options: BlobOptions,
        blob_id: i64,
    ) -> InputBlob<'a> {
        InputBlob::new(
            database,
            transaction,
            self.family.blob,
            self.family.parameters,
            options,
            blob_id,
        )
    }

    /// Blob handle for writing a new blob; nothing is sent until it is
    /// opened.
    #[must_use]
    pub fn create_output_blob<'a>(
        &self,
        database: &'a Database,
        transaction: &'a Transaction<'a>,
        options: BlobOptions,
    ) -> OutputBlob<'a> {
        OutputBlob::new(
            database,
            transaction,
            self.family.blob,
            self.family.parameters,
            options,
        )
    }

    /// Parameter buffer encoder of this version.
    #[must_use]
    pub fn create_parameter_buffer_encoder(&self) -> &'static dyn ParameterBufferEncoder {
        self.family.parameters
    }

    /// Type-length calculator for a connection dialect.
    #[must_use]
    pub fn create_type_length_calculator(&self, dialect: Dialect) -> TypeLengthCalculator {
        TypeLengthCalculator::new(dialect)
    }
}

/// The descriptor the server accepted and the protocol type it chose.
#[derive(Debug, Clone, Copy)]
pub struct NegotiatedProtocol {
    /// Accepted descriptor.
    pub descriptor: ProtocolDescriptor,
    /// Accepted protocol type.
    pub protocol_type: ProtocolType,
    /// Flag bits set on the accepted type.
    pub flags: ProtocolFlags,
}

impl NegotiatedProtocol {
    /// Accepted protocol version.
    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.descriptor.version
    }

    /// Whether requests may be deferred.
    #[must_use]
    pub fn lazy_send(&self) -> bool {
        self.protocol_type == ProtocolType::LazySend
    }
}
