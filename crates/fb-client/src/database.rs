//! Database handle: connection, protocol negotiation and attachment.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use fb_codec::{connect_tcp, CancelHandle, WireConnection};
use fb_protocol::info::DATABASE_INFO_ITEMS;
use fb_protocol::{ConnectRequest, DatabaseInfo, Dialect, Frame, ServerStatus, TypeLengthCalculator};
use parking_lot::Mutex;
use tokio::sync::MutexGuard;

use crate::blob::{BlobOptions, InputBlob, OutputBlob};
use crate::channel::{BoxedTransport, Channel, Notices, Transport, WarningLog};
use crate::config::Config;
use crate::descriptor::NegotiatedProtocol;
use crate::error::{Error, Result};
use crate::query::FinalizedQuery;
use crate::registry::ProtocolRegistry;
use crate::state::TransactionState;
use crate::statement::Statement;
use crate::transaction::{Transaction, TransactionOptions};

/// Size of the response buffer requested for database information.
const DATABASE_INFO_BUFFER_LENGTH: i32 = 1024;

/// A connection to a database, attached or not.
///
/// The database owns the wire connection. Transactions, statements and
/// blobs borrow it and take turns on the connection: every exchange holds
/// the connection from its request until its response was read.
pub struct Database {
    channel: tokio::sync::Mutex<Channel>,
    canceller: CancelHandle<BoxedTransport>,
    negotiated: NegotiatedProtocol,
    config: Config,
    handle: Option<i32>,
    dialect: Dialect,
    info: DatabaseInfo,
    notices: WarningLog,
}

impl Database {
    pub(crate) fn new(
        connection: WireConnection<BoxedTransport>,
        negotiated: NegotiatedProtocol,
        config: Config,
    ) -> Self {
        let notices: WarningLog = Arc::new(Mutex::new(Notices::default()));
        let mut channel = Channel::new(connection, Arc::clone(&notices));
        channel.set_protocol_type(negotiated.protocol_type);
        let canceller = channel.cancel_handle();
        let dialect = config.options.dialect;
        Self {
            channel: tokio::sync::Mutex::new(channel),
            canceller,
            negotiated,
            config,
            handle: None,
            dialect,
            info: DatabaseInfo::default(),
            notices,
        }
    }

    /// Open a TCP connection and negotiate the protocol.
    pub async fn connect(config: &Config, registry: &ProtocolRegistry) -> Result<Self> {
        config.validate()?;
        tracing::info!(host = %config.host, port = config.port, "connecting");
        let stream = connect_tcp(&config.host, config.port, config.timeouts.connect_timeout)
            .await
            .map_err(|e| Error::transport("connect", e))?;
        Self::connect_with(stream, config, registry).await
    }

    /// Negotiate the protocol over an established transport.
    pub async fn connect_with<T: Transport>(
        transport: T,
        config: &Config,
        registry: &ProtocolRegistry,
    ) -> Result<Self> {
        let Some(preferred) = registry.preferred() else {
            return Err(Error::ProtocolNegotiationFailed {
                reason: "no protocol versions registered".into(),
            });
        };
        let transport: BoxedTransport = Box::new(transport);
        let mut connection = WireConnection::new(transport, config.timeouts);

        let identification = preferred
            .create_parameter_buffer_encoder()
            .identification_buffer(config.options.user.as_deref(), &config.client_host)
            .serialize()?;
        let request = ConnectRequest {
            database: config.database.clone(),
            user_identification: identification,
            offers: registry.offers(),
        };
        let mut packet = BytesMut::new();
        request
            .encode(&mut packet)
            .map_err(|e| Error::protocol("connect", e))?;
        tracing::debug!(offers = request.offers.len(), "sending connect request");
        connection
            .send(packet.freeze())
            .await
            .map_err(|e| Error::transport("connect", e))?;

        let accept = match connection.receive().await {
            Ok(Frame::Accept(accept)) => accept,
            Ok(Frame::Reject) => {
                return Err(Error::ProtocolNegotiationFailed {
                    reason: "server rejected every offered protocol".into(),
                });
            }
            Ok(other) => {
                return Err(Error::malformed(
                    "connect",
                    format!("unexpected {:?} frame", other.operation()),
                ));
            }
            Err(e) => return Err(Error::transport("connect", e)),
        };

        let negotiated = registry.select_best(&accept)?;
        tracing::info!(
            version = %negotiated.version(),
            protocol_type = ?negotiated.protocol_type,
            flags = ?negotiated.flags,
            "protocol negotiated"
        );
        Ok(negotiated.descriptor.create_database(
            connection,
            negotiated.protocol_type,
            negotiated.flags,
            config.clone(),
        ))
    }

    /// Connect and attach.
    pub async fn open(config: &Config, registry: &ProtocolRegistry) -> Result<Self> {
        let mut database = Self::connect(config, registry).await?;
        database.attach().await?;
        Ok(database)
    }

    /// Attach to the configured database and read its properties.
    ///
    /// When the database dialect is lower than the configured one, the
    /// connection continues with the database dialect.
    pub async fn attach(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::InvalidState {
                handle: "database",
                state: "attached",
                operation: "attach",
            });
        }
        let family = self.negotiated.descriptor.family();
        let dpb = family
            .parameters
            .database_buffer(&self.config.options)
            .serialize()?;

        let channel = self.channel.get_mut();
        let handle = family
            .database
            .attach(channel, &self.config.database, dpb)
            .await?;
        tracing::info!(handle, database = %self.config.database, "attached");
        self.handle = Some(handle);

        let data = family
            .database
            .info(
                channel,
                handle,
                Bytes::from_static(DATABASE_INFO_ITEMS),
                DATABASE_INFO_BUFFER_LENGTH,
            )
            .await?;
        self.info = DatabaseInfo::parse(&data).map_err(|e| Error::protocol("database info", e))?;
        tracing::debug!(info = ?self.info, "database info");

        if let Some(database_dialect) = self.info.dialect.and_then(Dialect::from_i32) {
            if database_dialect.number() < self.dialect.number() {
                tracing::warn!(
                    configured = self.dialect.number(),
                    database = database_dialect.number(),
                    "database dialect is lower than the connection dialect, using the database dialect"
                );
                self.dialect = database_dialect;
            }
        }
        Ok(())
    }

    /// The negotiated protocol.
    #[must_use]
    pub fn protocol(&self) -> &NegotiatedProtocol {
        &self.negotiated
    }

    /// Configuration the database was connected with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Server handle, when attached.
    #[must_use]
    pub fn handle(&self) -> Option<i32> {
        self.handle
    }

    /// Properties reported after attach.
    #[must_use]
    pub fn info(&self) -> &DatabaseInfo {
        &self.info
    }

    /// Current connection dialect.
    ///
    /// Follows the database dialect once the server reported that it reset
    /// the connection dialect.
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        if self.notices.lock().dialect_reset {
            self.info
                .dialect
                .and_then(Dialect::from_i32)
                .unwrap_or(Dialect::V1)
        } else {
            self.dialect
        }
    }

    /// Type-length calculator for the current dialect.
    #[must_use]
    pub fn type_length_calculator(&self) -> TypeLengthCalculator {
        self.negotiated
            .descriptor
            .create_type_length_calculator(self.dialect())
    }

    /// Warnings received so far.
    #[must_use]
    pub fn warnings(&self) -> Vec<ServerStatus> {
        self.notices.lock().warnings.clone()
    }

    /// Forget the warnings received so far.
    pub fn clear_warnings(&self) {
        self.notices.lock().warnings.clear();
    }

    /// Number of keep-alive packets sent while waiting for responses.
    pub async fn keepalives_sent(&self) -> u64 {
        self.channel.lock().await.keepalives_sent()
    }

    /// Whether a fatal failure left the connection unusable.
    pub async fn is_broken(&self) -> bool {
        self.channel.lock().await.is_broken()
    }

    /// Number of requests waiting to travel with the next request.
    pub async fn deferred_requests(&self) -> usize {
        self.channel.lock().await.deferred_count()
    }

    pub(crate) async fn channel(&self) -> MutexGuard<'_, Channel> {
        self.channel.lock().await
    }

    pub(crate) fn attached_handle(&self, operation: &'static str) -> Result<i32> {
        self.handle.ok_or(Error::InvalidState {
            handle: "database",
            state: "detached",
            operation,
        })
    }

    pub(crate) fn fetch_size(&self) -> i32 {
        i32::try_from(self.config.fetch_size).unwrap_or(i32::MAX)
    }

    /// Start a transaction.
    pub async fn start_transaction(&self, options: &TransactionOptions) -> Result<Transaction<'_>> {
        let database = self.attached_handle("start transaction")?;
        let family = self.negotiated.descriptor.family();
        let tpb = family.parameters.transaction_buffer(options).serialize()?;
        let handle = {
            let mut channel = self.channel().await;
            family.transaction.start(&mut channel, database, tpb).await?
        };
        tracing::debug!(handle, "transaction started");
        Ok(self
            .negotiated
            .descriptor
            .create_transaction(self, handle, TransactionState::Active))
    }

    /// Create a statement; nothing is sent until it is prepared.
    #[must_use]
    pub fn create_statement(&self) -> Statement<'_> {
        self.negotiated.descriptor.create_statement(self)
    }

    /// Create and prepare a statement.
    pub async fn prepare(
        &self,
        transaction: &Transaction<'_>,
        query: impl FinalizedQuery,
    ) -> Result<Statement<'_>> {
        let mut statement = self.create_statement();
        statement.prepare(transaction, query).await?;
        Ok(statement)
    }

    /// Create a new blob under `transaction`, open for writing.
    pub async fn create_blob<'a>(
        &'a self,
        transaction: &'a Transaction<'a>,
        options: BlobOptions,
    ) -> Result<OutputBlob<'a>> {
        let mut blob = self
            .negotiated
            .descriptor
            .create_output_blob(self, transaction, options);
        blob.open().await?;
        Ok(blob)
    }

    /// Open an existing blob under `transaction` for reading.
    pub async fn open_blob<'a>(
        &'a self,
        transaction: &'a Transaction<'a>,
        blob_id: i64,
        options: BlobOptions,
    ) -> Result<InputBlob<'a>> {
        let mut blob =
            self.negotiated
                .descriptor
                .create_input_blob(self, transaction, options, blob_id);
        blob.open().await?;
        Ok(blob)
    }

    /// Send `op_cancel` without waiting for the running exchange.
    ///
    /// Only protocol version 12 and later support cancellation.
    pub async fn cancel(&self, kind: i32) -> Result<()> {
        self.negotiated
            .descriptor
            .family()
            .database
            .cancel(&self.canceller, kind)
            .await
    }

    /// Detach and close the connection.
    pub async fn detach(mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            let family = self.negotiated.descriptor.family();
            let channel = self.channel.get_mut();
            family.database.detach(channel, handle).await?;
            tracing::info!(handle, "detached");
        }
        self.close().await
    }

    /// Close the connection without detaching.
    pub async fn close(mut self) -> Result<()> {
        self.channel.get_mut().close().await
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("database", &self.config.database)
            .field("protocol", &self.negotiated)
            .field("handle", &self.handle)
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}
