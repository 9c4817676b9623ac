//! Mock Firebird server for testing.
//!
//! This module provides an in-process server that speaks the remote
//! protocol well enough to drive the client handles without a real
//! database.
//!
//! ## Features
//!
//! - Protocol negotiation against a configurable set of versions
//! - Attach, database info, transactions and two-phase prepare
//! - Scripted statements: describe (optionally truncated), cursors with
//!   batched fetch, singleton results
//! - Segmented blobs shared by all connections of the server
//! - Failure and delay injection per operation
//! - A journal of every request received, in arrival order
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_testing::mock_server::{MockField, MockFirebirdServer, MockStatement};
//! use fb_protocol::{SqlType, TypeDescriptor};
//!
//! #[tokio::test]
//! async fn test_query() {
//!     let server = MockFirebirdServer::builder()
//!         .with_statement(
//!             "SELECT ID FROM T",
//!             MockStatement::select(
//!                 vec![MockField::new("ID", TypeDescriptor::new(SqlType::Long))],
//!                 vec![vec![fixtures::int(1)]],
//!             ),
//!         )
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let port = server.port();
//!     // Connect your client to 127.0.0.1:port...
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use fb_protocol::consts::{fetch, free, info, isc, segment, sql_info, stmt_type, INVALID_OBJECT};
use fb_protocol::{
    AcceptResponse, Architecture, ConnectRequest, Dialect, GenericResponse, Operation,
    ParameterBufferKind, ProtocolError, ProtocolType, ProtocolVersion, Request, Row,
    RowDescriptor, RowShape, ServerStatus, StatusArgument, TypeDescriptor, TypeLengthCalculator,
    xdr,
};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::request::{ClientMessage, InputShapes, decode_message};

/// Invalid statement handle.
pub const BAD_STATEMENT_HANDLE: i32 = 335_544_485;

/// Invalid blob id.
pub const BAD_BLOB_ID: i32 = 335_544_329;

/// Invalid blob handle.
pub const BAD_BLOB_HANDLE: i32 = 335_544_328;

/// Cursor is not open.
pub const CURSOR_NOT_OPEN: i32 = 335_544_577;

/// First blob id handed out by a server.
const FIRST_BLOB_ID: i64 = 0x0000_0080_0000_0001;

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent something the server could not decode.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server already stopped.
    #[error("Server already stopped")]
    Stopped,
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// A described column or parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockField {
    /// Column name, also reported as alias.
    pub name: String,
    /// Type of the value.
    pub descriptor: TypeDescriptor,
}

impl MockField {
    /// Create a field.
    pub fn new(name: impl Into<String>, descriptor: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
        }
    }

    /// The descriptor as the client reads it back from the describe info.
    fn described(&self) -> TypeDescriptor {
        let d = &self.descriptor;
        TypeDescriptor::from_wire(
            d.wire_type(),
            i32::from(d.sub_type),
            d.length,
            i32::from(d.scale),
        )
        .unwrap_or_else(|_| d.clone())
    }
}

/// What the server does with one statement text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockStatement {
    /// Statement type code reported on prepare.
    pub statement_type: i32,
    /// Output columns.
    pub fields: Vec<MockField>,
    /// Input parameters.
    pub parameters: Vec<MockField>,
    /// Rows of the cursor, or the singleton row as first element.
    pub rows: Vec<Row>,
    /// Error code returned by every execute.
    pub execute_error: Option<i32>,
}

impl MockStatement {
    fn new(statement_type: i32) -> Self {
        Self {
            statement_type,
            fields: Vec::new(),
            parameters: Vec::new(),
            rows: Vec::new(),
            execute_error: None,
        }
    }

    /// A `SELECT` returning `rows`.
    ///
    /// Values are raw XDR field values in the shape of `fields`.
    #[must_use]
    pub fn select(fields: Vec<MockField>, rows: Vec<Row>) -> Self {
        Self {
            fields,
            rows,
            ..Self::new(stmt_type::SELECT)
        }
    }

    /// An `EXECUTE PROCEDURE` returning at most one row.
    #[must_use]
    pub fn procedure(fields: Vec<MockField>, row: Option<Row>) -> Self {
        Self {
            fields,
            rows: row.into_iter().collect(),
            ..Self::new(stmt_type::EXEC_PROCEDURE)
        }
    }

    /// An `INSERT` without output.
    #[must_use]
    pub fn insert() -> Self {
        Self::new(stmt_type::INSERT)
    }

    /// A DDL statement.
    #[must_use]
    pub fn ddl() -> Self {
        Self::new(stmt_type::DDL)
    }

    /// Set the input parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Vec<MockField>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Fail every execute with `code`.
    #[must_use]
    pub fn with_execute_error(mut self, code: i32) -> Self {
        self.execute_error = Some(code);
        self
    }

    fn has_cursor(&self) -> bool {
        matches!(
            self.statement_type,
            stmt_type::SELECT | stmt_type::SELECT_FOR_UPDATE
        )
    }
}

/// Mock server configuration.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Protocol versions the server accepts.
    pub versions: Vec<ProtocolVersion>,
    /// Highest protocol type the server accepts.
    pub max_protocol_type: ProtocolType,
    /// Reject every connect request.
    pub reject: bool,
    /// Statements by SQL text; unknown text fails to prepare.
    pub statements: HashMap<String, MockStatement>,
    /// SQL dialect of the database.
    pub database_dialect: i32,
    /// Version string reported in database info.
    pub server_version: String,
    /// Warning code attached to the attach response.
    pub attach_warning: Option<i32>,
    /// Error code returned by attach.
    pub attach_error: Option<i32>,
    /// Number of commits that fail with a deadlock before commits succeed.
    pub commit_failures: usize,
    /// Most variables described per describe response.
    pub describe_limit: Option<usize>,
    /// Delay before answering an operation.
    pub delays: HashMap<Operation, Duration>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            versions: vec![ProtocolVersion::V10, ProtocolVersion::V11, ProtocolVersion::V12],
            max_protocol_type: ProtocolType::LazySend,
            reject: false,
            statements: HashMap::new(),
            database_dialect: 3,
            server_version: "LI-V3.0.10 MockFirebird".to_string(),
            attach_warning: None,
            attach_error: None,
            commit_failures: 0,
            describe_limit: None,
            delays: HashMap::new(),
        }
    }
}

/// Builder for creating a mock server.
#[derive(Debug, Default)]
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept only these protocol versions.
    pub fn with_versions(mut self, versions: &[ProtocolVersion]) -> Self {
        self.config.versions = versions.to_vec();
        self
    }

    /// Cap the accepted protocol type.
    pub fn with_max_protocol_type(mut self, protocol_type: ProtocolType) -> Self {
        self.config.max_protocol_type = protocol_type;
        self
    }

    /// Reject every connect request.
    pub fn rejecting(mut self) -> Self {
        self.config.reject = true;
        self
    }

    /// Script the statement with text `sql`.
    pub fn with_statement(mut self, sql: impl Into<String>, statement: MockStatement) -> Self {
        self.config.statements.insert(sql.into(), statement);
        self
    }

    /// Set the database dialect.
    pub fn with_database_dialect(mut self, dialect: i32) -> Self {
        self.config.database_dialect = dialect;
        self
    }

    /// Set the reported server version.
    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.config.server_version = version.into();
        self
    }

    /// Attach succeeds with warning `code`.
    pub fn with_attach_warning(mut self, code: i32) -> Self {
        self.config.attach_warning = Some(code);
        self
    }

    /// Attach fails with `code`.
    pub fn with_attach_error(mut self, code: i32) -> Self {
        self.config.attach_error = Some(code);
        self
    }

    /// The next `count` commits fail with a deadlock.
    pub fn with_commit_failures(mut self, count: usize) -> Self {
        self.config.commit_failures = count;
        self
    }

    /// Describe at most `limit` variables per response.
    pub fn with_describe_limit(mut self, limit: usize) -> Self {
        self.config.describe_limit = Some(limit);
        self
    }

    /// Wait `delay` before answering `operation`.
    pub fn with_delay(mut self, operation: Operation, delay: Duration) -> Self {
        self.config.delays.insert(operation, delay);
        self
    }

    /// Build and start the mock server.
    pub async fn build(self) -> Result<MockFirebirdServer> {
        MockFirebirdServer::start(self.config).await
    }
}

/// State shared by all connections of a server.
#[derive(Debug)]
struct Shared {
    connections: usize,
    connects: Vec<ConnectRequest>,
    requests: Vec<Request>,
    keepalives: u64,
    commit_failures: usize,
    blobs: HashMap<i64, Vec<Bytes>>,
    next_blob_id: i64,
}

/// A mock Firebird server for testing.
///
/// The server listens on an ephemeral port of the loopback interface and
/// serves every connection on its own task until the client disconnects
/// or the server is stopped.
pub struct MockFirebirdServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    shared: Arc<Mutex<Shared>>,
}

impl MockFirebirdServer {
    /// Create a new builder for the mock server.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available port.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Arc::new(Mutex::new(Shared {
            connections: 0,
            connects: Vec::new(),
            requests: Vec::new(),
            keepalives: 0,
            commit_failures: config.commit_failures,
            blobs: HashMap::new(),
            next_blob_id: FIRST_BLOB_ID,
        }));
        let config = Arc::new(config);

        let server = Self {
            addr,
            shutdown_tx: shutdown_tx.clone(),
            shared: Arc::clone(&shared),
        };

        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                tracing::debug!(%peer, "mock server accepted connection");
                                let session = Session::new(Arc::clone(&config), Arc::clone(&shared));
                                let shared = Arc::clone(&shared);
                                tokio::spawn(async move {
                                    shared.lock().connections += 1;
                                    if let Err(e) = session.run(stream).await {
                                        tracing::debug!(error = %e, "mock connection ended");
                                    }
                                    let mut state = shared.lock();
                                    state.connections = state.connections.saturating_sub(1);
                                });
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "mock server accept failed");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(server)
    }

    /// Get the server's listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the host string for connection configuration.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.shared.lock().connections
    }

    /// Connect requests received, in arrival order.
    pub fn connect_requests(&self) -> Vec<ConnectRequest> {
        self.shared.lock().connects.clone()
    }

    /// Requests received after connect, in arrival order.
    ///
    /// Keep-alive packets are counted separately.
    pub fn requests(&self) -> Vec<Request> {
        self.shared.lock().requests.clone()
    }

    /// Operation codes of [`requests`](Self::requests).
    pub fn operations(&self) -> Vec<Operation> {
        self.shared
            .lock()
            .requests
            .iter()
            .map(Request::operation)
            .collect()
    }

    /// Serialized database parameter buffers of every attach.
    pub fn attach_buffers(&self) -> Vec<Bytes> {
        self.collect(|r| match r {
            Request::Attach { dpb, .. } => Some(dpb.clone()),
            _ => None,
        })
    }

    /// Serialized transaction parameter buffers of every transaction start.
    pub fn transaction_buffers(&self) -> Vec<Bytes> {
        self.collect(|r| match r {
            Request::StartTransaction { tpb, .. } => Some(tpb.clone()),
            _ => None,
        })
    }

    /// Serialized blob parameter buffers of every blob create and open.
    pub fn blob_buffers(&self) -> Vec<Bytes> {
        self.collect(|r| match r {
            Request::CreateBlob { bpb, .. } | Request::OpenBlob { bpb, .. } => Some(bpb.clone()),
            _ => None,
        })
    }

    /// Number of `op_dummy` keep-alive packets received.
    pub fn keepalives_received(&self) -> u64 {
        self.shared.lock().keepalives
    }

    /// Contents of a closed blob.
    pub fn blob(&self, blob_id: i64) -> Option<Bytes> {
        let state = self.shared.lock();
        let segments = state.blobs.get(&blob_id)?;
        let mut data = BytesMut::new();
        for segment in segments {
            data.extend_from_slice(segment);
        }
        Some(data.freeze())
    }

    /// Store a blob as if a client had written `segments`, returning its id.
    pub fn insert_blob(&self, segments: Vec<Bytes>) -> i64 {
        let mut state = self.shared.lock();
        let blob_id = state.next_blob_id;
        state.next_blob_id += 1;
        state.blobs.insert(blob_id, segments);
        blob_id
    }

    fn collect<T>(&self, f: impl Fn(&Request) -> Option<T>) -> Vec<T> {
        self.shared.lock().requests.iter().filter_map(f).collect()
    }

    /// Stop accepting connections.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockFirebirdServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MockFirebirdServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFirebirdServer")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct SessionStatement {
    script: Option<MockStatement>,
    output: RowShape,
    cursor: Option<VecDeque<Row>>,
}

#[derive(Debug)]
enum BlobCursor {
    Writing { blob_id: i64, segments: Vec<Bytes> },
    Reading { segments: VecDeque<Bytes> },
}

/// One client connection.
struct Session {
    config: Arc<MockServerConfig>,
    shared: Arc<Mutex<Shared>>,
    next_handle: i32,
    last_statement: Option<i32>,
    statements: HashMap<i32, SessionStatement>,
    input_shapes: InputShapes,
    blobs: HashMap<i32, BlobCursor>,
}

impl Session {
    fn new(config: Arc<MockServerConfig>, shared: Arc<Mutex<Shared>>) -> Self {
        Self {
            config,
            shared,
            next_handle: 1,
            last_statement: None,
            statements: HashMap::new(),
            input_shapes: InputShapes::new(),
            blobs: HashMap::new(),
        }
    }

    async fn run(mut self, mut stream: TcpStream) -> Result<()> {
        let mut buffer = BytesMut::with_capacity(4096);
        loop {
            let decoded = {
                let mut src = &buffer[..];
                match decode_message(&mut src, &self.input_shapes) {
                    Ok(message) => Some((message, buffer.len() - src.len())),
                    Err(e) if e.is_incomplete() => None,
                    Err(e) => return Err(e.into()),
                }
            };
            let Some((message, consumed)) = decoded else {
                if stream.read_buf(&mut buffer).await? == 0 {
                    return Ok(());
                }
                continue;
            };
            buffer.advance(consumed);

            let mut out = BytesMut::new();
            let open = match message {
                ClientMessage::Connect(request) => self.connect(request, &mut out),
                ClientMessage::Request(request) => {
                    self.handle(request, &mut out).await?;
                    true
                }
            };
            if !out.is_empty() {
                stream.write_all(&out).await?;
            }
            if !open {
                return Ok(());
            }
        }
    }

    fn connect(&mut self, request: ConnectRequest, out: &mut BytesMut) -> bool {
        let accept = self.negotiate(&request);
        self.shared.lock().connects.push(request);
        match accept {
            Some(accept) => {
                tracing::debug!(version = %accept.version, "mock server accepted protocol");
                accept.encode(out);
                true
            }
            None => {
                xdr::write_int(out, Operation::Reject.code());
                false
            }
        }
    }

    fn negotiate(&self, request: &ConnectRequest) -> Option<AcceptResponse> {
        if self.config.reject {
            return None;
        }
        request
            .offers
            .iter()
            .filter(|o| {
                o.architecture == Architecture::Generic && self.config.versions.contains(&o.version)
            })
            .filter_map(|o| {
                let accepted = o.max_type.min(self.config.max_protocol_type);
                (accepted >= o.min_type).then_some((o, accepted))
            })
            .max_by_key(|(o, _)| o.weight)
            .map(|(o, accepted)| AcceptResponse {
                version: o.version,
                architecture: o.architecture,
                protocol_type: accepted.code(),
            })
    }

    fn allocate_handle(&mut self) -> i32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    async fn handle(&mut self, request: Request, out: &mut BytesMut) -> Result<()> {
        let operation = request.operation();
        if operation == Operation::Dummy {
            self.shared.lock().keepalives += 1;
            return Ok(());
        }
        self.shared.lock().requests.push(request.clone());
        if operation == Operation::Cancel {
            return Ok(());
        }
        if let Some(delay) = self.config.delays.get(&operation) {
            tokio::time::sleep(*delay).await;
        }

        match request {
            Request::Attach { .. } => {
                if let Some(code) = self.config.attach_error {
                    return fail(out, code);
                }
                let handle = self.allocate_handle();
                let status = self
                    .config
                    .attach_warning
                    .map(|code| ServerStatus::new(vec![StatusArgument::Warning(code)]))
                    .unwrap_or_default();
                respond(out, handle, 0, Bytes::new(), status)
            }
            Request::InfoDatabase { .. } => {
                let data = self.database_info();
                respond(out, 0, 0, data, ServerStatus::default())
            }
            Request::StartTransaction { .. } => {
                let handle = self.allocate_handle();
                ok(out, handle)
            }
            Request::EndTransaction {
                operation: Operation::Commit,
                ..
            } => {
                let failing = {
                    let mut state = self.shared.lock();
                    let failing = state.commit_failures > 0;
                    state.commit_failures = state.commit_failures.saturating_sub(1);
                    failing
                };
                if failing {
                    return fail(out, isc::DEADLOCK);
                }
                ok(out, 0)
            }
            Request::AllocateStatement { .. } => {
                let handle = self.allocate_handle();
                self.statements.insert(handle, SessionStatement::default());
                self.last_statement = Some(handle);
                ok(out, handle)
            }
            Request::PrepareStatement {
                statement,
                dialect,
                sql,
                ..
            } => self.prepare(statement, dialect, &sql, out),
            Request::InfoSql {
                statement, items, ..
            } => self.describe_more(statement, &items, out),
            Request::Execute {
                statement,
                output_blr,
                ..
            } => self.execute(statement, output_blr.is_some(), out),
            Request::Fetch {
                statement,
                fetch_size,
                ..
            } => self.fetch(statement, fetch_size, out),
            Request::FreeStatement { statement, option } => {
                if !self.statements.contains_key(&statement) {
                    return fail(out, BAD_STATEMENT_HANDLE);
                }
                if option == free::DSQL_DROP {
                    self.statements.remove(&statement);
                    self.input_shapes.remove(&statement);
                } else if let Some(entry) = self.statements.get_mut(&statement) {
                    entry.cursor = None;
                }
                ok(out, 0)
            }
            Request::CreateBlob { .. } => {
                let handle = self.allocate_handle();
                let blob_id = {
                    let mut state = self.shared.lock();
                    let id = state.next_blob_id;
                    state.next_blob_id += 1;
                    id
                };
                self.blobs.insert(
                    handle,
                    BlobCursor::Writing {
                        blob_id,
                        segments: Vec::new(),
                    },
                );
                respond(out, handle, blob_id, Bytes::new(), ServerStatus::default())
            }
            Request::OpenBlob { blob_id, .. } => {
                let segments = self.shared.lock().blobs.get(&blob_id).cloned();
                let Some(segments) = segments else {
                    return fail(out, BAD_BLOB_ID);
                };
                let handle = self.allocate_handle();
                self.blobs.insert(
                    handle,
                    BlobCursor::Reading {
                        segments: segments.into(),
                    },
                );
                ok(out, handle)
            }
            Request::GetSegment { blob, length } => self.get_segment(blob, length, out),
            Request::PutSegment { blob, data } => match self.blobs.get_mut(&blob) {
                Some(BlobCursor::Writing { segments, .. }) => {
                    segments.push(data);
                    ok(out, 0)
                }
                _ => fail(out, BAD_BLOB_HANDLE),
            },
            Request::ReleaseBlob { operation, blob } => match self.blobs.remove(&blob) {
                Some(BlobCursor::Writing { blob_id, segments }) => {
                    if operation == Operation::CloseBlob {
                        self.shared.lock().blobs.insert(blob_id, segments);
                    }
                    ok(out, 0)
                }
                Some(BlobCursor::Reading { .. }) => ok(out, 0),
                None => fail(out, BAD_BLOB_HANDLE),
            },
            // detach, rollback, retaining ends and two-phase prepare
            _ => ok(out, 0),
        }
    }

    fn database_info(&self) -> Bytes {
        let mut data = Vec::new();
        cluster(&mut data, info::DB_SQL_DIALECT, &self.config.database_dialect.to_le_bytes());
        cluster(&mut data, info::ODS_VERSION, &12i32.to_le_bytes());
        cluster(&mut data, info::ODS_MINOR_VERSION, &0i32.to_le_bytes());
        let version = self.config.server_version.as_bytes();
        let len = version.len().min(usize::from(u8::MAX));
        let mut strings = vec![1, len as u8];
        strings.extend_from_slice(&version[..len]);
        cluster(&mut data, info::ISC_VERSION, &strings);
        data.push(info::END);
        Bytes::from(data)
    }

    fn prepare(&mut self, statement: i32, dialect: i32, sql: &str, out: &mut BytesMut) -> Result<()> {
        let handle = if statement == INVALID_OBJECT {
            self.last_statement
        } else {
            Some(statement)
        };
        let Some(handle) = handle.filter(|h| self.statements.contains_key(h)) else {
            return fail(out, BAD_STATEMENT_HANDLE);
        };
        let Some(script) = self.config.statements.get(sql).cloned() else {
            return fail(out, isc::DSQL_ERROR);
        };

        let calculator = TypeLengthCalculator::new(Dialect::from_i32(dialect).unwrap_or(Dialect::V3));
        // the server describes what it has; encodability is the client's concern
        let input = calculator
            .row_shape(&described(&script.parameters))
            .unwrap_or_default();
        let output = calculator
            .row_shape(&described(&script.fields))
            .unwrap_or_default();
        if input.is_empty() {
            self.input_shapes.remove(&handle);
        } else {
            self.input_shapes.insert(handle, input);
        }

        let data = describe(&script, None, self.config.describe_limit);
        if let Some(entry) = self.statements.get_mut(&handle) {
            *entry = SessionStatement {
                script: Some(script),
                output,
                cursor: None,
            };
        }
        respond(out, 0, 0, data, ServerStatus::default())
    }

    fn describe_more(&mut self, statement: i32, items: &[u8], out: &mut BytesMut) -> Result<()> {
        let Some(script) = self.statements.get(&statement).and_then(|s| s.script.as_ref()) else {
            return fail(out, BAD_STATEMENT_HANDLE);
        };
        let mut src = items;
        let from = if src.first() == Some(&sql_info::SQLDA_START) && src.len() >= 6 {
            src.advance(3);
            let start = usize::from(src.get_u16_le());
            Some((src.get_u8(), start))
        } else {
            None
        };
        let data = describe(script, from, self.config.describe_limit);
        respond(out, 0, 0, data, ServerStatus::default())
    }

    fn execute(&mut self, statement: i32, singleton: bool, out: &mut BytesMut) -> Result<()> {
        let Some(entry) = self.statements.get_mut(&statement) else {
            return fail(out, BAD_STATEMENT_HANDLE);
        };
        let Some(script) = entry.script.as_ref() else {
            return fail(out, isc::DSQL_ERROR);
        };
        if let Some(code) = script.execute_error {
            return fail(out, code);
        }
        if singleton {
            xdr::write_int(out, Operation::SqlResponse.code());
            match script.rows.first() {
                Some(row) => {
                    xdr::write_int(out, 1);
                    entry.output.encode(row, out)?;
                }
                None => xdr::write_int(out, 0),
            }
        } else if script.has_cursor() {
            entry.cursor = Some(script.rows.iter().cloned().collect());
        }
        ok(out, 0)
    }

    fn fetch(&mut self, statement: i32, fetch_size: i32, out: &mut BytesMut) -> Result<()> {
        let Some(entry) = self.statements.get_mut(&statement) else {
            return fail(out, BAD_STATEMENT_HANDLE);
        };
        let Some(cursor) = entry.cursor.as_mut() else {
            return fail(out, CURSOR_NOT_OPEN);
        };
        let batch = usize::try_from(fetch_size).unwrap_or(0).max(1);
        for _ in 0..batch {
            let Some(row) = cursor.pop_front() else {
                break;
            };
            xdr::write_int(out, Operation::FetchResponse.code());
            xdr::write_int(out, fetch::STATUS_OK);
            xdr::write_int(out, 1);
            entry.output.encode(&row, out)?;
        }
        let status = if cursor.is_empty() {
            fetch::STATUS_EOF
        } else {
            fetch::STATUS_OK
        };
        xdr::write_int(out, Operation::FetchResponse.code());
        xdr::write_int(out, status);
        xdr::write_int(out, 0);
        Ok(())
    }

    fn get_segment(&mut self, blob: i32, length: i32, out: &mut BytesMut) -> Result<()> {
        let Some(BlobCursor::Reading { segments }) = self.blobs.get_mut(&blob) else {
            return fail(out, BAD_BLOB_HANDLE);
        };
        let Some(mut next) = segments.pop_front() else {
            return respond(out, segment::EOF, 0, Bytes::new(), ServerStatus::default());
        };
        // the requested length includes the two-byte segment length
        let room = usize::try_from(length).unwrap_or(0).saturating_sub(2).max(1);
        let status = if next.len() > room {
            let rest = next.split_off(room);
            segments.push_front(rest);
            segment::PARTIAL
        } else {
            segment::COMPLETE
        };
        let mut data = BytesMut::with_capacity(next.len() + 2);
        data.put_u16_le(next.len() as u16);
        data.extend_from_slice(&next);
        respond(out, status, 0, data.freeze(), ServerStatus::default())
    }
}

fn described(fields: &[MockField]) -> RowDescriptor {
    fields.iter().map(MockField::described).collect()
}

fn respond(
    out: &mut BytesMut,
    object: i32,
    blob_id: i64,
    data: Bytes,
    status: ServerStatus,
) -> Result<()> {
    GenericResponse {
        object,
        blob_id,
        data,
        status,
    }
    .encode(out)?;
    Ok(())
}

fn ok(out: &mut BytesMut, object: i32) -> Result<()> {
    respond(out, object, 0, Bytes::new(), ServerStatus::default())
}

fn fail(out: &mut BytesMut, code: i32) -> Result<()> {
    respond(out, 0, 0, Bytes::new(), ServerStatus::error(code))
}

fn cluster(dst: &mut Vec<u8>, item: u8, value: &[u8]) {
    dst.push(item);
    dst.extend_from_slice(&(value.len() as u16).to_le_bytes());
    dst.extend_from_slice(value);
}

/// Describe info for `statement`.
///
/// `from` continues a section at a 1-based variable index. At most `limit`
/// variables are described before the response is truncated.
fn describe(statement: &MockStatement, from: Option<(u8, usize)>, limit: Option<usize>) -> Bytes {
    let mut dst = Vec::new();
    let mut budget = limit.unwrap_or(usize::MAX);
    let sections = match from {
        Some(section) => vec![section],
        None => {
            cluster(&mut dst, sql_info::STMT_TYPE, &statement.statement_type.to_le_bytes());
            vec![(sql_info::SELECT, 1), (sql_info::BIND, 1)]
        }
    };

    for (section, start) in sections {
        let variables = if section == sql_info::SELECT {
            &statement.fields
        } else {
            &statement.parameters
        };
        dst.push(section);
        cluster(
            &mut dst,
            sql_info::DESCRIBE_VARS,
            &(variables.len() as i32).to_le_bytes(),
        );
        for (index, field) in variables.iter().enumerate().skip(start.saturating_sub(1)) {
            if budget == 0 {
                dst.push(info::TRUNCATED);
                return Bytes::from(dst);
            }
            budget -= 1;
            describe_variable(&mut dst, index + 1, field);
        }
    }
    dst.push(info::END);
    Bytes::from(dst)
}

fn describe_variable(dst: &mut Vec<u8>, index: usize, field: &MockField) {
    let d = &field.descriptor;
    cluster(dst, sql_info::SQLDA_SEQ, &(index as i32).to_le_bytes());
    cluster(dst, sql_info::TYPE, &d.wire_type().to_le_bytes());
    cluster(dst, sql_info::SUB_TYPE, &i32::from(d.sub_type).to_le_bytes());
    cluster(dst, sql_info::SCALE, &i32::from(d.scale).to_le_bytes());
    cluster(dst, sql_info::LENGTH, &d.length.to_le_bytes());
    cluster(dst, sql_info::FIELD, field.name.as_bytes());
    cluster(dst, sql_info::ALIAS, field.name.as_bytes());
    cluster(dst, sql_info::RELATION, b"");
    cluster(dst, sql_info::RELATION_ALIAS, b"");
    cluster(dst, sql_info::OWNER, b"");
    dst.push(sql_info::DESCRIBE_END);
}

/// Kind of parameter buffer carried by `operation`, if any.
pub fn parameter_buffer_kind(operation: Operation) -> Option<ParameterBufferKind> {
    match operation {
        Operation::Attach => Some(ParameterBufferKind::Database),
        Operation::Transaction => Some(ParameterBufferKind::Transaction),
        Operation::CreateBlob2 | Operation::OpenBlob2 => Some(ParameterBufferKind::Blob),
        Operation::Connect => Some(ParameterBufferKind::ConnectIdentification),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use fb_protocol::{DescribeParser, DescribeProgress, Frame, ProtocolOffer, SqlType};

    fn offer(version: ProtocolVersion, max_type: ProtocolType, weight: i32) -> ProtocolOffer {
        ProtocolOffer {
            version,
            architecture: Architecture::Generic,
            min_type: ProtocolType::Rpc,
            max_type,
            weight,
        }
    }

    fn session(config: MockServerConfig) -> Session {
        let shared = Arc::new(Mutex::new(Shared {
            connections: 0,
            connects: Vec::new(),
            requests: Vec::new(),
            keepalives: 0,
            commit_failures: config.commit_failures,
            blobs: HashMap::new(),
            next_blob_id: FIRST_BLOB_ID,
        }));
        Session::new(Arc::new(config), shared)
    }

    fn connect_request(offers: Vec<ProtocolOffer>) -> ConnectRequest {
        ConnectRequest {
            database: "test.fdb".into(),
            user_identification: Bytes::new(),
            offers,
        }
    }

    fn statement(fields: usize, parameters: usize) -> MockStatement {
        let field = |i| MockField::new(format!("F{i}"), TypeDescriptor::new(SqlType::Long));
        MockStatement::select((1..=fields).map(field).collect(), Vec::new())
            .with_parameters((1..=parameters).map(field).collect())
    }

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockFirebirdServer::builder().build().await.unwrap();
        assert!(server.port() > 0);
        assert_eq!(server.host(), "127.0.0.1");
        assert_eq!(server.connection_count(), 0);
        assert!(server.requests().is_empty());
    }

    #[test]
    fn test_negotiation_picks_heaviest_supported_offer() {
        let config = MockServerConfig {
            versions: vec![ProtocolVersion::V10, ProtocolVersion::V11],
            ..MockServerConfig::default()
        };
        let accept = session(config)
            .negotiate(&connect_request(vec![
                offer(ProtocolVersion::V8, ProtocolType::BatchSend, 1),
                offer(ProtocolVersion::V10, ProtocolType::BatchSend, 2),
                offer(ProtocolVersion::V12, ProtocolType::LazySend, 4),
            ]))
            .unwrap();
        assert_eq!(accept.version, ProtocolVersion::V10);
        assert_eq!(accept.protocol_type, ProtocolType::BatchSend.code());
    }

    #[test]
    fn test_negotiation_caps_protocol_type() {
        let config = MockServerConfig {
            max_protocol_type: ProtocolType::BatchSend,
            ..MockServerConfig::default()
        };
        let accept = session(config)
            .negotiate(&connect_request(vec![offer(
                ProtocolVersion::V11,
                ProtocolType::LazySend,
                2,
            )]))
            .unwrap();
        assert_eq!(accept.accepted_type(), Some(ProtocolType::BatchSend));
    }

    #[test]
    fn test_negotiation_without_overlap() {
        let config = MockServerConfig {
            versions: vec![ProtocolVersion::V12],
            ..MockServerConfig::default()
        };
        let mut session = session(config);
        let request = connect_request(vec![offer(ProtocolVersion::V10, ProtocolType::BatchSend, 1)]);
        assert!(session.negotiate(&request).is_none());

        let mut out = BytesMut::new();
        assert!(!session.connect(request, &mut out));
        assert_eq!(Frame::decode(&mut out.freeze(), None).unwrap(), Frame::Reject);
    }

    #[test]
    fn test_describe_is_parsed_by_the_client_parser() {
        let data = describe(&statement(2, 1), None, None);
        let mut parser = DescribeParser::new();
        assert_eq!(parser.feed(&data).unwrap(), DescribeProgress::Complete);
        let description = parser.finish();
        assert_eq!(description.fields.len(), 2);
        assert_eq!(description.fields[1].field_name, "F2");
        assert_eq!(description.parameters.len(), 1);
    }

    #[test]
    fn test_truncated_describe_continues() {
        let script = statement(3, 2);
        let mut parser = DescribeParser::new();
        let mut data = describe(&script, None, Some(2));
        let mut rounds = 1;
        while let DescribeProgress::Continue(items) = parser.feed(&data).unwrap() {
            let mut src = &items[..];
            src.advance(3);
            let start = usize::from(src.get_u16_le());
            data = describe(&script, Some((src.get_u8(), start)), Some(2));
            rounds += 1;
        }
        let description = parser.finish();
        assert!(rounds > 1);
        let names: Vec<_> = description.fields.iter().map(|f| f.field_name.as_str()).collect();
        assert_eq!(names, vec!["F1", "F2", "F3"]);
        assert_eq!(description.parameters.len(), 2);
    }

    #[test]
    fn test_parameter_buffer_kind() {
        assert_eq!(
            parameter_buffer_kind(Operation::Attach),
            Some(ParameterBufferKind::Database)
        );
        assert_eq!(parameter_buffer_kind(Operation::Fetch), None);
    }
}
