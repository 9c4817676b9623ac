//! Request/response exchanges over one wire connection.
//!
//! A [`Channel`] owns the connection of a database and is only reachable
//! through the database's lock, so one exchange runs at a time. Requests
//! whose response is not needed right away are deferred: they travel with
//! the next request and their responses are consumed before its own.

use std::sync::Arc;

use bytes::Bytes;
use fb_codec::{CancelHandle, CodecError, WireConnection};
use fb_protocol::consts::isc;
use fb_protocol::{Frame, GenericResponse, ProtocolType, Request, RowShape, ServerStatus};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};

/// A byte stream a connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased transport of a connection.
pub type BoxedTransport = Box<dyn Transport>;

/// Warnings received on a connection.
#[derive(Debug, Default)]
pub(crate) struct Notices {
    pub(crate) warnings: Vec<ServerStatus>,
    /// The server reset the connection dialect to the database dialect.
    pub(crate) dialect_reset: bool,
}

/// Notices shared between a channel and its database handle.
pub(crate) type WarningLog = Arc<Mutex<Notices>>;

#[derive(Debug)]
struct Deferred {
    operation: &'static str,
    packet: Bytes,
}

/// Serialized access to a wire connection.
pub struct Channel {
    conn: WireConnection<BoxedTransport>,
    protocol_type: ProtocolType,
    deferred: Vec<Deferred>,
    warnings: WarningLog,
}

impl Channel {
    pub(crate) fn new(conn: WireConnection<BoxedTransport>, warnings: WarningLog) -> Self {
        Self {
            conn,
            protocol_type: ProtocolType::Rpc,
            deferred: Vec::new(),
            warnings,
        }
    }

    pub(crate) fn set_protocol_type(&mut self, protocol_type: ProtocolType) {
        self.protocol_type = protocol_type;
    }

    /// Whether requests may be deferred on this connection.
    pub(crate) fn lazy_send(&self) -> bool {
        self.protocol_type == ProtocolType::LazySend
    }

    pub(crate) fn cancel_handle(&self) -> CancelHandle<BoxedTransport> {
        self.conn.cancel_handle()
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.conn.is_broken()
    }

    pub(crate) fn keepalives_sent(&self) -> u64 {
        self.conn.keepalives_sent()
    }

    pub(crate) fn set_row_shape(&mut self, shape: Option<RowShape>) {
        self.conn.set_row_shape(shape);
    }

    /// Number of deferred requests not yet sent.
    pub(crate) fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Queue a request to travel with the next one.
    pub(crate) fn defer(&mut self, operation: &'static str, request: &Request) -> Result<()> {
        let packet = request
            .to_bytes()
            .map_err(|e| Error::protocol(operation, e))?;
        tracing::debug!(operation, "deferring request");
        self.deferred.push(Deferred { operation, packet });
        Ok(())
    }

    /// Send requests in one write, preceded by all deferred requests.
    ///
    /// Responses to the deferred requests are read before returning; server
    /// failures among them are logged, not returned.
    pub(crate) async fn send(&mut self, requests: &[(&'static str, &Request)]) -> Result<()> {
        let operation = requests.first().map_or("flush", |(op, _)| *op);
        let mut packets = Vec::with_capacity(self.deferred.len() + requests.len());
        for (op, request) in requests {
            packets.push(request.to_bytes().map_err(|e| Error::protocol(op, e))?);
        }

        let deferred = std::mem::take(&mut self.deferred);
        tracing::debug!(
            operation,
            requests = requests.len(),
            deferred = deferred.len(),
            "sending"
        );
        let batch: Vec<Bytes> = deferred
            .iter()
            .map(|d| d.packet.clone())
            .chain(packets)
            .collect();
        self.conn
            .send_batch(batch)
            .await
            .map_err(|e| Error::transport(operation, e))?;

        for d in deferred {
            match self.receive_response(d.operation).await {
                Ok(_) => tracing::debug!(operation = d.operation, "deferred request completed"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::warn!(
                    operation = d.operation,
                    error = %e,
                    "deferred request failed"
                ),
            }
        }
        Ok(())
    }

    /// Send one request and read its generic response.
    pub(crate) async fn exchange(
        &mut self,
        operation: &'static str,
        request: &Request,
    ) -> Result<GenericResponse> {
        self.send(&[(operation, request)]).await?;
        self.receive_response(operation).await
    }

    /// Read the next frame.
    pub(crate) async fn receive(&mut self, operation: &'static str) -> Result<Frame> {
        match self.conn.receive().await {
            Ok(Frame::Disconnect) => {
                self.conn.mark_broken();
                Err(Error::transport(operation, CodecError::ConnectionClosed))
            }
            Ok(frame) => Ok(frame),
            Err(e) => Err(Error::transport(operation, e)),
        }
    }

    /// Read a generic response; an error status becomes [`Error::Server`].
    pub(crate) async fn receive_response(
        &mut self,
        operation: &'static str,
    ) -> Result<GenericResponse> {
        match self.receive(operation).await? {
            Frame::Response(response) => self.check(operation, response),
            other => Err(self.unexpected(operation, &other)),
        }
    }

    /// Record warnings and turn an error status into an error.
    pub(crate) fn check(
        &mut self,
        operation: &'static str,
        response: GenericResponse,
    ) -> Result<GenericResponse> {
        if response.status.has_warnings() {
            tracing::warn!(operation, status = %response.status, "server warning");
            let mut notices = self.warnings.lock();
            if response.status.has_code(isc::DIALECT_RESET_WARNING) {
                notices.dialect_reset = true;
            }
            notices.warnings.push(response.status.clone());
        }
        if response.status.is_error() {
            tracing::debug!(operation, status = %response.status, "server reported failure");
            return Err(Error::Server {
                operation,
                handle: None,
                status: response.status,
            });
        }
        Ok(response)
    }

    /// Build a malformed-response error and refuse further use.
    pub(crate) fn unexpected(&mut self, operation: &'static str, frame: &Frame) -> Error {
        self.protocol_violation(
            operation,
            format!("unexpected {:?} frame", frame.operation()),
        )
    }

    /// Build a malformed-response error and refuse further use.
    pub(crate) fn protocol_violation(
        &mut self,
        operation: &'static str,
        detail: impl Into<String>,
    ) -> Error {
        self.conn.mark_broken();
        Error::malformed(operation, detail)
    }

    /// Shut the connection down without sending anything.
    pub(crate) async fn close(&mut self) -> Result<()> {
        self.deferred.clear();
        self.conn
            .close()
            .await
            .map_err(|e| Error::transport("close", e))
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("conn", &self.conn)
            .field("protocol_type", &self.protocol_type)
            .field("deferred", &self.deferred.len())
            .finish_non_exhaustive()
    }
}
