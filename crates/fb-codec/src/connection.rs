//! Split I/O connection with read timeout and keep-alive.
//!
//! The transport is split into separate read and write halves so that
//! keep-alive (`op_dummy`) and cancel (`op_cancel`) packets can be written
//! while a read is pending.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fb_protocol::{Frame, Request, RowShape};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::error::CodecError;
use crate::framed::{FrameReader, FrameWriter};

/// Timeout configuration for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Time allowed for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Time allowed for a response to arrive, `None` to wait forever.
    pub read_timeout: Option<Duration>,
    /// Interval of keep-alive packets while waiting for a response.
    pub keepalive_interval: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            read_timeout: None,
            keepalive_interval: None,
        }
    }
}

impl TimeoutConfig {
    /// Create a new timeout configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the keep-alive interval.
    #[must_use]
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }
}

type SharedWriter<T> = Arc<Mutex<FrameWriter<WriteHalf<T>>>>;

/// A protocol connection with split I/O.
///
/// The connection is strictly request/response: callers serialize access
/// (the client holds it behind a mutex) and read every response they
/// asked for. After a timeout or I/O failure the stream position is
/// unknown, so the write half is shut down and the connection refuses
/// further use.
pub struct WireConnection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Read half wrapped in a frame reader.
    reader: FrameReader<ReadHalf<T>>,
    /// Write half protected by mutex for concurrent keep-alive and cancel access.
    writer: SharedWriter<T>,
    timeouts: TimeoutConfig,
    broken: bool,
    closed: bool,
    keepalives_sent: u64,
}

/// Open a TCP connection to `host:port` within `connect_timeout`.
///
/// Nagle's algorithm is disabled; every request is a complete message.
pub async fn connect_tcp(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream, CodecError> {
    tracing::debug!(host, port, "opening connection");
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| CodecError::Timeout {
            operation: "connect",
            after: connect_timeout,
        })??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

impl WireConnection<TcpStream> {
    /// Connect to `host:port` within the configured connect timeout.
    pub async fn open(host: &str, port: u16, timeouts: TimeoutConfig) -> Result<Self, CodecError> {
        let stream = connect_tcp(host, port, timeouts.connect_timeout).await?;
        Ok(Self::new(stream, timeouts))
    }
}

impl<T> WireConnection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new connection from a transport.
    ///
    /// The transport is immediately split into read and write halves.
    pub fn new(transport: T, timeouts: TimeoutConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);

        Self {
            reader: FrameReader::new(read_half),
            writer: Arc::new(Mutex::new(FrameWriter::new(write_half))),
            timeouts,
            broken: false,
            closed: false,
            keepalives_sent: 0,
        }
    }

    /// Get a handle for sending `op_cancel` while a response is pending.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle<T> {
        CancelHandle {
            writer: Arc::clone(&self.writer),
        }
    }

    /// Timeouts of this connection.
    #[must_use]
    pub fn timeouts(&self) -> TimeoutConfig {
        self.timeouts
    }

    /// Whether an earlier failure made the connection unusable.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken || self.closed
    }

    /// Number of keep-alive packets sent so far.
    #[must_use]
    pub fn keepalives_sent(&self) -> u64 {
        self.keepalives_sent
    }

    /// Install the row shape for following fetch and singleton responses.
    pub fn set_row_shape(&mut self, shape: Option<RowShape>) {
        self.reader.codec_mut().set_row_shape(shape);
    }

    /// Refuse further use after the caller found the stream inconsistent.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    fn ensure_usable(&self) -> Result<(), CodecError> {
        if self.broken {
            return Err(CodecError::Broken);
        }
        if self.closed {
            return Err(CodecError::ConnectionClosed);
        }
        Ok(())
    }

    fn poison<R>(&mut self, result: Result<R, CodecError>) -> Result<R, CodecError> {
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    /// Send one encoded request and flush it.
    pub async fn send(&mut self, request: Bytes) -> Result<(), CodecError> {
        self.send_batch([request]).await
    }

    /// Send several encoded requests with a single flush.
    pub async fn send_batch<I>(&mut self, requests: I) -> Result<(), CodecError>
    where
        I: IntoIterator<Item = Bytes>,
    {
        self.ensure_usable()?;
        let result = {
            let mut writer = self.writer.lock().await;
            let mut result = Ok(());
            for request in requests {
                if let Err(e) = writer.feed(request).await {
                    result = Err(e);
                    break;
                }
            }
            match result {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        self.poison(result)
    }

    /// Receive the next frame.
    ///
    /// Inbound `op_dummy` frames are skipped. While waiting, `op_dummy` is
    /// sent every keep-alive interval; the timer is dropped as soon as a
    /// frame arrives. Exceeding the read timeout breaks the connection.
    pub async fn receive(&mut self) -> Result<Frame, CodecError> {
        self.ensure_usable()?;

        let deadline = self.timeouts.read_timeout.map(|t| Instant::now() + t);
        let mut keepalive = self.timeouts.keepalive_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let result = loop {
            tokio::select! {
                frame = self.reader.next() => match frame {
                    Some(Ok(Frame::Dummy)) => {
                        tracing::trace!("ignoring inbound keep-alive");
                    }
                    Some(Ok(frame)) => break Ok(frame),
                    Some(Err(e)) => break Err(e),
                    None => break Err(CodecError::ConnectionClosed),
                },
                () = sleep_until(deadline) => {
                    break Err(CodecError::Timeout {
                        operation: "receive",
                        after: self.timeouts.read_timeout.unwrap_or_default(),
                    });
                }
                () = tick(&mut keepalive) => {
                    tracing::debug!("response pending, sending keep-alive");
                    if let Err(e) = self.write_dummy().await {
                        break Err(e);
                    }
                }
            }
        };

        if let Err(e) = &result {
            tracing::warn!(error = %e, "receive failed, connection is no longer usable");
            self.broken = true;
            self.shutdown_writer().await;
        }
        result
    }

    /// Shut down the write half after a fatal failure; the peer sees the
    /// connection end even while the handle stays alive.
    async fn shutdown_writer(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.get_mut().shutdown().await {
            tracing::debug!(error = %e, "shutdown after failure");
        }
    }

    async fn write_dummy(&mut self) -> Result<(), CodecError> {
        let dummy = Request::Dummy.to_bytes()?;
        let mut writer = self.writer.lock().await;
        writer.send(dummy).await?;
        self.keepalives_sent += 1;
        Ok(())
    }

    /// Shut down the write half.
    ///
    /// No request is sent; detaching is the caller's business.
    pub async fn close(&mut self) -> Result<(), CodecError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut writer = self.writer.lock().await;
        writer.get_mut().shutdown().await?;
        tracing::debug!("connection closed");
        Ok(())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl<T> std::fmt::Debug for WireConnection<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireConnection")
            .field("timeouts", &self.timeouts)
            .field("broken", &self.broken)
            .field("closed", &self.closed)
            .field("keepalives_sent", &self.keepalives_sent)
            .finish_non_exhaustive()
    }
}

/// Handle for sending `op_cancel` on a connection.
///
/// This can be cloned and sent to other tasks to enable cancellation
/// from a different async context.
pub struct CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    writer: SharedWriter<T>,
}

impl<T> CancelHandle<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Send `op_cancel` with the given kind.
    ///
    /// The server answers the cancelled request with an error response; the
    /// task waiting for that response receives it as usual.
    pub async fn cancel(&self, kind: i32) -> Result<(), CodecError> {
        tracing::debug!(kind, "sending cancel request");
        let request = Request::Cancel { kind }.to_bytes()?;
        let mut writer = self.writer.lock().await;
        writer.send(request).await
    }
}

impl<T> Clone for CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<T> std::fmt::Debug for CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use fb_protocol::consts::{Operation, cancel};
    use fb_protocol::{GenericResponse, xdr};
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn pair(timeouts: TimeoutConfig) -> (WireConnection<DuplexStream>, DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        (WireConnection::new(client, timeouts), server)
    }

    fn response(object: i32) -> Bytes {
        let mut buf = BytesMut::new();
        GenericResponse {
            object,
            ..GenericResponse::default()
        }
        .encode(&mut buf)
        .unwrap();
        buf.freeze()
    }

    async fn read_ops(server: &mut DuplexStream) -> Vec<i32> {
        let mut buf = vec![0u8; 4096];
        let n = server.read(&mut buf).await.unwrap();
        let mut src = &buf[..n];
        let mut ops = Vec::new();
        while src.len() >= 4 {
            ops.push(xdr::read_int(&mut src).unwrap());
        }
        ops
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (mut conn, mut server) = pair(TimeoutConfig::default());

        conn.send(Request::Detach { database: 3 }.to_bytes().unwrap())
            .await
            .unwrap();
        assert_eq!(read_ops(&mut server).await, vec![21, 3]);

        server.write_all(&response(7)).await.unwrap();
        let Frame::Response(r) = conn.receive().await.unwrap() else {
            panic!("expected response");
        };
        assert_eq!(r.object, 7);
    }

    #[tokio::test]
    async fn test_scripted_exchange() {
        let request = Request::Detach { database: 3 }.to_bytes().unwrap();
        let transport = tokio_test::io::Builder::new()
            .write(&request)
            .read(&response(9))
            .build();
        let mut conn = WireConnection::new(transport, TimeoutConfig::default());

        conn.send(request).await.unwrap();
        let frame = conn.receive().await.unwrap();
        assert!(matches!(frame, Frame::Response(r) if r.object == 9));
        assert!(!conn.is_broken());
    }

    #[tokio::test]
    async fn test_inbound_dummy_is_skipped() {
        let (mut conn, mut server) = pair(TimeoutConfig::default());
        server
            .write_all(&Operation::Dummy.code().to_be_bytes())
            .await
            .unwrap();
        server.write_all(&response(1)).await.unwrap();

        assert!(matches!(conn.receive().await.unwrap(), Frame::Response(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_breaks_connection() {
        let (mut conn, _server) =
            pair(TimeoutConfig::new().read_timeout(Duration::from_secs(5)));

        let err = conn.receive().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(conn.is_broken());
        assert!(matches!(
            conn.send(Bytes::from_static(&[0, 0, 0, 71])).await,
            Err(CodecError::Broken)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_closes_write_half() {
        let (mut conn, mut server) =
            pair(TimeoutConfig::new().read_timeout(Duration::from_secs(5)));

        assert!(conn.receive().await.unwrap_err().is_timeout());
        let mut buf = [0u8; 16];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
        assert!(matches!(conn.receive().await, Err(CodecError::Broken)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_while_waiting() {
        let (mut conn, mut server) = pair(
            TimeoutConfig::new()
                .read_timeout(Duration::from_secs(10))
                .keepalive_interval(Duration::from_secs(1)),
        );

        assert!(conn.receive().await.unwrap_err().is_timeout());
        assert!(conn.keepalives_sent() >= 5);

        let ops = read_ops(&mut server).await;
        assert!(ops.len() as u64 == conn.keepalives_sent());
        assert!(ops.iter().all(|op| *op == Operation::Dummy.code()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_stops_after_response() {
        let (mut conn, mut server) =
            pair(TimeoutConfig::new().keepalive_interval(Duration::from_secs(1)));

        server.write_all(&response(1)).await.unwrap();
        conn.receive().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(conn.keepalives_sent(), 0);
    }

    #[tokio::test]
    async fn test_cancel_handle() {
        let (conn, mut server) = pair(TimeoutConfig::default());
        let handle = conn.cancel_handle();

        handle.clone().cancel(cancel::RAISE).await.unwrap();
        assert_eq!(read_ops(&mut server).await, vec![91, cancel::RAISE]);
    }

    #[tokio::test]
    async fn test_peer_close() {
        let (mut conn, server) = pair(TimeoutConfig::default());
        drop(server);
        assert!(matches!(
            conn.receive().await,
            Err(CodecError::ConnectionClosed)
        ));
        assert!(conn.is_broken());
    }

    #[tokio::test]
    async fn test_close_rejects_further_use() {
        let (mut conn, _server) = pair(TimeoutConfig::default());
        conn.close().await.unwrap();
        assert!(matches!(
            conn.receive().await,
            Err(CodecError::ConnectionClosed)
        ));
    }
}
