//! Segmented blob handles.
//!
//! Blob contents travel outside the rows that reference them: a row only
//! carries the 8-byte blob id. [`InputBlob`] reads an existing blob segment
//! by segment, [`OutputBlob`] creates a new one and returns its id for use
//! as a statement parameter.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut tx = db.start_transaction(&TransactionOptions::default()).await?;
//!
//! let mut blob = db.create_blob(&tx, BlobOptions::default()).await?;
//! blob.put(b"first segment").await?;
//! blob.put(b"second segment").await?;
//! let blob_id = blob.blob_id();
//! blob.close().await?;
//!
//! let mut blob = db.open_blob(&tx, blob_id, BlobOptions::default()).await?;
//! let data = blob.read_to_end().await?;
//! blob.close().await?;
//! ```

use bytes::{Bytes, BytesMut};
use fb_protocol::consts::segment::MAX_SEGMENT_SIZE;
use fb_protocol::{Operation, ProtocolVersion};

use crate::database::Database;
use crate::error::{Error, Result};
use crate::protocol::{BlobExchange, ParameterBufferEncoder, SegmentStatus};
use crate::state::BlobState;
use crate::transaction::Transaction;

/// Blob parameters sent on create and open.
///
/// With every field at its default no parameter buffer is sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct BlobOptions {
    /// Stream blob instead of segmented.
    pub stream: bool,
    /// Sub-type of the stored data.
    pub source_type: Option<i16>,
    /// Sub-type to convert to.
    pub target_type: Option<i16>,
    /// Character set of the stored data.
    pub source_interp: Option<i16>,
    /// Character set to convert to.
    pub target_interp: Option<i16>,
}

impl BlobOptions {
    /// Default options: segmented, no conversion.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stream flag.
    #[must_use]
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Convert from `source` to `target` sub-type.
    #[must_use]
    pub fn sub_types(mut self, source: i16, target: i16) -> Self {
        self.source_type = Some(source);
        self.target_type = Some(target);
        self
    }

    /// Convert from `source` to `target` character set.
    #[must_use]
    pub fn character_sets(mut self, source: i16, target: i16) -> Self {
        self.source_interp = Some(source);
        self.target_interp = Some(target);
        self
    }
}

/// Shared part of input and output blobs.
struct BlobHandle<'a> {
    database: &'a Database,
    transaction: &'a Transaction<'a>,
    exchange: &'static dyn BlobExchange,
    parameters: &'static dyn ParameterBufferEncoder,
    options: BlobOptions,
    blob_id: i64,
    handle: Option<i32>,
    state: BlobState,
}

impl<'a> BlobHandle<'a> {
    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            handle: "blob",
            state: self.state.name(),
            operation,
        }
    }

    fn ensure_new(&self, operation: &'static str) -> Result<()> {
        if self.state != BlobState::New {
            return Err(self.invalid_state(operation));
        }
        self.transaction.ensure_usable(operation)
    }

    fn open_handle(&self, operation: &'static str) -> Result<i32> {
        match (self.state, self.handle) {
            (BlobState::Open | BlobState::Eof, Some(handle)) => Ok(handle),
            _ => Err(self.invalid_state(operation)),
        }
    }

    fn bpb(&self) -> Result<Bytes> {
        Ok(self.parameters.blob_buffer(&self.options).serialize()?)
    }

    async fn release(&mut self, operation: Operation) -> Result<()> {
        let handle = match (self.state, self.handle) {
            (BlobState::Closed, _) => return Ok(()),
            (_, None) => {
                self.state = BlobState::Closed;
                return Ok(());
            }
            (_, Some(handle)) => handle,
        };
        {
            let mut channel = self.database.channel().await;
            self.exchange.release(&mut channel, handle, operation).await?;
        }
        tracing::debug!(handle, ?operation, "blob released");
        self.state = BlobState::Closed;
        Ok(())
    }
}

/// A blob opened for reading.
pub struct InputBlob<'a> {
    inner: BlobHandle<'a>,
}

impl<'a> InputBlob<'a> {
    pub(crate) fn new(
        database: &'a Database,
        transaction: &'a Transaction<'a>,
        exchange: &'static dyn BlobExchange,
        parameters: &'static dyn ParameterBufferEncoder,
        options: BlobOptions,
        blob_id: i64,
    ) -> Self {
        Self {
            inner: BlobHandle {
                database,
                transaction,
                exchange,
                parameters,
                options,
                blob_id,
                handle: None,
                state: BlobState::New,
            },
        }
    }

    /// Id of the blob being read.
    #[must_use]
    pub fn blob_id(&self) -> i64 {
        self.inner.blob_id
    }

    /// Server handle, once opened.
    #[must_use]
    pub fn handle(&self) -> Option<i32> {
        self.inner.handle
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BlobState {
        self.inner.state
    }

    /// Whether every segment was read.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.inner.state == BlobState::Eof
    }

    /// Protocol version whose exchanges this blob uses.
    #[must_use]
    pub fn origin(&self) -> ProtocolVersion {
        self.inner.exchange.origin()
    }

    /// Send `op_open_blob2`.
    pub async fn open(&mut self) -> Result<()> {
        self.inner.ensure_new("open blob")?;
        let bpb = self.inner.bpb()?;
        let handle = {
            let mut channel = self.inner.database.channel().await;
            self.inner
                .exchange
                .open(
                    &mut channel,
                    self.inner.transaction.handle(),
                    bpb,
                    self.inner.blob_id,
                )
                .await?
        };
        tracing::debug!(handle, blob_id = self.inner.blob_id, "blob opened");
        self.inner.handle = Some(handle);
        self.inner.state = BlobState::Open;
        Ok(())
    }

    /// Read up to `max_length` bytes of segment data.
    ///
    /// Returns an empty buffer once the end of the blob was reached.
    pub async fn get_segment(&mut self, max_length: usize) -> Result<Bytes> {
        let handle = self.inner.open_handle("get segment")?;
        if self.inner.state == BlobState::Eof {
            return Ok(Bytes::new());
        }
        let max_length = max_length.clamp(1, MAX_SEGMENT_SIZE);
        let segment = {
            let mut channel = self.inner.database.channel().await;
            self.inner
                .exchange
                .get_segment(&mut channel, handle, i32::try_from(max_length).unwrap_or(i32::MAX))
                .await?
        };
        if segment.status == SegmentStatus::Eof {
            tracing::debug!(handle, "blob at end");
            self.inner.state = BlobState::Eof;
        }
        Ok(segment.data)
    }

    /// Read the rest of the blob.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        let mut data = BytesMut::new();
        while !self.is_eof() {
            let segment = self.get_segment(MAX_SEGMENT_SIZE).await?;
            data.extend_from_slice(&segment);
        }
        Ok(data.freeze())
    }

    /// Send `op_close_blob`.
    pub async fn close(&mut self) -> Result<()> {
        self.inner.release(Operation::CloseBlob).await
    }
}

/// A new blob opened for writing.
pub struct OutputBlob<'a> {
    inner: BlobHandle<'a>,
}

impl<'a> OutputBlob<'a> {
    pub(crate) fn new(
        database: &'a Database,
        transaction: &'a Transaction<'a>,
        exchange: &'static dyn BlobExchange,
        parameters: &'static dyn ParameterBufferEncoder,
        options: BlobOptions,
    ) -> Self {
        Self {
            inner: BlobHandle {
                database,
                transaction,
                exchange,
                parameters,
                options,
                blob_id: 0,
                handle: None,
                state: BlobState::New,
            },
        }
    }

    /// Id of the new blob, valid once opened.
    #[must_use]
    pub fn blob_id(&self) -> i64 {
        self.inner.blob_id
    }

    /// Server handle, once opened.
    #[must_use]
    pub fn handle(&self) -> Option<i32> {
        self.inner.handle
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BlobState {
        self.inner.state
    }

    /// Protocol version whose exchanges this blob uses.
    #[must_use]
    pub fn origin(&self) -> ProtocolVersion {
        self.inner.exchange.origin()
    }

    /// Send `op_create_blob2`.
    pub async fn open(&mut self) -> Result<()> {
        self.inner.ensure_new("create blob")?;
        let bpb = self.inner.bpb()?;
        let (handle, blob_id) = {
            let mut channel = self.inner.database.channel().await;
            self.inner
                .exchange
                .create(&mut channel, self.inner.transaction.handle(), bpb)
                .await?
        };
        tracing::debug!(handle, blob_id, "blob created");
        self.inner.handle = Some(handle);
        self.inner.blob_id = blob_id;
        self.inner.state = BlobState::Open;
        Ok(())
    }

    /// Append `data` as one or more segments.
    pub async fn put(&mut self, data: &[u8]) -> Result<()> {
        let handle = self.inner.open_handle("put segment")?;
        if data.is_empty() {
            return Ok(());
        }
        let mut channel = self.inner.database.channel().await;
        self.inner.exchange.put_segment(&mut channel, handle, data).await
    }

    /// Send `op_close_blob`; the blob becomes visible under its id.
    pub async fn close(&mut self) -> Result<()> {
        self.inner.release(Operation::CloseBlob).await
    }

    /// Send `op_cancel_blob`; the blob is discarded.
    pub async fn cancel(&mut self) -> Result<()> {
        self.inner.release(Operation::CancelBlob).await
    }
}

impl std::fmt::Debug for InputBlob<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputBlob")
            .field("blob_id", &self.inner.blob_id)
            .field("handle", &self.inner.handle)
            .field("state", &self.inner.state)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for OutputBlob<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBlob")
            .field("blob_id", &self.inner.blob_id)
            .field("handle", &self.inner.handle)
            .field("state", &self.inner.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = BlobOptions::default();
        assert!(!options.stream);
        assert!(options.source_type.is_none());
        assert!(options.target_interp.is_none());
    }

    #[test]
    fn test_options_builder() {
        let options = BlobOptions::new()
            .stream(true)
            .sub_types(0, 1)
            .character_sets(4, 0);
        assert!(options.stream);
        assert_eq!(options.source_type, Some(0));
        assert_eq!(options.target_type, Some(1));
        assert_eq!(options.source_interp, Some(4));
        assert_eq!(options.target_interp, Some(0));
    }
}
