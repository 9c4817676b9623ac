//! Firebird frame codec implementation.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use fb_protocol::{Frame, RowShape};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Default upper bound for a buffered, not yet decodable frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Codec for opcode-tagged protocol frames.
///
/// The protocol has no length header; a frame is complete once its grammar
/// can be decoded from the buffered bytes. Rows inside fetch responses are
/// decoded with the row shape installed by the statement that is fetching.
#[derive(Debug, Clone)]
pub struct WireCodec {
    /// Maximum number of bytes buffered for a single frame.
    max_frame_size: usize,
    /// Shape of rows in fetch and singleton responses.
    row_shape: Option<RowShape>,
}

impl WireCodec {
    /// Create a new codec with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            row_shape: None,
        }
    }

    /// Create a new codec with a custom maximum frame size.
    #[must_use]
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Install the row shape used for following row frames.
    pub fn set_row_shape(&mut self, shape: Option<RowShape>) {
        self.row_shape = shape;
    }

    /// Currently installed row shape.
    #[must_use]
    pub fn row_shape(&self) -> Option<&RowShape> {
        self.row_shape.as_ref()
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WireCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut cursor = &src[..];
        match Frame::decode(&mut cursor, self.row_shape.as_ref()) {
            Ok(frame) => {
                let consumed = src.len() - cursor.remaining();
                src.advance(consumed);
                tracing::trace!(
                    operation = ?frame.operation(),
                    length = consumed,
                    "decoded frame"
                );
                Ok(Some(frame))
            }
            Err(e) if e.is_incomplete() => {
                if src.len() > self.max_frame_size {
                    return Err(CodecError::FrameTooLarge {
                        size: src.len(),
                        max: self.max_frame_size,
                    });
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Encoder<Bytes> for WireCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(&item);

        tracing::trace!(length = item.len(), "encoded frame");

        Ok(())
    }
}
