//! Reference decoder for serialized parameter buffers.
//!
//! Tests use it to check what the client actually put on the wire. Flags
//! carry no length, so the decoder has to be told which tags are flags.

use bytes::Bytes;
use fb_protocol::ParameterBufferKind;
use fb_protocol::consts::tpb;
use thiserror::Error;

/// Error decoding a parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The buffer started with a version byte other than the expected one.
    #[error("expected version byte {expected}, found {found}")]
    Version {
        /// Version byte of the buffer kind.
        expected: u8,
        /// Byte found.
        found: u8,
    },

    /// An argument ran past the end of the buffer.
    #[error("argument {tag} at offset {offset} is truncated")]
    Truncated {
        /// Tag of the truncated argument.
        tag: u8,
        /// Offset of the tag.
        offset: usize,
    },
}

/// One decoded argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArgument {
    /// Argument tag.
    pub tag: u8,
    /// Value bytes, `None` for a flag.
    pub value: Option<Bytes>,
}

impl RawArgument {
    /// The value as a little-endian integer of up to four bytes.
    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        let value = self.value.as_ref()?;
        if value.len() > 4 {
            return None;
        }
        let mut word = [0u8; 4];
        word[..value.len()].copy_from_slice(value);
        Some(i32::from_le_bytes(word))
    }

    /// The value as text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.value.as_ref()?).ok()
    }

    /// Whether the argument is a bare flag.
    #[must_use]
    pub fn is_flag(&self) -> bool {
        self.value.is_none()
    }
}

/// A decoded parameter buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBuffer {
    /// Arguments in wire order.
    pub arguments: Vec<RawArgument>,
}

impl DecodedBuffer {
    /// Tags in wire order.
    #[must_use]
    pub fn tags(&self) -> Vec<u8> {
        self.arguments.iter().map(|a| a.tag).collect()
    }

    /// First argument with `tag`.
    #[must_use]
    pub fn get(&self, tag: u8) -> Option<&RawArgument> {
        self.arguments.iter().find(|a| a.tag == tag)
    }

    /// Whether an argument with `tag` is present.
    #[must_use]
    pub fn contains(&self, tag: u8) -> bool {
        self.get(tag).is_some()
    }

    /// Integer value of `tag`.
    #[must_use]
    pub fn int(&self, tag: u8) -> Option<i32> {
        self.get(tag).and_then(RawArgument::as_int)
    }

    /// Text value of `tag`.
    #[must_use]
    pub fn string(&self, tag: u8) -> Option<&str> {
        self.get(tag).and_then(RawArgument::as_str)
    }
}

/// Tags that travel as bare flags in buffers of `kind`.
#[must_use]
pub fn is_flag(kind: ParameterBufferKind, tag: u8) -> bool {
    kind == ParameterBufferKind::Transaction && tag != tpb::LOCK_TIMEOUT
}

/// Decode a buffer of `kind`, using the default flag tags of the kind.
pub fn decode(kind: ParameterBufferKind, data: &[u8]) -> Result<DecodedBuffer, DecodeError> {
    decode_with(kind, data, |tag| is_flag(kind, tag))
}

/// Decode a buffer of `kind`; `flag` tells which tags carry no value.
///
/// An empty buffer decodes to no arguments.
pub fn decode_with(
    kind: ParameterBufferKind,
    data: &[u8],
    flag: impl Fn(u8) -> bool,
) -> Result<DecodedBuffer, DecodeError> {
    let mut buffer = DecodedBuffer::default();
    if data.is_empty() {
        return Ok(buffer);
    }

    let mut offset = 0;
    if let Some(expected) = kind.version_byte() {
        if data[0] != expected {
            return Err(DecodeError::Version {
                expected,
                found: data[0],
            });
        }
        offset = 1;
    }

    while offset < data.len() {
        let tag = data[offset];
        if flag(tag) {
            buffer.arguments.push(RawArgument { tag, value: None });
            offset += 1;
            continue;
        }
        let truncated = DecodeError::Truncated { tag, offset };
        let len = usize::from(*data.get(offset + 1).ok_or(truncated.clone())?);
        let start = offset + 2;
        let value = data.get(start..start + len).ok_or(truncated)?;
        buffer.arguments.push(RawArgument {
            tag,
            value: Some(Bytes::copy_from_slice(value)),
        });
        offset = start + len;
    }
    Ok(buffer)
}
