//! Tagged parameter buffers (DPB, TPB, BPB and connect identification).
//!
//! A parameter buffer is an ordered list of `(tag, value)` arguments. It is
//! built once per attach / transaction start / blob open, serialized, and
//! discarded; the client never parses one back.
//!
//! ## Wire Format
//!
//! ```text
//! [version byte]  (omitted for connect identification)
//! tag u8, len u8, value[len]    string / bytes
//! tag u8, 4, i32 little-endian  integer
//! tag u8                        flag (transaction buffers)
//! ```
//!
//! The encoder does not interpret tags; caller-supplied vendor tags are
//! appended verbatim.

use bytes::{BufMut, Bytes, BytesMut};

use crate::consts::{bpb, dpb, tpb};
use crate::error::ProtocolError;

/// Largest value a single argument can carry.
pub const MAX_ARGUMENT_LENGTH: usize = 255;

/// The kind of parameter buffer, which determines its version byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterBufferKind {
    /// Database parameter buffer (attach/create).
    Database,
    /// Transaction parameter buffer.
    Transaction,
    /// Blob parameter buffer.
    Blob,
    /// User identification sent with `op_connect`.
    ConnectIdentification,
}

impl ParameterBufferKind {
    /// Version byte that starts a non-empty buffer of this kind.
    #[must_use]
    pub const fn version_byte(self) -> Option<u8> {
        match self {
            Self::Database => Some(dpb::VERSION1),
            Self::Transaction => Some(tpb::VERSION3),
            Self::Blob => Some(bpb::VERSION1),
            Self::ConnectIdentification => None,
        }
    }
}

/// Value of a single argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgumentValue {
    /// 32-bit integer, sent as 4 little-endian bytes.
    Int(i32),
    /// String, sent as raw bytes.
    String(String),
    /// Raw bytes.
    Bytes(Bytes),
    /// Bare tag without a value.
    Flag,
}

/// A single tagged argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Argument {
    /// Argument tag.
    pub tag: u8,
    /// Argument value.
    pub value: ArgumentValue,
}

impl Argument {
    /// Integer argument.
    #[must_use]
    pub fn int(tag: u8, value: i32) -> Self {
        Self {
            tag,
            value: ArgumentValue::Int(value),
        }
    }

    /// String argument.
    pub fn string(tag: u8, value: impl Into<String>) -> Self {
        Self {
            tag,
            value: ArgumentValue::String(value.into()),
        }
    }

    /// Raw byte argument.
    pub fn bytes(tag: u8, value: impl Into<Bytes>) -> Self {
        Self {
            tag,
            value: ArgumentValue::Bytes(value.into()),
        }
    }

    /// Flag argument.
    #[must_use]
    pub fn flag(tag: u8) -> Self {
        Self {
            tag,
            value: ArgumentValue::Flag,
        }
    }

    /// Number of bytes this argument occupies in a serialized buffer.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match &self.value {
            ArgumentValue::Int(_) => 2 + 4,
            ArgumentValue::String(s) => 2 + s.len(),
            ArgumentValue::Bytes(b) => 2 + b.len(),
            ArgumentValue::Flag => 1,
        }
    }

    fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        dst.put_u8(self.tag);
        match &self.value {
            ArgumentValue::Int(value) => {
                dst.put_u8(4);
                dst.put_i32_le(*value);
            }
            ArgumentValue::String(value) => put_counted(dst, self.tag, value.as_bytes())?,
            ArgumentValue::Bytes(value) => put_counted(dst, self.tag, value)?,
            ArgumentValue::Flag => {}
        }
        Ok(())
    }
}

fn put_counted(dst: &mut impl BufMut, tag: u8, value: &[u8]) -> Result<(), ProtocolError> {
    if value.len() > MAX_ARGUMENT_LENGTH {
        return Err(ProtocolError::Encoding(format!(
            "value for tag {tag} is {} bytes, max {MAX_ARGUMENT_LENGTH}",
            value.len()
        )));
    }
    dst.put_u8(value.len() as u8);
    dst.put_slice(value);
    Ok(())
}

/// An ordered, write-only parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBuffer {
    kind: ParameterBufferKind,
    arguments: Vec<Argument>,
}

impl ParameterBuffer {
    /// Create an empty buffer of the given kind.
    #[must_use]
    pub fn new(kind: ParameterBufferKind) -> Self {
        Self {
            kind,
            arguments: Vec::new(),
        }
    }

    /// Kind of this buffer.
    #[must_use]
    pub fn kind(&self) -> ParameterBufferKind {
        self.kind
    }

    /// Append an integer argument.
    pub fn add_int(&mut self, tag: u8, value: i32) -> &mut Self {
        self.add_argument(Argument::int(tag, value))
    }

    /// Append a string argument.
    pub fn add_string(&mut self, tag: u8, value: impl Into<String>) -> &mut Self {
        self.add_argument(Argument::string(tag, value))
    }

    /// Append a raw byte argument.
    pub fn add_bytes(&mut self, tag: u8, value: impl Into<Bytes>) -> &mut Self {
        self.add_argument(Argument::bytes(tag, value))
    }

    /// Append a bare flag.
    pub fn add_flag(&mut self, tag: u8) -> &mut Self {
        self.add_argument(Argument::flag(tag))
    }

    /// Append an argument as-is.
    pub fn add_argument(&mut self, argument: Argument) -> &mut Self {
        self.arguments.push(argument);
        self
    }

    /// Arguments in insertion order.
    #[must_use]
    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    /// Whether an argument with `tag` is present.
    #[must_use]
    pub fn contains(&self, tag: u8) -> bool {
        self.arguments.iter().any(|a| a.tag == tag)
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    /// Whether the buffer has no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// Serialized length in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        if self.arguments.is_empty() {
            return 0;
        }
        let version = usize::from(self.kind.version_byte().is_some());
        version + self.arguments.iter().map(Argument::encoded_len).sum::<usize>()
    }

    /// Serialize the buffer.
    ///
    /// An empty buffer serializes to zero bytes, without a version byte.
    pub fn serialize(&self) -> Result<Bytes, ProtocolError> {
        let mut dst = BytesMut::with_capacity(self.encoded_len());
        if self.arguments.is_empty() {
            return Ok(dst.freeze());
        }
        if let Some(version) = self.kind.version_byte() {
            dst.put_u8(version);
        }
        for argument in &self.arguments {
            argument.encode(&mut dst)?;
        }
        Ok(dst.freeze())
    }
}

impl Extend<Argument> for ParameterBuffer {
    fn extend<I: IntoIterator<Item = Argument>>(&mut self, iter: I) {
        self.arguments.extend(iter);
    }
}
