//! XDR encoding of message rows.
//!
//! Each field travels as its XDR value followed by a 4-byte null indicator
//! (`0` present, `-1` null). Values are kept as raw big-endian wire bytes;
//! converting them to Rust types is left to the data-access layer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::xdr;

const NULL_INDICATOR: i32 = -1;

/// How a single field is transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XdrShape {
    /// Exactly `n` bytes, already a multiple of 4.
    Fixed(usize),
    /// Exactly `n` bytes of opaque data padded to 4.
    Opaque(usize),
    /// Length-prefixed data of at most `n` bytes.
    Varying(usize),
}

/// Field shapes of one message, in column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RowShape {
    fields: Vec<XdrShape>,
}

/// One decoded row: a value per field, `None` when null.
pub type Row = Vec<Option<Bytes>>;

impl RowShape {
    /// Create a row shape.
    #[must_use]
    pub fn new(fields: Vec<XdrShape>) -> Self {
        Self { fields }
    }

    /// Field shapes.
    #[must_use]
    pub fn fields(&self) -> &[XdrShape] {
        &self.fields
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the message has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Decode one row.
    pub fn decode(&self, src: &mut impl Buf) -> Result<Row, ProtocolError> {
        let mut row = Vec::with_capacity(self.fields.len());
        for shape in &self.fields {
            let value = match *shape {
                XdrShape::Fixed(len) | XdrShape::Opaque(len) => xdr::read_opaque(src, len)?,
                XdrShape::Varying(_) => xdr::read_buffer(src)?,
            };
            let indicator = xdr::read_int(src)?;
            row.push((indicator != NULL_INDICATOR).then_some(value));
        }
        Ok(row)
    }

    /// Encode one row.
    ///
    /// `Fixed` values must have their exact width, `Opaque` values are padded
    /// with spaces up to the declared length.
    pub fn encode(&self, row: &[Option<Bytes>], dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if row.len() != self.fields.len() {
            return Err(ProtocolError::Encoding(format!(
                "row has {} values, message has {} fields",
                row.len(),
                self.fields.len()
            )));
        }
        for (index, (shape, value)) in self.fields.iter().zip(row).enumerate() {
            let data = value.as_deref().unwrap_or_default();
            match *shape {
                XdrShape::Fixed(len) => match value {
                    None => dst.put_bytes(0, len),
                    Some(v) if v.len() == len => dst.put_slice(v),
                    Some(v) => {
                        return Err(ProtocolError::Encoding(format!(
                            "field {index} needs {len} bytes, got {}",
                            v.len()
                        )));
                    }
                },
                XdrShape::Opaque(len) => {
                    check_length(index, data.len(), len)?;
                    dst.put_slice(data);
                    dst.put_bytes(b' ', len - data.len());
                    dst.put_bytes(0, xdr::padding(len));
                }
                XdrShape::Varying(len) => {
                    check_length(index, data.len(), len)?;
                    xdr::write_buffer(dst, data)?;
                }
            }
            xdr::write_int(dst, if value.is_some() { 0 } else { NULL_INDICATOR });
        }
        Ok(())
    }
}

fn check_length(index: usize, actual: usize, max: usize) -> Result<(), ProtocolError> {
    if actual > max {
        return Err(ProtocolError::Encoding(format!(
            "field {index} is {actual} bytes, declared length is {max}"
        )));
    }
    Ok(())
}
