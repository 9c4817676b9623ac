//! SQL data type definitions.
//!
//! This module defines the SQL types as they appear in statement describe
//! output (`isc_info_sql_type`) and the descriptors built from them.

use crate::error::ProtocolError;

/// SQL type codes (`SQL_*`).
///
/// On the wire the lowest bit of the code flags a nullable column; the
/// variants carry the even base code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SqlType {
    /// Variable-length character data.
    Varying = 448,
    /// Fixed-length character data.
    Text = 452,
    /// Double precision float.
    Double = 480,
    /// Single precision float.
    Float = 482,
    /// 32-bit integer.
    Long = 496,
    /// 16-bit integer.
    Short = 500,
    /// Date and time of day.
    Timestamp = 510,
    /// Blob id.
    Blob = 520,
    /// VAX double float.
    DFloat = 530,
    /// Array id.
    Array = 540,
    /// Generic 64-bit quad.
    Quad = 550,
    /// Time of day.
    Time = 560,
    /// Date.
    Date = 570,
    /// 64-bit integer.
    Int64 = 580,
    /// 128-bit integer.
    Int128 = 32752,
    /// Boolean.
    Boolean = 32764,
    /// Untyped null (parameter placeholders).
    Null = 32766,
}

impl SqlType {
    /// Create a SQL type from its raw code, ignoring the nullable bit.
    pub fn from_code(code: i32) -> Result<Self, ProtocolError> {
        Ok(match code & !1 {
            448 => Self::Varying,
            452 => Self::Text,
            480 => Self::Double,
            482 => Self::Float,
            496 => Self::Long,
            500 => Self::Short,
            510 => Self::Timestamp,
            520 => Self::Blob,
            530 => Self::DFloat,
            540 => Self::Array,
            550 => Self::Quad,
            560 => Self::Time,
            570 => Self::Date,
            580 => Self::Int64,
            32752 => Self::Int128,
            32764 => Self::Boolean,
            32766 => Self::Null,
            other => {
                return Err(ProtocolError::malformed(
                    "sql type",
                    format!("unknown type code {other}"),
                ));
            }
        })
    }

    /// Raw type code without the nullable bit.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Check if this is a character type.
    #[must_use]
    pub const fn is_text(self) -> bool {
        matches!(self, Self::Text | Self::Varying)
    }

    /// Check if this type can store an exact numeric with a scale.
    #[must_use]
    pub const fn is_exact_numeric(self) -> bool {
        matches!(self, Self::Short | Self::Long | Self::Int64 | Self::Int128)
    }

    /// Check if values of this type are an 8-byte id referencing other data.
    #[must_use]
    pub const fn is_id(self) -> bool {
        matches!(self, Self::Blob | Self::Array | Self::Quad)
    }
}

/// Client SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    /// Dialect 1 (InterBase 5 compatible).
    V1,
    /// Dialect 2 (transitional).
    V2,
    /// Dialect 3.
    #[default]
    V3,
}

impl Dialect {
    /// Dialect from its number.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            _ => None,
        }
    }

    /// Dialect number.
    #[must_use]
    pub const fn number(self) -> i32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    /// Whether 8- and 16-byte exact numerics exist in this dialect.
    ///
    /// Dialect 1 stores wide numerics as double precision.
    #[must_use]
    pub const fn has_wide_exact_numerics(self) -> bool {
        !matches!(self, Self::V1)
    }
}

/// Describes one column or parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    /// SQL type.
    pub sql_type: SqlType,
    /// Sub-type; the character set id for text types.
    pub sub_type: i16,
    /// Declared length in bytes (text types).
    pub length: i32,
    /// Scale of exact numerics (zero or negative).
    pub scale: i16,
    /// Whether the value may be null.
    pub nullable: bool,
    /// Declared precision of `NUMERIC`/`DECIMAL` columns.
    ///
    /// When set, the storage type is chosen from the precision and dialect
    /// instead of `sql_type`.
    pub precision: Option<u8>,
}

impl TypeDescriptor {
    /// Descriptor for a fixed-width type.
    #[must_use]
    pub fn new(sql_type: SqlType) -> Self {
        let length = match sql_type {
            SqlType::Short => 2,
            SqlType::Long | SqlType::Float | SqlType::Date | SqlType::Time => 4,
            SqlType::Int64
            | SqlType::Double
            | SqlType::DFloat
            | SqlType::Timestamp
            | SqlType::Blob
            | SqlType::Array
            | SqlType::Quad => 8,
            SqlType::Int128 => 16,
            SqlType::Boolean => 1,
            SqlType::Text | SqlType::Varying | SqlType::Null => 0,
        };
        Self {
            sql_type,
            sub_type: 0,
            length,
            scale: 0,
            nullable: false,
            precision: None,
        }
    }

    /// `CHAR(n)` with a byte length of `length`.
    #[must_use]
    pub fn text(length: i32) -> Self {
        Self {
            length,
            ..Self::new(SqlType::Text)
        }
    }

    /// `VARCHAR(n)` with a byte length of `length`.
    #[must_use]
    pub fn varying(length: i32) -> Self {
        Self {
            length,
            ..Self::new(SqlType::Varying)
        }
    }

    /// `NUMERIC(precision, scale)`.
    ///
    /// `scale` is given as a positive number of fractional digits.
    #[must_use]
    pub fn numeric(precision: u8, scale: u8) -> Self {
        let sql_type = match precision {
            0..=4 => SqlType::Short,
            5..=9 => SqlType::Long,
            10..=18 => SqlType::Int64,
            _ => SqlType::Int128,
        };
        Self {
            scale: -i16::from(scale),
            precision: Some(precision),
            ..Self::new(sql_type)
        }
    }

    /// Descriptor as reported by the server's describe output.
    pub fn from_wire(
        sql_type: i32,
        sub_type: i32,
        length: i32,
        scale: i32,
    ) -> Result<Self, ProtocolError> {
        let narrow = |what: &'static str, value: i32| {
            i16::try_from(value)
                .map_err(|_| ProtocolError::malformed("sql describe", format!("{what} {value}")))
        };
        Ok(Self {
            sql_type: SqlType::from_code(sql_type)?,
            sub_type: narrow("sub type", sub_type)?,
            length,
            scale: narrow("scale", scale)?,
            nullable: sql_type & 1 != 0,
            precision: None,
        })
    }

    /// Set the character set of a text type.
    #[must_use]
    pub fn with_charset(mut self, charset: i16) -> Self {
        self.sub_type = charset;
        self
    }

    /// Mark the descriptor nullable.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Wire type code including the nullable bit.
    #[must_use]
    pub fn wire_type(&self) -> i32 {
        self.sql_type.code() | i32::from(self.nullable)
    }
}

/// Ordered column or parameter descriptors of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RowDescriptor {
    fields: Vec<TypeDescriptor>,
}

impl RowDescriptor {
    /// Create a row descriptor.
    #[must_use]
    pub fn new(fields: Vec<TypeDescriptor>) -> Self {
        Self { fields }
    }

    /// Descriptors in column order.
    #[must_use]
    pub fn fields(&self) -> &[TypeDescriptor] {
        &self.fields
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the message has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<TypeDescriptor> for RowDescriptor {
    fn from_iter<I: IntoIterator<Item = TypeDescriptor>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_type_from_code() {
        assert_eq!(SqlType::from_code(496).unwrap(), SqlType::Long);
        // nullable bit is ignored
        assert_eq!(SqlType::from_code(497).unwrap(), SqlType::Long);
        assert_eq!(SqlType::from_code(32765).unwrap(), SqlType::Boolean);
        assert!(SqlType::from_code(12).is_err());
    }

    #[test]
    fn test_from_wire_nullable() {
        let desc = TypeDescriptor::from_wire(449, 4, 20, 0).unwrap();
        assert_eq!(desc.sql_type, SqlType::Varying);
        assert!(desc.nullable);
        assert_eq!(desc.sub_type, 4);
        assert_eq!(desc.wire_type(), 449);
    }

    #[test]
    fn test_numeric_storage_type() {
        assert_eq!(TypeDescriptor::numeric(4, 2).sql_type, SqlType::Short);
        assert_eq!(TypeDescriptor::numeric(9, 2).sql_type, SqlType::Long);
        assert_eq!(TypeDescriptor::numeric(18, 4).sql_type, SqlType::Int64);
        assert_eq!(TypeDescriptor::numeric(34, 4).sql_type, SqlType::Int128);
        assert_eq!(TypeDescriptor::numeric(18, 4).scale, -4);
    }

    #[test]
    fn test_dialect() {
        assert_eq!(Dialect::from_i32(1), Some(Dialect::V1));
        assert_eq!(Dialect::from_i32(4), None);
        assert_eq!(Dialect::default().number(), 3);
        assert!(!Dialect::V1.has_wide_exact_numerics());
    }
}
