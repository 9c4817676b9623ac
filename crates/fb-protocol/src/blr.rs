//! Type-length calculation and message BLR generation.
//!
//! The server describes a message (a row of columns or parameters) by its
//! Binary Language Representation. Both sides lay the message out in memory
//! from the same rules, so offsets and lengths computed here must match the
//! server exactly:
//!
//! ```text
//! for each column:
//!     offset = align(offset, alignment(column))
//!     data   = offset .. offset + length(column)
//!     offset = align(offset + length, 2)
//!     null indicator (i16) = offset .. offset + 2
//! total = align(offset, max alignment)
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::row::{RowShape, XdrShape};
use crate::types::{Dialect, RowDescriptor, SqlType, TypeDescriptor};

/// BLR verbs and data type codes (`blr_*`).
pub mod codes {
    /// BLR version 5.
    pub const VERSION5: u8 = 5;
    /// Begin block.
    pub const BEGIN: u8 = 2;
    /// Message definition.
    pub const MESSAGE: u8 = 4;
    /// End block.
    pub const END: u8 = 255;
    /// End of command.
    pub const EOC: u8 = 76;

    /// `CHAR` without character set.
    pub const TEXT: u8 = 14;
    /// `CHAR` with character set.
    pub const TEXT2: u8 = 15;
    /// `SMALLINT`.
    pub const SHORT: u8 = 7;
    /// `INTEGER`.
    pub const LONG: u8 = 8;
    /// Quad (blob and array ids).
    pub const QUAD: u8 = 9;
    /// `FLOAT`.
    pub const FLOAT: u8 = 10;
    /// VAX double.
    pub const D_FLOAT: u8 = 11;
    /// `DATE`.
    pub const SQL_DATE: u8 = 12;
    /// `TIME`.
    pub const SQL_TIME: u8 = 13;
    /// `BIGINT`.
    pub const INT64: u8 = 16;
    /// `BOOLEAN`.
    pub const BOOL: u8 = 23;
    /// `INT128`.
    pub const INT128: u8 = 26;
    /// `DOUBLE PRECISION`.
    pub const DOUBLE: u8 = 27;
    /// `TIMESTAMP`.
    pub const TIMESTAMP: u8 = 35;
    /// `VARCHAR` with character set.
    pub const VARYING2: u8 = 38;
}

/// Size of the null indicator following every column.
const NULL_INDICATOR_LENGTH: usize = 2;

/// Position of one column inside a message buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    /// Storage type after dialect resolution.
    pub storage: SqlType,
    /// Offset of the data.
    pub offset: usize,
    /// Length of the data.
    pub length: usize,
    /// Alignment of the data.
    pub alignment: usize,
    /// Offset of the null indicator.
    pub null_offset: usize,
}

/// Layout of a complete message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowLayout {
    /// Column positions in order.
    pub columns: Vec<ColumnLayout>,
    /// Total message length, padded to the largest alignment.
    pub length: usize,
}

/// Computes wire lengths, alignments and BLR for one dialect.
///
/// The calculator is cheap; rebuild it whenever the connection dialect
/// changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeLengthCalculator {
    dialect: Dialect,
}

impl TypeLengthCalculator {
    /// Create a calculator for `dialect`.
    #[must_use]
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Dialect the calculator was built for.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Type the value is stored as in this dialect.
    pub fn storage_type(&self, desc: &TypeDescriptor) -> Result<SqlType, ProtocolError> {
        let wide = self.dialect.has_wide_exact_numerics();
        if let Some(precision) = desc.precision {
            return Ok(match precision {
                0..=4 => SqlType::Short,
                5..=9 => SqlType::Long,
                10..=18 if wide => SqlType::Int64,
                _ if wide => SqlType::Int128,
                _ => SqlType::Double,
            });
        }
        match desc.sql_type {
            SqlType::Int64 | SqlType::Int128 if !wide => Err(ProtocolError::Encoding(format!(
                "{:?} is not available in dialect {}",
                desc.sql_type,
                self.dialect.number()
            ))),
            other => Ok(other),
        }
    }

    /// Length of the value in the message buffer.
    pub fn length_of(&self, desc: &TypeDescriptor) -> Result<usize, ProtocolError> {
        Ok(self.measure(desc)?.1)
    }

    /// Alignment of the value in the message buffer.
    pub fn alignment_of(&self, desc: &TypeDescriptor) -> Result<usize, ProtocolError> {
        Ok(self.measure(desc)?.2)
    }

    fn measure(&self, desc: &TypeDescriptor) -> Result<(SqlType, usize, usize), ProtocolError> {
        let storage = self.storage_type(desc)?;
        let (length, alignment) = match storage {
            SqlType::Text => (declared_length(desc)?, 1),
            SqlType::Varying => (declared_length(desc)? + 2, 2),
            SqlType::Short => (2, 2),
            SqlType::Long | SqlType::Float | SqlType::Date | SqlType::Time => (4, 4),
            SqlType::Int64 | SqlType::Double | SqlType::DFloat => (8, 8),
            SqlType::Timestamp | SqlType::Blob | SqlType::Array | SqlType::Quad => (8, 4),
            SqlType::Int128 => (16, 8),
            SqlType::Boolean => (1, 1),
            SqlType::Null => (0, 1),
        };
        Ok((storage, length, alignment))
    }

    /// Offsets and total length of a message.
    pub fn row_layout(&self, row: &RowDescriptor) -> Result<RowLayout, ProtocolError> {
        let mut columns = Vec::with_capacity(row.len());
        let mut offset = 0;
        let mut max_alignment = 1;

        for desc in row.fields() {
            let (storage, length, alignment) = self.measure(desc)?;
            offset = align(offset, alignment);
            let data_offset = offset;
            offset = align(offset + length, NULL_INDICATOR_LENGTH);
            columns.push(ColumnLayout {
                storage,
                offset: data_offset,
                length,
                alignment,
                null_offset: offset,
            });
            offset += NULL_INDICATOR_LENGTH;
            max_alignment = max_alignment.max(alignment).max(NULL_INDICATOR_LENGTH);
        }

        Ok(RowLayout {
            columns,
            length: align(offset, max_alignment),
        })
    }

    /// BLR describing a message, or an empty buffer for an empty message.
    pub fn blr(&self, row: &RowDescriptor) -> Result<Bytes, ProtocolError> {
        if row.is_empty() {
            return Ok(Bytes::new());
        }
        let count = u16::try_from(row.len() * 2).map_err(|_| {
            ProtocolError::Encoding(format!("message with {} columns is too large", row.len()))
        })?;

        let mut dst = BytesMut::with_capacity(8 + row.len() * 8);
        dst.put_u8(codes::VERSION5);
        dst.put_u8(codes::BEGIN);
        dst.put_u8(codes::MESSAGE);
        dst.put_u8(0);
        dst.put_u16_le(count);
        for desc in row.fields() {
            self.put_field_blr(&mut dst, desc)?;
            // null indicator
            dst.put_u8(codes::SHORT);
            dst.put_u8(0);
        }
        dst.put_u8(codes::END);
        dst.put_u8(codes::EOC);
        Ok(dst.freeze())
    }

    fn put_field_blr(&self, dst: &mut BytesMut, desc: &TypeDescriptor) -> Result<(), ProtocolError> {
        let scale = desc.scale as i8 as u8;
        match self.storage_type(desc)? {
            SqlType::Text => {
                dst.put_u8(codes::TEXT2);
                dst.put_i16_le(desc.sub_type);
                dst.put_u16_le(blr_length(desc)?);
            }
            SqlType::Varying => {
                dst.put_u8(codes::VARYING2);
                dst.put_i16_le(desc.sub_type);
                dst.put_u16_le(blr_length(desc)?);
            }
            SqlType::Null => {
                dst.put_u8(codes::TEXT);
                dst.put_u16_le(0);
            }
            SqlType::Short => dst.put_slice(&[codes::SHORT, scale]),
            SqlType::Long => dst.put_slice(&[codes::LONG, scale]),
            SqlType::Int64 => dst.put_slice(&[codes::INT64, scale]),
            SqlType::Int128 => dst.put_slice(&[codes::INT128, scale]),
            SqlType::Quad => dst.put_slice(&[codes::QUAD, scale]),
            SqlType::Blob | SqlType::Array => dst.put_slice(&[codes::QUAD, 0]),
            SqlType::Float => dst.put_u8(codes::FLOAT),
            SqlType::Double => dst.put_u8(codes::DOUBLE),
            SqlType::DFloat => dst.put_u8(codes::D_FLOAT),
            SqlType::Date => dst.put_u8(codes::SQL_DATE),
            SqlType::Time => dst.put_u8(codes::SQL_TIME),
            SqlType::Timestamp => dst.put_u8(codes::TIMESTAMP),
            SqlType::Boolean => dst.put_u8(codes::BOOL),
        }
        Ok(())
    }

    /// XDR shape used to transfer rows of this message.
    pub fn row_shape(&self, row: &RowDescriptor) -> Result<RowShape, ProtocolError> {
        let fields = row
            .fields()
            .iter()
            .map(|desc| {
                Ok(match self.storage_type(desc)? {
                    SqlType::Text => XdrShape::Opaque(declared_length(desc)?),
                    SqlType::Varying => XdrShape::Varying(declared_length(desc)?),
                    SqlType::Short
                    | SqlType::Long
                    | SqlType::Float
                    | SqlType::Date
                    | SqlType::Time => XdrShape::Fixed(4),
                    SqlType::Int64
                    | SqlType::Double
                    | SqlType::DFloat
                    | SqlType::Timestamp
                    | SqlType::Blob
                    | SqlType::Array
                    | SqlType::Quad => XdrShape::Fixed(8),
                    SqlType::Int128 => XdrShape::Fixed(16),
                    SqlType::Boolean => XdrShape::Opaque(1),
                    SqlType::Null => XdrShape::Fixed(0),
                })
            })
            .collect::<Result<Vec<_>, ProtocolError>>()?;
        Ok(RowShape::new(fields))
    }
}

fn declared_length(desc: &TypeDescriptor) -> Result<usize, ProtocolError> {
    usize::try_from(desc.length).map_err(|_| {
        ProtocolError::Encoding(format!("negative length {} for {:?}", desc.length, desc.sql_type))
    })
}

fn blr_length(desc: &TypeDescriptor) -> Result<u16, ProtocolError> {
    u16::try_from(desc.length).map_err(|_| {
        ProtocolError::Encoding(format!(
            "length {} for {:?} does not fit in a message",
            desc.length, desc.sql_type
        ))
    })
}

const fn align(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) / alignment * alignment
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const V1: TypeLengthCalculator = TypeLengthCalculator::new(Dialect::V1);
    const V3: TypeLengthCalculator = TypeLengthCalculator::new(Dialect::V3);

    fn measure(calc: &TypeLengthCalculator, desc: TypeDescriptor) -> (usize, usize) {
        (
            calc.length_of(&desc).unwrap(),
            calc.alignment_of(&desc).unwrap(),
        )
    }

    #[test]
    fn test_fixed_width_table() {
        let table = [
            (SqlType::Short, 2, 2),
            (SqlType::Long, 4, 4),
            (SqlType::Float, 4, 4),
            (SqlType::Double, 8, 8),
            (SqlType::DFloat, 8, 8),
            (SqlType::Date, 4, 4),
            (SqlType::Time, 4, 4),
            (SqlType::Timestamp, 8, 4),
            (SqlType::Blob, 8, 4),
            (SqlType::Array, 8, 4),
            (SqlType::Quad, 8, 4),
            (SqlType::Boolean, 1, 1),
            (SqlType::Null, 0, 1),
        ];
        for calc in [V1, V3] {
            for (sql_type, length, alignment) in table {
                assert_eq!(
                    measure(&calc, TypeDescriptor::new(sql_type)),
                    (length, alignment),
                    "{sql_type:?} in {:?}",
                    calc.dialect()
                );
            }
        }
    }

    #[test]
    fn test_text_types() {
        for calc in [V1, V3] {
            assert_eq!(measure(&calc, TypeDescriptor::text(10)), (10, 1));
            assert_eq!(measure(&calc, TypeDescriptor::varying(10)), (12, 2));
            assert_eq!(measure(&calc, TypeDescriptor::varying(0)), (2, 2));
        }
        assert!(V3.length_of(&TypeDescriptor::text(-1)).is_err());
    }

    #[test]
    fn test_wide_numerics_by_dialect() {
        assert_eq!(measure(&V3, TypeDescriptor::new(SqlType::Int64)), (8, 8));
        assert_eq!(measure(&V3, TypeDescriptor::new(SqlType::Int128)), (16, 8));
        assert!(matches!(
            V1.length_of(&TypeDescriptor::new(SqlType::Int64)),
            Err(ProtocolError::Encoding(_))
        ));
        assert!(matches!(
            V1.length_of(&TypeDescriptor::new(SqlType::Int128)),
            Err(ProtocolError::Encoding(_))
        ));
    }

    #[test]
    fn test_numeric_precision_by_dialect() {
        let cases = [
            (4, SqlType::Short, SqlType::Short),
            (9, SqlType::Long, SqlType::Long),
            (15, SqlType::Int64, SqlType::Double),
            (18, SqlType::Int64, SqlType::Double),
            (25, SqlType::Int128, SqlType::Double),
        ];
        for (precision, dialect3, dialect1) in cases {
            let desc = TypeDescriptor::numeric(precision, 2);
            assert_eq!(V3.storage_type(&desc).unwrap(), dialect3);
            assert_eq!(V1.storage_type(&desc).unwrap(), dialect1);
        }
        assert_eq!(V1.length_of(&TypeDescriptor::numeric(15, 2)).unwrap(), 8);
        assert_eq!(V3.length_of(&TypeDescriptor::numeric(25, 2)).unwrap(), 16);
    }

    #[test]
    fn test_row_layout() {
        let row = RowDescriptor::new(vec![
            TypeDescriptor::new(SqlType::Short),
            TypeDescriptor::new(SqlType::Int64),
            TypeDescriptor::text(3),
        ]);
        let layout = V3.row_layout(&row).unwrap();

        let offsets: Vec<(usize, usize)> = layout
            .columns
            .iter()
            .map(|c| (c.offset, c.null_offset))
            .collect();
        // short at 0, null at 2; int64 aligned to 8, null at 16; text at 18, null at 22
        assert_eq!(offsets, vec![(0, 2), (8, 16), (18, 22)]);
        assert_eq!(layout.length, 24);
    }

    #[test]
    fn test_empty_row() {
        let row = RowDescriptor::default();
        assert_eq!(V3.row_layout(&row).unwrap().length, 0);
        assert!(V3.blr(&row).unwrap().is_empty());
    }

    #[test]
    fn test_blr_message() {
        let row = RowDescriptor::new(vec![
            TypeDescriptor::varying(20).with_charset(4),
            TypeDescriptor::numeric(9, 2),
        ]);
        let blr = V3.blr(&row).unwrap();
        assert_eq!(
            &blr[..],
            &[
                5, 2, 4, 0, 4, 0, // header, 4 items
                38, 4, 0, 20, 0, 7, 0, // varying2 charset 4 len 20, null ind
                8, 0xFE, 7, 0, // long scale -2, null ind
                255, 76,
            ]
        );
    }

    #[test]
    fn test_blr_dialect1_numeric_is_double() {
        let row = RowDescriptor::new(vec![TypeDescriptor::numeric(15, 2)]);
        let blr = V1.blr(&row).unwrap();
        assert_eq!(&blr[6..], &[27, 7, 0, 255, 76]);
    }

    #[test]
    fn test_row_shape() {
        let row = RowDescriptor::new(vec![
            TypeDescriptor::new(SqlType::Short),
            TypeDescriptor::text(5),
            TypeDescriptor::new(SqlType::Boolean),
            TypeDescriptor::new(SqlType::Timestamp),
        ]);
        let shape = V3.row_shape(&row).unwrap();
        assert_eq!(
            shape.fields(),
            &[
                XdrShape::Fixed(4),
                XdrShape::Opaque(5),
                XdrShape::Opaque(1),
                XdrShape::Fixed(8),
            ]
        );
    }

    fn fixed_type() -> impl Strategy<Value = TypeDescriptor> {
        prop_oneof![
            Just(TypeDescriptor::new(SqlType::Short)),
            Just(TypeDescriptor::new(SqlType::Long)),
            Just(TypeDescriptor::new(SqlType::Int64)),
            Just(TypeDescriptor::new(SqlType::Double)),
            Just(TypeDescriptor::new(SqlType::Timestamp)),
            Just(TypeDescriptor::new(SqlType::Boolean)),
            (0i32..100).prop_map(TypeDescriptor::text),
            (0i32..100).prop_map(TypeDescriptor::varying),
        ]
    }

    proptest! {
        #[test]
        fn prop_row_length_is_sum_plus_padding(fields in proptest::collection::vec(fixed_type(), 1..12)) {
            let row = RowDescriptor::new(fields);
            let layout = V3.row_layout(&row).unwrap();

            let data: usize = layout.columns.iter().map(|c| c.length + NULL_INDICATOR_LENGTH).sum();
            let max_alignment = layout.columns.iter().map(|c| c.alignment).max().unwrap().max(2);
            prop_assert!(layout.length >= data);
            prop_assert_eq!(layout.length % max_alignment, 0);

            let mut end = 0;
            for column in &layout.columns {
                prop_assert_eq!(column.offset % column.alignment, 0);
                prop_assert_eq!(column.null_offset % 2, 0);
                prop_assert!(column.offset >= end);
                prop_assert!(column.null_offset >= column.offset + column.length);
                end = column.null_offset + NULL_INDICATOR_LENGTH;
            }
            prop_assert!(layout.length - end < max_alignment);
        }
    }
}
