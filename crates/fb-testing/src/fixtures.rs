//! Field values in their XDR encoding.
//!
//! Rows handed to the mock server and compared against fetched rows hold
//! raw values; these helpers build them for the common types.

use bytes::Bytes;

/// An `INTEGER` value.
#[must_use]
pub fn int(value: i32) -> Option<Bytes> {
    Some(Bytes::copy_from_slice(&value.to_be_bytes()))
}

/// A `SMALLINT` value, widened to a word like every short on the wire.
#[must_use]
pub fn smallint(value: i16) -> Option<Bytes> {
    int(i32::from(value))
}

/// A `BIGINT` value.
#[must_use]
pub fn bigint(value: i64) -> Option<Bytes> {
    Some(Bytes::copy_from_slice(&value.to_be_bytes()))
}

/// A blob id column value.
#[must_use]
pub fn blob_id(value: i64) -> Option<Bytes> {
    bigint(value)
}

/// A `CHAR(n)` value of exactly `len` bytes, padded with spaces.
#[must_use]
pub fn char(value: &str, len: usize) -> Option<Bytes> {
    let mut data = value.as_bytes().to_vec();
    data.resize(len.max(data.len()), b' ');
    Some(Bytes::from(data))
}

/// A `VARCHAR` value.
#[must_use]
pub fn varchar(value: &str) -> Option<Bytes> {
    Some(Bytes::copy_from_slice(value.as_bytes()))
}

/// A `NULL`.
#[must_use]
pub fn null() -> Option<Bytes> {
    None
}

/// Blob segments of the given sizes with deterministic content.
///
/// Byte `i` of the concatenated blob is `i % 251`, so a reassembled blob
/// can be checked against [`segment_content`].
#[must_use]
pub fn segments(sizes: &[usize]) -> Vec<Bytes> {
    let mut offset = 0;
    sizes
        .iter()
        .map(|size| {
            let segment: Vec<u8> = (offset..offset + size).map(content_byte).collect();
            offset += size;
            Bytes::from(segment)
        })
        .collect()
}

/// The first `len` bytes of a blob built by [`segments`].
#[must_use]
pub fn segment_content(len: usize) -> Bytes {
    (0..len).map(content_byte).collect::<Vec<u8>>().into()
}

fn content_byte(index: usize) -> u8 {
    (index % 251) as u8
}
