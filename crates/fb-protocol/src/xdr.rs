//! XDR primitives used by the remote protocol.
//!
//! Every integer on the wire is a 4-byte big-endian word, 64-bit values are
//! two words, and opaque buffers and strings carry a 4-byte length followed by
//! the data padded with zero bytes to the next 4-byte boundary.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;

/// Largest opaque buffer accepted from the peer.
pub const MAX_BUFFER_LENGTH: usize = 64 * 1024 * 1024;

/// Number of zero bytes that follow `len` bytes of opaque data.
#[must_use]
pub const fn padding(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// Encoded size of an opaque buffer of `len` bytes, including its length word.
#[must_use]
pub const fn buffer_len(len: usize) -> usize {
    4 + len + padding(len)
}

fn ensure(src: &impl Buf, needed: usize) -> Result<(), ProtocolError> {
    if src.remaining() < needed {
        return Err(ProtocolError::Incomplete {
            needed: needed - src.remaining(),
        });
    }
    Ok(())
}

/// Read a 32-bit integer.
pub fn read_int(src: &mut impl Buf) -> Result<i32, ProtocolError> {
    ensure(src, 4)?;
    Ok(src.get_i32())
}

/// Read a 64-bit integer.
pub fn read_long(src: &mut impl Buf) -> Result<i64, ProtocolError> {
    ensure(src, 8)?;
    Ok(src.get_i64())
}

/// Read `len` bytes of opaque data and skip its padding.
pub fn read_opaque(src: &mut impl Buf, len: usize) -> Result<Bytes, ProtocolError> {
    ensure(src, len + padding(len))?;
    let data = src.copy_to_bytes(len);
    src.advance(padding(len));
    Ok(data)
}

/// Read a length-prefixed opaque buffer.
pub fn read_buffer(src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
    let len = read_int(src)?;
    let len = checked_len(len)?;
    read_opaque(src, len)
}

/// Read a length-prefixed string.
///
/// The protocol does not carry an encoding for these strings; invalid UTF-8
/// sequences are replaced.
pub fn read_string(src: &mut impl Buf) -> Result<String, ProtocolError> {
    let data = read_buffer(src)?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

/// Skip a length-prefixed opaque buffer.
pub fn skip_buffer(src: &mut impl Buf) -> Result<(), ProtocolError> {
    let len = checked_len(read_int(src)?)?;
    ensure(src, len + padding(len))?;
    src.advance(len + padding(len));
    Ok(())
}

fn checked_len(len: i32) -> Result<usize, ProtocolError> {
    match usize::try_from(len) {
        Ok(len) if len <= MAX_BUFFER_LENGTH => Ok(len),
        _ => Err(ProtocolError::InvalidLength {
            length: i64::from(len),
            max: MAX_BUFFER_LENGTH,
        }),
    }
}

/// Write a 32-bit integer.
pub fn write_int(dst: &mut impl BufMut, value: i32) {
    dst.put_i32(value);
}

/// Write a 64-bit integer.
pub fn write_long(dst: &mut impl BufMut, value: i64) {
    dst.put_i64(value);
}

/// Write opaque data without a length word, padded to 4 bytes.
pub fn write_opaque(dst: &mut impl BufMut, data: &[u8]) {
    dst.put_slice(data);
    dst.put_bytes(0, padding(data.len()));
}

/// Write a length-prefixed opaque buffer.
pub fn write_buffer(dst: &mut impl BufMut, data: &[u8]) -> Result<(), ProtocolError> {
    if data.len() > MAX_BUFFER_LENGTH {
        return Err(ProtocolError::Encoding(format!(
            "buffer of {} bytes exceeds the protocol maximum",
            data.len()
        )));
    }
    dst.put_i32(data.len() as i32);
    write_opaque(dst, data);
    Ok(())
}

/// Write a length-prefixed string.
pub fn write_string(dst: &mut impl BufMut, value: &str) -> Result<(), ProtocolError> {
    write_buffer(dst, value.as_bytes())
}

/// Read a little-endian integer of 1 to 4 bytes, as used in info buffers.
#[must_use]
pub fn vax_integer(data: &[u8]) -> i32 {
    let mut value = 0i32;
    for (shift, byte) in data.iter().take(4).enumerate() {
        value |= i32::from(*byte) << (shift * 8);
    }
    if data.len() < 4 && !data.is_empty() {
        // sign-extend short values
        let bits = (data.len() * 8) as u32;
        value = (value << (32 - bits)) >> (32 - bits);
    }
    value
}

/// Read a little-endian 64-bit integer from up to 8 bytes.
#[must_use]
pub fn vax_long(data: &[u8]) -> i64 {
    let mut value = 0i64;
    for (shift, byte) in data.iter().take(8).enumerate() {
        value |= i64::from(*byte) << (shift * 8);
    }
    value
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use proptest::prelude::*;

    #[test]
    fn test_padding() {
        assert_eq!(padding(0), 0);
        assert_eq!(padding(1), 3);
        assert_eq!(padding(3), 1);
        assert_eq!(padding(4), 0);
        assert_eq!(buffer_len(5), 12);
    }

    #[test]
    fn test_buffer_layout() {
        let mut buf = BytesMut::new();
        write_buffer(&mut buf, b"abcde").unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 5, b'a', b'b', b'c', b'd', b'e', 0, 0, 0]);
    }

    #[test]
    fn test_incomplete_buffer() {
        let data = [0u8, 0, 0, 8, 1, 2];
        let mut cursor = &data[..];
        let err = read_buffer(&mut cursor).unwrap_err();
        assert_eq!(err, ProtocolError::Incomplete { needed: 6 });
    }

    #[test]
    fn test_negative_length_rejected() {
        let data = (-1i32).to_be_bytes();
        let mut cursor = &data[..];
        assert!(matches!(
            read_buffer(&mut cursor),
            Err(ProtocolError::InvalidLength { length: -1, .. })
        ));
    }

    #[test]
    fn test_vax_integer() {
        assert_eq!(vax_integer(&[0x03]), 3);
        assert_eq!(vax_integer(&[0x00, 0x01]), 256);
        assert_eq!(vax_integer(&[0xFF, 0xFF]), -1);
        assert_eq!(vax_integer(&[0x78, 0x56, 0x34, 0x12]), 0x1234_5678);
        assert_eq!(vax_long(&[1, 0, 0, 0, 0, 0, 0, 1]), 0x0100_0000_0000_0001);
    }

    proptest! {
        #[test]
        fn prop_buffer_is_word_aligned(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut buf = BytesMut::new();
            write_buffer(&mut buf, &data).unwrap();
            prop_assert_eq!(buf.len() % 4, 0);
            prop_assert_eq!(buf.len(), buffer_len(data.len()));
            let mut cursor = buf.freeze();
            prop_assert_eq!(&read_buffer(&mut cursor).unwrap()[..], &data[..]);
            prop_assert_eq!(cursor.remaining(), 0);
        }
    }
}
