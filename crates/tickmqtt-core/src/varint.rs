//! Variable Byte Integer encoding/decoding for MQTT.
//!
//! MQTT uses a variable-length encoding scheme for remaining lengths,
//! property lengths and a few property values. 7 bits per byte carry the
//! value, the high bit flags that another byte follows:
//! - 0-127: 1 byte
//! - 128-16383: 2 bytes
//! - 16384-2097151: 3 bytes
//! - 2097152-268435455: 4 bytes

use crate::buffer::ByteBuffer;
use crate::error::{EncodeError, ProtocolError, Result};
use crate::wire::{Decode, Encode};

/// Largest value representable in four bytes.
pub const MAX_VALUE: u32 = 268_435_455;

/// A value in `0..=268_435_455` with its minimal 1-4 byte wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct VariableByteInteger(u32);

impl VariableByteInteger {
    pub fn new(value: u32) -> std::result::Result<Self, EncodeError> {
        if value > MAX_VALUE {
            return Err(EncodeError::VariableByteIntegerTooLarge(value as u64));
        }
        Ok(Self(value))
    }

    /// Build from a length, failing for anything above [`MAX_VALUE`].
    pub fn from_len(len: usize) -> std::result::Result<Self, EncodeError> {
        if len > MAX_VALUE as usize {
            return Err(EncodeError::VariableByteIntegerTooLarge(len as u64));
        }
        Ok(Self(len as u32))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Encode for VariableByteInteger {
    fn encoding_size(&self) -> usize {
        encoded_len(self.0)
    }

    fn encode(&self, buf: &mut ByteBuffer) -> std::result::Result<(), EncodeError> {
        let mut bytes = [0u8; 4];
        let written = encode_to_slice(self.0, &mut bytes);
        buf.put_slice(&bytes[..written])
    }
}

impl Decode for VariableByteInteger {
    fn decode(buf: &mut ByteBuffer) -> Result<Self> {
        match decode(buf.unread())? {
            Some((value, consumed)) => {
                buf.read_slice(consumed)?;
                Ok(Self(value))
            }
            None => Err(ProtocolError::malformed(
                "Variable byte integer truncated before its last byte",
            )),
        }
    }
}

/// Decode a variable byte integer from the front of a slice.
///
/// Returns `Ok(Some((value, bytes_consumed)))` if successful,
/// `Ok(None)` if more data is needed, or `Err` if the encoding is invalid.
///
/// # Example
/// ```
/// use tickmqtt_core::varint::decode;
/// let buf = [0x80, 0x01]; // Encodes 128
/// let (value, consumed) = decode(&buf).unwrap().unwrap();
/// assert_eq!(value, 128);
/// assert_eq!(consumed, 2);
/// ```
pub fn decode(buf: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut value = 0u32;

    for (i, &byte) in buf.iter().enumerate() {
        // A continuation byte followed by zero means a longer than minimal encoding
        if i > 0 && byte == 0 {
            return Err(ProtocolError::InvalidVariableByteInteger);
        }

        value |= ((byte & 0x7F) as u32) << (7 * i);

        if (byte & 0x80) == 0 {
            return Ok(Some((value, i + 1)));
        }

        if i == 3 {
            return Err(ProtocolError::InvalidVariableByteInteger);
        }
    }

    // Need more bytes
    Ok(None)
}

/// Encode a value into a slice of at least 4 bytes, returning the bytes written.
///
/// # Example
/// ```
/// use tickmqtt_core::varint::encode_to_slice;
/// let mut buf = [0u8; 4];
/// let written = encode_to_slice(128, &mut buf);
/// assert_eq!(written, 2);
/// assert_eq!(&buf[..2], &[0x80, 0x01]);
/// ```
pub fn encode_to_slice(mut value: u32, buf: &mut [u8]) -> usize {
    let mut i = 0;
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf[i] = byte;
        i += 1;
        if value == 0 {
            break;
        }
    }
    i
}

/// Number of bytes needed to encode a value.
///
/// # Example
/// ```
/// use tickmqtt_core::varint::encoded_len;
/// assert_eq!(encoded_len(127), 1);
/// assert_eq!(encoded_len(128), 2);
/// ```
pub fn encoded_len(mut value: u32) -> usize {
    let mut len = 0;
    loop {
        len += 1;
        value /= 128;
        if value == 0 {
            break;
        }
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_byte() {
        assert_eq!(decode(&[0]).unwrap(), Some((0, 1)));
        assert_eq!(decode(&[0x7F]).unwrap(), Some((127, 1)));
    }

    #[test]
    fn test_decode_multi_byte() {
        assert_eq!(decode(&[0x80, 0x01]).unwrap(), Some((128, 2)));
        assert_eq!(decode(&[0xFF, 0x7F]).unwrap(), Some((16383, 2)));
        assert_eq!(decode(&[0x80, 0x80, 0x01]).unwrap(), Some((16384, 3)));
        assert_eq!(
            decode(&[0xFF, 0xFF, 0xFF, 0x7F]).unwrap(),
            Some((268435455, 4))
        );
    }

    #[test]
    fn test_decode_incomplete() {
        assert_eq!(decode(&[]).unwrap(), None);
        assert_eq!(decode(&[0x80]).unwrap(), None);
        assert_eq!(decode(&[0x80, 0x80, 0x80]).unwrap(), None);
    }

    #[test]
    fn test_decode_fourth_byte_continuation() {
        // Fails as soon as the 4th byte still has its continuation bit set
        assert!(decode(&[0xFF, 0xFF, 0xFF, 0xFF]).is_err());
        assert!(decode(&[0x80, 0x80, 0x80, 0x80, 0x01]).is_err());
    }

    #[test]
    fn test_decode_non_minimal() {
        assert!(decode(&[0x80, 0x00]).is_err());
    }

    #[test]
    fn test_encoded_len_table() {
        let table = [
            (0, 1),
            (1, 1),
            (127, 1),
            (128, 2),
            (16383, 2),
            (16384, 3),
            (2097151, 3),
            (2097152, 4),
            (268435455, 4),
        ];
        for (value, size) in table {
            let vbi = VariableByteInteger::new(value).unwrap();
            assert_eq!(vbi.encoding_size(), size, "value {}", value);

            let mut buf = ByteBuffer::with_capacity(size);
            vbi.encode(&mut buf).unwrap();
            assert_eq!(buf.len(), size);
            assert_eq!(VariableByteInteger::decode(&mut buf).unwrap(), vbi);
            assert_eq!(buf.remaining(), 0);
        }
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(
            VariableByteInteger::new(268435456),
            Err(EncodeError::VariableByteIntegerTooLarge(268435456))
        );
    }

    #[test]
    fn test_decode_from_exhausted_buffer() {
        let mut buf = ByteBuffer::from_slice(&[0x80, 0x80]);
        assert!(matches!(
            VariableByteInteger::decode(&mut buf),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }
}
