//! Encoding contract shared by every wire primitive, plus the
//! length-prefixed string and binary types.

use bytes::Bytes;

use crate::buffer::ByteBuffer;
use crate::error::{EncodeError, ProtocolError, Result};

/// A value that knows its exact wire size and can write itself.
pub trait Encode {
    /// Bytes `encode` will append.
    fn encoding_size(&self) -> usize;

    fn encode(&self, buf: &mut ByteBuffer) -> std::result::Result<(), EncodeError>;
}

/// A value that can be parsed from the read cursor of a buffer.
pub trait Decode: Sized {
    fn decode(buf: &mut ByteBuffer) -> Result<Self>;
}

const MAX_LEN: usize = u16::MAX as usize;

/// UTF-8 string with a 2-byte big-endian length prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Utf8String(String);

impl Utf8String {
    pub fn new(value: impl Into<String>) -> std::result::Result<Self, EncodeError> {
        let value = value.into();
        if value.len() > MAX_LEN {
            return Err(EncodeError::StringTooLong(value.len()));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<&str> for Utf8String {
    type Error = EncodeError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for Utf8String {
    type Error = EncodeError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl std::fmt::Display for Utf8String {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Encode for Utf8String {
    fn encoding_size(&self) -> usize {
        2 + self.0.len()
    }

    fn encode(&self, buf: &mut ByteBuffer) -> std::result::Result<(), EncodeError> {
        buf.put_u16(self.0.len() as u16)?;
        buf.put_slice(self.0.as_bytes())
    }
}

impl Decode for Utf8String {
    fn decode(buf: &mut ByteBuffer) -> Result<Self> {
        let len = buf.read_u16()? as usize;
        let bytes = buf.read_slice(len)?;
        // MQTT-1.5.4-2: UTF-8 string MUST NOT contain null character U+0000
        if bytes.contains(&0u8) {
            return Err(ProtocolError::malformed(
                "UTF-8 string must not contain null character",
            ));
        }
        let s = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(Self(s.to_owned()))
    }
}

/// Key/value pair of UTF-8 strings, the payload of a user property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Utf8StringPair {
    pub key: Utf8String,
    pub value: Utf8String,
}

impl Utf8StringPair {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> std::result::Result<Self, EncodeError> {
        Ok(Self {
            key: Utf8String::new(key)?,
            value: Utf8String::new(value)?,
        })
    }
}

impl Encode for Utf8StringPair {
    fn encoding_size(&self) -> usize {
        self.key.encoding_size() + self.value.encoding_size()
    }

    fn encode(&self, buf: &mut ByteBuffer) -> std::result::Result<(), EncodeError> {
        self.key.encode(buf)?;
        self.value.encode(buf)
    }
}

impl Decode for Utf8StringPair {
    fn decode(buf: &mut ByteBuffer) -> Result<Self> {
        let key = Utf8String::decode(buf)?;
        let value = Utf8String::decode(buf)?;
        Ok(Self { key, value })
    }
}

/// Opaque bytes with a 2-byte big-endian length prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BinaryData(Bytes);

impl BinaryData {
    pub fn new(value: impl Into<Bytes>) -> std::result::Result<Self, EncodeError> {
        let value = value.into();
        if value.len() > MAX_LEN {
            return Err(EncodeError::BinaryTooLong(value.len()));
        }
        Ok(Self(value))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl Encode for BinaryData {
    fn encoding_size(&self) -> usize {
        2 + self.0.len()
    }

    fn encode(&self, buf: &mut ByteBuffer) -> std::result::Result<(), EncodeError> {
        buf.put_u16(self.0.len() as u16)?;
        buf.put_slice(&self.0)
    }
}

impl Decode for BinaryData {
    fn decode(buf: &mut ByteBuffer) -> Result<Self> {
        let len = buf.read_u16()? as usize;
        let bytes = buf.read_slice(len)?;
        Ok(Self(Bytes::copy_from_slice(bytes)))
    }
}
