//! MQTT packet types and codec for MQTT 3.1.1 and MQTT 5.0.
//!
//! [`Packet`] is a closed sum over the fifteen control packet types. Each
//! variant's body knows its own remaining length and how to write and read
//! itself for a given [`ProtocolVersion`]; this module adds the fixed header
//! and the flag checks shared by all of them.

mod connect;
mod disconnect;
mod publish;
mod subscribe;

pub use connect::{ConnAck, Connect, Will};
pub use disconnect::{Auth, Disconnect};
pub use publish::{Publish, PublishAck, PublishRelease};
pub use subscribe::{RetainHandling, SubAck, Subscribe, SubscriptionOptions, UnsubAck, Unsubscribe};

use crate::buffer::ByteBuffer;
use crate::error::{EncodeError, ProtocolError, Result};
use crate::varint::{self, VariableByteInteger};
use crate::wire::Encode;

/// Protocol level byte carried in CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ProtocolVersion {
    V311 = 4,
    #[default]
    V5 = 5,
}

impl ProtocolVersion {
    pub fn is_v5(self) -> bool {
        self == ProtocolVersion::V5
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            4 => Ok(ProtocolVersion::V311),
            5 => Ok(ProtocolVersion::V5),
            _ => Err(ProtocolError::violation(format!(
                "Unsupported protocol version: {}",
                value
            ))),
        }
    }
}

/// MQTT Control Packet Types (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl PacketType {
    /// Required low nibble of the fixed header. PUBLISH carries its own
    /// flags and is checked separately.
    fn required_flags(self) -> Option<u8> {
        match self {
            PacketType::Publish => None,
            PacketType::PubRel | PacketType::Subscribe | PacketType::Unsubscribe => Some(0x02),
            _ => Some(0x00),
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::ConnAck),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::PubAck),
            5 => Ok(PacketType::PubRec),
            6 => Ok(PacketType::PubRel),
            7 => Ok(PacketType::PubComp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::SubAck),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::UnsubAck),
            12 => Ok(PacketType::PingReq),
            13 => Ok(PacketType::PingResp),
            14 => Ok(PacketType::Disconnect),
            15 => Ok(PacketType::Auth),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(u8)]
#[allow(clippy::enum_variant_names)] // MQTT spec names
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::malformed(format!("Invalid QoS: {}", value))),
        }
    }
}

/// Packet type from the top nibble of the first byte, without looking at
/// the rest of the packet.
pub fn check_packet_type(first_byte: u8) -> Result<PacketType> {
    PacketType::try_from(first_byte >> 4)
}

/// Type, flags and remaining length of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: u32,
}

impl FixedHeader {
    /// Parse the fixed header at the front of `buf`.
    ///
    /// Returns `Ok(None)` if the remaining length is not complete yet,
    /// otherwise the header and its size in bytes.
    pub fn parse(buf: &[u8]) -> Result<Option<(FixedHeader, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        let packet_type = check_packet_type(first)?;
        let Some((remaining_length, len_bytes)) = varint::decode(&buf[1..])? else {
            return Ok(None);
        };
        Ok(Some((
            FixedHeader {
                packet_type,
                flags: first & 0x0F,
                remaining_length,
            },
            1 + len_bytes,
        )))
    }

    /// Size of the whole packet this header introduces.
    pub fn packet_len(&self) -> usize {
        1 + varint::encoded_len(self.remaining_length) + self.remaining_length as usize
    }
}

/// MQTT Packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Box<Connect>),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PublishAck),
    PubRec(PublishAck),
    PubRel(PublishRelease),
    PubComp(PublishRelease),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(UnsubAck),
    PingReq,
    PingResp,
    Disconnect(Disconnect),
    Auth(Auth),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect(_) => PacketType::Disconnect,
            Packet::Auth(_) => PacketType::Auth,
        }
    }

    /// Packet identifier, for the types that carry one.
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            Packet::Publish(p) => p.packet_id,
            Packet::PubAck(p) | Packet::PubRec(p) => Some(p.packet_id),
            Packet::PubRel(p) | Packet::PubComp(p) => Some(p.packet_id),
            Packet::Subscribe(p) => Some(p.packet_id),
            Packet::SubAck(p) => Some(p.packet_id),
            Packet::Unsubscribe(p) => Some(p.packet_id),
            Packet::UnsubAck(p) => Some(p.packet_id),
            _ => None,
        }
    }

    fn flags(&self) -> u8 {
        match self {
            Packet::Publish(p) => p.flags(),
            other => other.packet_type().required_flags().unwrap_or(0),
        }
    }

    fn remaining_length(&self, version: ProtocolVersion) -> usize {
        match self {
            Packet::Connect(p) => p.remaining_length(),
            Packet::ConnAck(p) => p.remaining_length(version),
            Packet::Publish(p) => p.remaining_length(version),
            Packet::PubAck(p) | Packet::PubRec(p) => p.remaining_length(version),
            Packet::PubRel(p) | Packet::PubComp(p) => p.remaining_length(version),
            Packet::Subscribe(p) => p.remaining_length(version),
            Packet::SubAck(p) => p.remaining_length(version),
            Packet::Unsubscribe(p) => p.remaining_length(version),
            Packet::UnsubAck(p) => p.remaining_length(version),
            Packet::PingReq | Packet::PingResp => 0,
            Packet::Disconnect(p) => p.remaining_length(version),
            Packet::Auth(p) => p.remaining_length(),
        }
    }

    /// Bytes the encoded packet occupies, fixed header included.
    pub fn encoding_size(&self, version: ProtocolVersion) -> usize {
        let remaining = self.remaining_length(version);
        1 + varint::encoded_len(remaining as u32) + remaining
    }

    /// Encode into a buffer sized exactly for this packet.
    pub fn encode(&self, version: ProtocolVersion) -> std::result::Result<ByteBuffer, EncodeError> {
        if matches!(self, Packet::Auth(_)) && !version.is_v5() {
            return Err(EncodeError::NotInProtocolVersion("AUTH"));
        }
        let remaining = self.remaining_length(version);
        let remaining_vbi = VariableByteInteger::from_len(remaining)?;
        let mut buf = ByteBuffer::with_capacity(1 + remaining_vbi.encoding_size() + remaining);

        buf.put_u8(((self.packet_type() as u8) << 4) | self.flags())?;
        remaining_vbi.encode(&mut buf)?;

        match self {
            Packet::Connect(p) => p.encode_body(&mut buf)?,
            Packet::ConnAck(p) => p.encode_body(version, &mut buf)?,
            Packet::Publish(p) => p.encode_body(version, &mut buf)?,
            Packet::PubAck(p) | Packet::PubRec(p) => p.encode_body(version, &mut buf)?,
            Packet::PubRel(p) | Packet::PubComp(p) => p.encode_body(version, &mut buf)?,
            Packet::Subscribe(p) => p.encode_body(version, &mut buf)?,
            Packet::SubAck(p) => p.encode_body(version, &mut buf)?,
            Packet::Unsubscribe(p) => p.encode_body(version, &mut buf)?,
            Packet::UnsubAck(p) => p.encode_body(version, &mut buf)?,
            Packet::PingReq | Packet::PingResp => {}
            Packet::Disconnect(p) => p.encode_body(version, &mut buf)?,
            Packet::Auth(p) => p.encode_body(&mut buf)?,
        }

        debug_assert_eq!(buf.len(), buf.capacity());
        Ok(buf)
    }

    /// Decode exactly one packet from `frame`.
    ///
    /// The frame must hold the whole packet and nothing else; use
    /// [`crate::frame::split_frames`] to cut a byte stream into frames.
    pub fn decode(frame: &[u8], version: ProtocolVersion) -> Result<Packet> {
        let Some((header, header_len)) = FixedHeader::parse(frame)? else {
            return Err(ProtocolError::malformed("Truncated fixed header"));
        };
        if frame.len() != header_len + header.remaining_length as usize {
            return Err(ProtocolError::malformed(format!(
                "{:?} remaining length {} does not match the {} bytes received",
                header.packet_type,
                header.remaining_length,
                frame.len() - header_len
            )));
        }

        // MQTT-2.1.3-1: reserved flag bits must hold their fixed values
        if let Some(required) = header.packet_type.required_flags() {
            if header.flags != required {
                return Err(ProtocolError::malformed(format!(
                    "{:?} fixed header flags must be {:#04x}, got {:#04x}",
                    header.packet_type, required, header.flags
                )));
            }
        }

        let mut body = ByteBuffer::from_slice(&frame[header_len..]);
        let packet = match header.packet_type {
            PacketType::Connect => Packet::Connect(Box::new(Connect::decode_body(&mut body)?)),
            PacketType::ConnAck => Packet::ConnAck(ConnAck::decode_body(version, &mut body)?),
            PacketType::Publish => {
                Packet::Publish(Publish::decode_body(header.flags, version, &mut body)?)
            }
            PacketType::PubAck => {
                Packet::PubAck(PublishAck::decode_body(PacketType::PubAck, version, &mut body)?)
            }
            PacketType::PubRec => {
                Packet::PubRec(PublishAck::decode_body(PacketType::PubRec, version, &mut body)?)
            }
            PacketType::PubRel => Packet::PubRel(PublishRelease::decode_body(
                PacketType::PubRel,
                version,
                &mut body,
            )?),
            PacketType::PubComp => Packet::PubComp(PublishRelease::decode_body(
                PacketType::PubComp,
                version,
                &mut body,
            )?),
            PacketType::Subscribe => Packet::Subscribe(Subscribe::decode_body(version, &mut body)?),
            PacketType::SubAck => Packet::SubAck(SubAck::decode_body(version, &mut body)?),
            PacketType::Unsubscribe => {
                Packet::Unsubscribe(Unsubscribe::decode_body(version, &mut body)?)
            }
            PacketType::UnsubAck => Packet::UnsubAck(UnsubAck::decode_body(version, &mut body)?),
            PacketType::PingReq => Packet::PingReq,
            PacketType::PingResp => Packet::PingResp,
            PacketType::Disconnect => {
                Packet::Disconnect(Disconnect::decode_body(version, &mut body)?)
            }
            PacketType::Auth => {
                if !version.is_v5() {
                    return Err(ProtocolError::InvalidPacketType(PacketType::Auth as u8));
                }
                Packet::Auth(Auth::decode_body(&mut body)?)
            }
        };

        if body.remaining() != 0 {
            return Err(ProtocolError::malformed(format!(
                "{} unexpected trailing bytes in {:?}",
                body.remaining(),
                header.packet_type
            )));
        }
        Ok(packet)
    }
}

/// Read a packet identifier; zero is never valid on the wire.
pub(crate) fn read_packet_id(buf: &mut ByteBuffer) -> Result<u16> {
    let id = buf.read_u16()?;
    if id == 0 {
        return Err(ProtocolError::malformed("Packet identifier must not be zero"));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_packet_type() {
        assert_eq!(check_packet_type(0x30).unwrap(), PacketType::Publish);
        assert_eq!(check_packet_type(0xD0).unwrap(), PacketType::PingResp);
        assert_eq!(check_packet_type(0x00), Err(ProtocolError::InvalidPacketType(0)));
    }

    #[test]
    fn test_fixed_header_parse() {
        let (header, len) = FixedHeader::parse(&[0x62, 0x02, 0x00, 0x01]).unwrap().unwrap();
        assert_eq!(header.packet_type, PacketType::PubRel);
        assert_eq!(header.flags, 0x02);
        assert_eq!(header.remaining_length, 2);
        assert_eq!(len, 2);
        assert_eq!(header.packet_len(), 4);

        assert_eq!(FixedHeader::parse(&[0x30, 0x80]).unwrap(), None);
        assert_eq!(FixedHeader::parse(&[]).unwrap(), None);
    }

    #[test]
    fn test_ping_wire_form() {
        let req = Packet::PingReq.encode(ProtocolVersion::V5).unwrap();
        assert_eq!(req.as_slice(), &[0xC0, 0x00]);
        assert_eq!(
            Packet::decode(&[0xD0, 0x00], ProtocolVersion::V311).unwrap(),
            Packet::PingResp
        );
    }

    #[test]
    fn test_reserved_flags_rejected() {
        // PUBREL with flags 0
        let err = Packet::decode(&[0x60, 0x02, 0x00, 0x01], ProtocolVersion::V5);
        assert!(matches!(err, Err(ProtocolError::MalformedPacket(_))));
        // PINGRESP with a flag bit set
        let err = Packet::decode(&[0xD1, 0x00], ProtocolVersion::V5);
        assert!(matches!(err, Err(ProtocolError::MalformedPacket(_))));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = Packet::decode(&[0x40, 0x03, 0x00, 0x01], ProtocolVersion::V5);
        assert!(matches!(err, Err(ProtocolError::MalformedPacket(_))));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let err = Packet::decode(&[0xD0, 0x01, 0x00], ProtocolVersion::V5);
        assert!(matches!(err, Err(ProtocolError::MalformedPacket(_))));
    }

    #[test]
    fn test_auth_rejected_in_v311() {
        assert_eq!(
            Packet::Auth(Auth::default()).encode(ProtocolVersion::V311),
            Err(EncodeError::NotInProtocolVersion("AUTH"))
        );
        assert_eq!(
            Packet::decode(&[0xF0, 0x00], ProtocolVersion::V311),
            Err(ProtocolError::InvalidPacketType(15))
        );
    }

    #[test]
    fn test_encoding_size_matches_output() {
        let packet = Packet::PubAck(PublishAck::new(7));
        for version in [ProtocolVersion::V311, ProtocolVersion::V5] {
            let buf = packet.encode(version).unwrap();
            assert_eq!(buf.len(), packet.encoding_size(version));
        }
    }
}
