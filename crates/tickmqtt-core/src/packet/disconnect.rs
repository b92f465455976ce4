//! DISCONNECT and AUTH.

use crate::buffer::ByteBuffer;
use crate::error::{EncodeError, Result};
use crate::packet::{PacketType, ProtocolVersion};
use crate::property::{Properties, PropertyScope};
use crate::reason::{AuthReasonCode, DisconnectReasonCode};
use crate::wire::{Decode, Encode};

/// Encoded size of a v5 "reason code + optional properties" body, which
/// shrinks to nothing for a success code without properties.
fn reason_body_len(success: bool, props: &Properties) -> usize {
    if success && props.is_empty() {
        0
    } else if props.is_empty() {
        1
    } else {
        1 + props.encoding_size()
    }
}

fn encode_reason_body(
    reason: u8,
    props: &Properties,
    buf: &mut ByteBuffer,
) -> std::result::Result<(), EncodeError> {
    if reason == 0 && props.is_empty() {
        return Ok(());
    }
    buf.put_u8(reason)?;
    if !props.is_empty() {
        props.encode(buf)?;
    }
    Ok(())
}

fn decode_reason_body(packet_type: PacketType, buf: &mut ByteBuffer) -> Result<(u8, Properties)> {
    if buf.remaining() == 0 {
        return Ok((0, Properties::new()));
    }
    let reason = buf.read_u8()?;
    let properties = if buf.remaining() > 0 {
        Properties::decode_in(buf, PropertyScope::Packet(packet_type))?
    } else {
        Properties::new()
    };
    Ok((reason, properties))
}

/// DISCONNECT packet data. v3.1.1 DISCONNECT has no body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub reason_code: DisconnectReasonCode,
    pub properties: Properties,
}

impl Default for Disconnect {
    fn default() -> Self {
        Self::new(DisconnectReasonCode::NormalDisconnection)
    }
}

impl Disconnect {
    pub fn new(reason_code: DisconnectReasonCode) -> Self {
        Self {
            reason_code,
            properties: Properties::new(),
        }
    }

    pub(crate) fn remaining_length(&self, version: ProtocolVersion) -> usize {
        if !version.is_v5() {
            return 0;
        }
        reason_body_len(
            self.reason_code == DisconnectReasonCode::NormalDisconnection,
            &self.properties,
        )
    }

    pub(crate) fn encode_body(
        &self,
        version: ProtocolVersion,
        buf: &mut ByteBuffer,
    ) -> std::result::Result<(), EncodeError> {
        if !version.is_v5() {
            return Ok(());
        }
        encode_reason_body(self.reason_code.into(), &self.properties, buf)
    }

    pub(crate) fn decode_body(version: ProtocolVersion, buf: &mut ByteBuffer) -> Result<Self> {
        if !version.is_v5() {
            return Ok(Self::default());
        }
        let (reason, properties) = decode_reason_body(PacketType::Disconnect, buf)?;
        Ok(Self {
            reason_code: DisconnectReasonCode::try_from(reason)?,
            properties,
        })
    }
}

/// AUTH packet data (MQTT v5 only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    pub reason_code: AuthReasonCode,
    pub properties: Properties,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            reason_code: AuthReasonCode::Success,
            properties: Properties::new(),
        }
    }
}

impl Auth {
    pub(crate) fn remaining_length(&self) -> usize {
        reason_body_len(self.reason_code == AuthReasonCode::Success, &self.properties)
    }

    pub(crate) fn encode_body(&self, buf: &mut ByteBuffer) -> std::result::Result<(), EncodeError> {
        encode_reason_body(self.reason_code.into(), &self.properties, buf)
    }

    pub(crate) fn decode_body(buf: &mut ByteBuffer) -> Result<Self> {
        let (reason, properties) = decode_reason_body(PacketType::Auth, buf)?;
        Ok(Self {
            reason_code: AuthReasonCode::try_from(reason)?,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::packet::Packet;
    use crate::property::PropertyType;
    use crate::wire::Utf8String;

    #[test]
    fn test_disconnect_wire_forms() {
        let normal = Packet::Disconnect(Disconnect::default());
        assert_eq!(normal.encode(ProtocolVersion::V5).unwrap().as_slice(), &[0xE0, 0x00]);

        let with_will = Packet::Disconnect(Disconnect::new(
            DisconnectReasonCode::DisconnectWithWillMessage,
        ));
        assert_eq!(
            with_will.encode(ProtocolVersion::V5).unwrap().as_slice(),
            &[0xE0, 0x01, 0x04]
        );
        assert_eq!(
            with_will.encode(ProtocolVersion::V311).unwrap().as_slice(),
            &[0xE0, 0x00]
        );
    }

    #[test]
    fn test_disconnect_server_reference() {
        let mut d = Disconnect::new(DisconnectReasonCode::ServerMoved);
        d.properties.try_add(
            PropertyType::ServerReference,
            Utf8String::new("other:1883").unwrap(),
            true,
        );
        let packet = Packet::Disconnect(d);
        let buf = packet.encode(ProtocolVersion::V5).unwrap();
        let decoded = Packet::decode(buf.as_slice(), ProtocolVersion::V5).unwrap();
        let Packet::Disconnect(d) = &decoded else {
            panic!("expected DISCONNECT");
        };
        assert_eq!(d.properties.get_str(PropertyType::ServerReference), Some("other:1883"));
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_disconnect_unknown_reason() {
        let err = Packet::decode(&[0xE0, 0x01, 0x05], ProtocolVersion::V5);
        assert!(matches!(err, Err(ProtocolError::MalformedPacket(_))));
    }

    #[test]
    fn test_auth_round_trip() {
        let mut auth = Auth {
            reason_code: AuthReasonCode::ContinueAuthentication,
            properties: Properties::new(),
        };
        auth.properties.try_add(
            PropertyType::AuthenticationMethod,
            Utf8String::new("SCRAM-SHA-1").unwrap(),
            true,
        );
        let packet = Packet::Auth(auth);
        let buf = packet.encode(ProtocolVersion::V5).unwrap();
        assert_eq!(Packet::decode(buf.as_slice(), ProtocolVersion::V5).unwrap(), packet);
    }
}
