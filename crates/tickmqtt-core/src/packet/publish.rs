//! PUBLISH and its acknowledgement packets.

use bytes::Bytes;

use crate::buffer::ByteBuffer;
use crate::error::{EncodeError, ProtocolError, Result};
use crate::packet::{read_packet_id, PacketType, ProtocolVersion, QoS};
use crate::property::{Properties, PropertyScope};
use crate::reason::{PubAckReasonCode, PubRelReasonCode};
use crate::wire::{Decode, Encode, Utf8String};

/// PUBLISH packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    /// May be empty in v5 when a topic alias stands in for it
    pub topic: Utf8String,
    /// Present exactly when `qos` is above 0
    pub packet_id: Option<u16>,
    pub properties: Properties,
    pub payload: Bytes,
}

impl Publish {
    pub fn new(topic: Utf8String, qos: QoS, payload: impl Into<Bytes>) -> Self {
        Self {
            dup: false,
            qos,
            retain: false,
            topic,
            packet_id: None,
            properties: Properties::new(),
            payload: payload.into(),
        }
    }

    pub(crate) fn flags(&self) -> u8 {
        let mut flags = (self.qos as u8) << 1;
        if self.dup {
            flags |= 0x08;
        }
        if self.retain {
            flags |= 0x01;
        }
        flags
    }

    pub(crate) fn remaining_length(&self, version: ProtocolVersion) -> usize {
        let mut len = self.topic.encoding_size();
        if self.qos != QoS::AtMostOnce {
            len += 2;
        }
        if version.is_v5() {
            len += self.properties.encoding_size();
        }
        len + self.payload.len()
    }

    pub(crate) fn encode_body(
        &self,
        version: ProtocolVersion,
        buf: &mut ByteBuffer,
    ) -> std::result::Result<(), EncodeError> {
        self.topic.encode(buf)?;
        if self.qos != QoS::AtMostOnce {
            buf.put_u16(self.packet_id.unwrap_or(0))?;
        }
        if version.is_v5() {
            self.properties.encode(buf)?;
        }
        buf.put_slice(&self.payload)
    }

    pub(crate) fn decode_body(
        flags: u8,
        version: ProtocolVersion,
        buf: &mut ByteBuffer,
    ) -> Result<Self> {
        let dup = flags & 0x08 != 0;
        let qos = QoS::try_from((flags >> 1) & 0x03)?;
        let retain = flags & 0x01 != 0;

        // MQTT-3.3.1-2: DUP must be 0 for QoS 0
        if qos == QoS::AtMostOnce && dup {
            return Err(ProtocolError::malformed("DUP flag set on a QoS 0 PUBLISH"));
        }

        let topic = Utf8String::decode(buf)?;
        // MQTT-3.3.2-2: topic names must not contain wildcards
        if topic.as_str().contains(['+', '#']) {
            return Err(ProtocolError::violation(format!(
                "Topic name contains wildcard: {}",
                topic
            )));
        }

        let packet_id = if qos != QoS::AtMostOnce {
            Some(read_packet_id(buf)?)
        } else {
            None
        };
        let properties = if version.is_v5() {
            Properties::decode_in(buf, PropertyScope::Packet(PacketType::Publish))?
        } else {
            Properties::new()
        };
        let payload = Bytes::copy_from_slice(buf.read_to_end());

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            properties,
            payload,
        })
    }
}

// v5 acks drop the reason code when it is Success with no properties, and
// the property length when there are no properties.
fn ack_remaining_length(version: ProtocolVersion, success: bool, props: &Properties) -> usize {
    if !version.is_v5() || (success && props.is_empty()) {
        2
    } else if props.is_empty() {
        3
    } else {
        3 + props.encoding_size()
    }
}

fn encode_ack(
    packet_id: u16,
    reason: u8,
    props: &Properties,
    version: ProtocolVersion,
    buf: &mut ByteBuffer,
) -> std::result::Result<(), EncodeError> {
    buf.put_u16(packet_id)?;
    if !version.is_v5() || (reason == 0 && props.is_empty()) {
        return Ok(());
    }
    buf.put_u8(reason)?;
    if !props.is_empty() {
        props.encode(buf)?;
    }
    Ok(())
}

fn decode_ack(
    packet_type: PacketType,
    version: ProtocolVersion,
    buf: &mut ByteBuffer,
) -> Result<(u16, u8, Properties)> {
    let packet_id = read_packet_id(buf)?;
    if !version.is_v5() || buf.remaining() == 0 {
        return Ok((packet_id, 0, Properties::new()));
    }
    let reason = buf.read_u8()?;
    let properties = if buf.remaining() > 0 {
        Properties::decode_in(buf, PropertyScope::Packet(packet_type))?
    } else {
        Properties::new()
    };
    Ok((packet_id, reason, properties))
}

/// PUBACK or PUBREC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub packet_id: u16,
    pub reason_code: PubAckReasonCode,
    pub properties: Properties,
}

impl PublishAck {
    pub fn new(packet_id: u16) -> Self {
        Self::with_reason(packet_id, PubAckReasonCode::Success)
    }

    pub fn with_reason(packet_id: u16, reason_code: PubAckReasonCode) -> Self {
        Self {
            packet_id,
            reason_code,
            properties: Properties::new(),
        }
    }

    pub(crate) fn remaining_length(&self, version: ProtocolVersion) -> usize {
        ack_remaining_length(
            version,
            self.reason_code == PubAckReasonCode::Success,
            &self.properties,
        )
    }

    pub(crate) fn encode_body(
        &self,
        version: ProtocolVersion,
        buf: &mut ByteBuffer,
    ) -> std::result::Result<(), EncodeError> {
        encode_ack(
            self.packet_id,
            self.reason_code.into(),
            &self.properties,
            version,
            buf,
        )
    }

    pub(crate) fn decode_body(
        packet_type: PacketType,
        version: ProtocolVersion,
        buf: &mut ByteBuffer,
    ) -> Result<Self> {
        let (packet_id, reason, properties) = decode_ack(packet_type, version, buf)?;
        Ok(Self {
            packet_id,
            reason_code: PubAckReasonCode::try_from(reason)?,
            properties,
        })
    }
}

/// PUBREL or PUBCOMP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRelease {
    pub packet_id: u16,
    pub reason_code: PubRelReasonCode,
    pub properties: Properties,
}

impl PublishRelease {
    pub fn new(packet_id: u16) -> Self {
        Self::with_reason(packet_id, PubRelReasonCode::Success)
    }

    pub fn with_reason(packet_id: u16, reason_code: PubRelReasonCode) -> Self {
        Self {
            packet_id,
            reason_code,
            properties: Properties::new(),
        }
    }

    pub(crate) fn remaining_length(&self, version: ProtocolVersion) -> usize {
        ack_remaining_length(
            version,
            self.reason_code == PubRelReasonCode::Success,
            &self.properties,
        )
    }

    pub(crate) fn encode_body(
        &self,
        version: ProtocolVersion,
        buf: &mut ByteBuffer,
    ) -> std::result::Result<(), EncodeError> {
        encode_ack(
            self.packet_id,
            self.reason_code.into(),
            &self.properties,
            version,
            buf,
        )
    }

    pub(crate) fn decode_body(
        packet_type: PacketType,
        version: ProtocolVersion,
        buf: &mut ByteBuffer,
    ) -> Result<Self> {
        let (packet_id, reason, properties) = decode_ack(packet_type, version, buf)?;
        Ok(Self {
            packet_id,
            reason_code: PubRelReasonCode::try_from(reason)?,
            properties,
        })
    }
}
