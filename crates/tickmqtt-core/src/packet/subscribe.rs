//! SUBSCRIBE, SUBACK, UNSUBSCRIBE and UNSUBACK.

use crate::buffer::ByteBuffer;
use crate::error::{EncodeError, ProtocolError, Result};
use crate::packet::{read_packet_id, PacketType, ProtocolVersion, QoS};
use crate::property::{Properties, PropertyScope};
use crate::reason::{SubAckReasonCode, UnsubAckReasonCode};
use crate::wire::{Decode, Encode, Utf8String};

/// When the broker should send retained messages for a new subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RetainHandling {
    #[default]
    SendAtSubscribe = 0,
    SendAtSubscribeIfNew = 1,
    DoNotSend = 2,
}

/// MQTT v5 subscription options. Only `qos` exists in v3.1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionOptions {
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: RetainHandling,
}

impl SubscriptionOptions {
    pub fn new(qos: QoS) -> Self {
        Self {
            qos,
            ..Self::default()
        }
    }

    pub fn to_byte(self, version: ProtocolVersion) -> u8 {
        let mut byte = self.qos as u8;
        if version.is_v5() {
            if self.no_local {
                byte |= 0x04;
            }
            if self.retain_as_published {
                byte |= 0x08;
            }
            byte |= (self.retain_handling as u8) << 4;
        }
        byte
    }

    /// Parse from SUBSCRIBE options byte.
    pub fn from_byte(byte: u8, version: ProtocolVersion) -> Result<Self> {
        let reserved = if version.is_v5() { 0xC0 } else { 0xFC };
        if byte & reserved != 0 {
            return Err(ProtocolError::malformed(format!(
                "Subscription options reserved bits set: {:#04x}",
                byte
            )));
        }
        let qos = QoS::try_from(byte & 0x03)?;
        let retain_handling = match (byte >> 4) & 0x03 {
            0 => RetainHandling::SendAtSubscribe,
            1 => RetainHandling::SendAtSubscribeIfNew,
            2 => RetainHandling::DoNotSend,
            _ => return Err(ProtocolError::malformed("Retain handling value 3 is reserved")),
        };
        Ok(Self {
            qos,
            no_local: byte & 0x04 != 0,
            retain_as_published: byte & 0x08 != 0,
            retain_handling,
        })
    }
}

fn properties_size(version: ProtocolVersion, props: &Properties) -> usize {
    if version.is_v5() {
        props.encoding_size()
    } else {
        0
    }
}

fn decode_properties(
    version: ProtocolVersion,
    packet_type: PacketType,
    buf: &mut ByteBuffer,
) -> Result<Properties> {
    if version.is_v5() {
        Properties::decode_in(buf, PropertyScope::Packet(packet_type))
    } else {
        Ok(Properties::new())
    }
}

/// SUBSCRIBE packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub properties: Properties,
    pub subscriptions: Vec<(Utf8String, SubscriptionOptions)>,
}

impl Subscribe {
    pub(crate) fn remaining_length(&self, version: ProtocolVersion) -> usize {
        2 + properties_size(version, &self.properties)
            + self
                .subscriptions
                .iter()
                .map(|(filter, _)| filter.encoding_size() + 1)
                .sum::<usize>()
    }

    pub(crate) fn encode_body(
        &self,
        version: ProtocolVersion,
        buf: &mut ByteBuffer,
    ) -> std::result::Result<(), EncodeError> {
        buf.put_u16(self.packet_id)?;
        if version.is_v5() {
            self.properties.encode(buf)?;
        }
        for (filter, options) in &self.subscriptions {
            filter.encode(buf)?;
            buf.put_u8(options.to_byte(version))?;
        }
        Ok(())
    }

    pub(crate) fn decode_body(version: ProtocolVersion, buf: &mut ByteBuffer) -> Result<Self> {
        let packet_id = read_packet_id(buf)?;
        let properties = decode_properties(version, PacketType::Subscribe, buf)?;
        let mut subscriptions = Vec::new();
        while buf.remaining() > 0 {
            let filter = Utf8String::decode(buf)?;
            let options = SubscriptionOptions::from_byte(buf.read_u8()?, version)?;
            subscriptions.push((filter, options));
        }
        // MQTT-3.8.3-3: at least one topic filter
        if subscriptions.is_empty() {
            return Err(ProtocolError::violation("SUBSCRIBE without topic filters"));
        }
        Ok(Self {
            packet_id,
            properties,
            subscriptions,
        })
    }
}

/// SUBACK packet data, one reason code per requested filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub properties: Properties,
    pub reason_codes: Vec<SubAckReasonCode>,
}

impl SubAck {
    pub(crate) fn remaining_length(&self, version: ProtocolVersion) -> usize {
        2 + properties_size(version, &self.properties) + self.reason_codes.len()
    }

    pub(crate) fn encode_body(
        &self,
        version: ProtocolVersion,
        buf: &mut ByteBuffer,
    ) -> std::result::Result<(), EncodeError> {
        buf.put_u16(self.packet_id)?;
        if version.is_v5() {
            self.properties.encode(buf)?;
        }
        for code in &self.reason_codes {
            buf.put_u8((*code).into())?;
        }
        Ok(())
    }

    pub(crate) fn decode_body(version: ProtocolVersion, buf: &mut ByteBuffer) -> Result<Self> {
        let packet_id = read_packet_id(buf)?;
        let properties = decode_properties(version, PacketType::SubAck, buf)?;
        let reason_codes = buf
            .read_to_end()
            .iter()
            .map(|&b| SubAckReasonCode::try_from(b))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            packet_id,
            properties,
            reason_codes,
        })
    }
}

/// UNSUBSCRIBE packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub properties: Properties,
    pub topic_filters: Vec<Utf8String>,
}

impl Unsubscribe {
    pub(crate) fn remaining_length(&self, version: ProtocolVersion) -> usize {
        2 + properties_size(version, &self.properties)
            + self
                .topic_filters
                .iter()
                .map(Encode::encoding_size)
                .sum::<usize>()
    }

    pub(crate) fn encode_body(
        &self,
        version: ProtocolVersion,
        buf: &mut ByteBuffer,
    ) -> std::result::Result<(), EncodeError> {
        buf.put_u16(self.packet_id)?;
        if version.is_v5() {
            self.properties.encode(buf)?;
        }
        for filter in &self.topic_filters {
            filter.encode(buf)?;
        }
        Ok(())
    }

    pub(crate) fn decode_body(version: ProtocolVersion, buf: &mut ByteBuffer) -> Result<Self> {
        let packet_id = read_packet_id(buf)?;
        let properties = decode_properties(version, PacketType::Unsubscribe, buf)?;
        let mut topic_filters = Vec::new();
        while buf.remaining() > 0 {
            topic_filters.push(Utf8String::decode(buf)?);
        }
        // MQTT-3.10.3-2: at least one topic filter
        if topic_filters.is_empty() {
            return Err(ProtocolError::violation("UNSUBSCRIBE without topic filters"));
        }
        Ok(Self {
            packet_id,
            properties,
            topic_filters,
        })
    }
}

/// UNSUBACK packet data. The v3.1.1 form has no payload, so
/// `reason_codes` is empty there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubAck {
    pub packet_id: u16,
    pub properties: Properties,
    pub reason_codes: Vec<UnsubAckReasonCode>,
}

impl UnsubAck {
    pub(crate) fn remaining_length(&self, version: ProtocolVersion) -> usize {
        if version.is_v5() {
            2 + self.properties.encoding_size() + self.reason_codes.len()
        } else {
            2
        }
    }

    pub(crate) fn encode_body(
        &self,
        version: ProtocolVersion,
        buf: &mut ByteBuffer,
    ) -> std::result::Result<(), EncodeError> {
        buf.put_u16(self.packet_id)?;
        if version.is_v5() {
            self.properties.encode(buf)?;
            for code in &self.reason_codes {
                buf.put_u8((*code).into())?;
            }
        }
        Ok(())
    }

    pub(crate) fn decode_body(version: ProtocolVersion, buf: &mut ByteBuffer) -> Result<Self> {
        let packet_id = read_packet_id(buf)?;
        if !version.is_v5() {
            return Ok(Self {
                packet_id,
                properties: Properties::new(),
                reason_codes: Vec::new(),
            });
        }
        let properties = decode_properties(version, PacketType::UnsubAck, buf)?;
        let reason_codes = buf
            .read_to_end()
            .iter()
            .map(|&b| UnsubAckReasonCode::try_from(b))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            packet_id,
            properties,
            reason_codes,
        })
    }
}
