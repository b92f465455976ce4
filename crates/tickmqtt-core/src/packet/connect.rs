//! CONNECT and CONNACK.

use crate::buffer::ByteBuffer;
use crate::error::{EncodeError, ProtocolError, Result};
use crate::packet::{PacketType, ProtocolVersion, QoS};
use crate::property::{Properties, PropertyScope};
use crate::reason::ConnectReasonCode;
use crate::wire::{BinaryData, Decode, Encode, Utf8String};

const PROTOCOL_NAME: &str = "MQTT";

const FLAG_CLEAN_START: u8 = 0x02;
const FLAG_WILL: u8 = 0x04;
const FLAG_WILL_RETAIN: u8 = 0x20;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

/// Will message configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: Utf8String,
    pub payload: BinaryData,
    pub qos: QoS,
    pub retain: bool,
    /// MQTT v5 will properties, ignored for v3.1.1
    pub properties: Properties,
}

impl Will {
    fn encoding_size(&self, version: ProtocolVersion) -> usize {
        let props = if version.is_v5() {
            self.properties.encoding_size()
        } else {
            0
        };
        props + self.topic.encoding_size() + self.payload.encoding_size()
    }
}

/// CONNECT packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub version: ProtocolVersion,
    pub clean_start: bool,
    pub keep_alive: u16,
    /// MQTT v5 properties, ignored for v3.1.1
    pub properties: Properties,
    pub client_id: Utf8String,
    pub will: Option<Will>,
    pub username: Option<Utf8String>,
    pub password: Option<BinaryData>,
}

impl Connect {
    pub fn new(version: ProtocolVersion, client_id: Utf8String) -> Self {
        Self {
            version,
            clean_start: true,
            keep_alive: 60,
            properties: Properties::new(),
            client_id,
            will: None,
            username: None,
            password: None,
        }
    }

    fn connect_flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.clean_start {
            flags |= FLAG_CLEAN_START;
        }
        if let Some(will) = &self.will {
            flags |= FLAG_WILL | ((will.qos as u8) << 3);
            if will.retain {
                flags |= FLAG_WILL_RETAIN;
            }
        }
        if self.password.is_some() {
            flags |= FLAG_PASSWORD;
        }
        if self.username.is_some() {
            flags |= FLAG_USERNAME;
        }
        flags
    }

    pub(crate) fn remaining_length(&self) -> usize {
        // Protocol name, level, flags, keep alive
        let mut len = 2 + PROTOCOL_NAME.len() + 1 + 1 + 2;
        if self.version.is_v5() {
            len += self.properties.encoding_size();
        }
        len += self.client_id.encoding_size();
        if let Some(will) = &self.will {
            len += will.encoding_size(self.version);
        }
        if let Some(username) = &self.username {
            len += username.encoding_size();
        }
        if let Some(password) = &self.password {
            len += password.encoding_size();
        }
        len
    }

    pub(crate) fn encode_body(&self, buf: &mut ByteBuffer) -> std::result::Result<(), EncodeError> {
        Utf8String::new(PROTOCOL_NAME)?.encode(buf)?;
        buf.put_u8(self.version as u8)?;
        buf.put_u8(self.connect_flags())?;
        buf.put_u16(self.keep_alive)?;
        if self.version.is_v5() {
            self.properties.encode(buf)?;
        }

        self.client_id.encode(buf)?;
        if let Some(will) = &self.will {
            if self.version.is_v5() {
                will.properties.encode(buf)?;
            }
            will.topic.encode(buf)?;
            will.payload.encode(buf)?;
        }
        if let Some(username) = &self.username {
            username.encode(buf)?;
        }
        if let Some(password) = &self.password {
            password.encode(buf)?;
        }
        Ok(())
    }

    pub(crate) fn decode_body(buf: &mut ByteBuffer) -> Result<Self> {
        let protocol_name = Utf8String::decode(buf)?;
        if protocol_name.as_str() != PROTOCOL_NAME {
            return Err(ProtocolError::violation(format!(
                "Invalid protocol name: {}",
                protocol_name
            )));
        }
        let version = ProtocolVersion::try_from(buf.read_u8()?)?;

        let flags = buf.read_u8()?;
        // Reserved bit must be 0
        if flags & 0x01 != 0 {
            return Err(ProtocolError::malformed("CONNECT reserved flag is set"));
        }
        let will_flag = flags & FLAG_WILL != 0;
        let will_qos = QoS::try_from((flags >> 3) & 0x03)?;
        let will_retain = flags & FLAG_WILL_RETAIN != 0;
        // MQTT-3.1.2-11/13/15: will QoS and retain must be 0 without a will
        if !will_flag && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(ProtocolError::malformed(
                "Will QoS and Will Retain must be 0 when Will Flag is 0",
            ));
        }

        let keep_alive = buf.read_u16()?;
        let properties = if version.is_v5() {
            Properties::decode_in(buf, PropertyScope::Packet(PacketType::Connect))?
        } else {
            Properties::new()
        };

        let client_id = Utf8String::decode(buf)?;
        let will = if will_flag {
            let properties = if version.is_v5() {
                Properties::decode_in(buf, PropertyScope::Will)?
            } else {
                Properties::new()
            };
            Some(Will {
                topic: Utf8String::decode(buf)?,
                payload: BinaryData::decode(buf)?,
                qos: will_qos,
                retain: will_retain,
                properties,
            })
        } else {
            None
        };
        let username = if flags & FLAG_USERNAME != 0 {
            Some(Utf8String::decode(buf)?)
        } else {
            None
        };
        let password = if flags & FLAG_PASSWORD != 0 {
            Some(BinaryData::decode(buf)?)
        } else {
            None
        };

        Ok(Self {
            version,
            clean_start: flags & FLAG_CLEAN_START != 0,
            keep_alive,
            properties,
            client_id,
            will,
            username,
            password,
        })
    }
}

/// CONNACK packet data. For v3.1.1 the return code is mapped onto the
/// matching v5 reason code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub reason_code: ConnectReasonCode,
    pub properties: Properties,
}

impl ConnAck {
    pub fn new(reason_code: ConnectReasonCode) -> Self {
        Self {
            session_present: false,
            reason_code,
            properties: Properties::new(),
        }
    }

    pub(crate) fn remaining_length(&self, version: ProtocolVersion) -> usize {
        if version.is_v5() {
            2 + self.properties.encoding_size()
        } else {
            2
        }
    }

    pub(crate) fn encode_body(
        &self,
        version: ProtocolVersion,
        buf: &mut ByteBuffer,
    ) -> std::result::Result<(), EncodeError> {
        buf.put_u8(self.session_present as u8)?;
        if version.is_v5() {
            buf.put_u8(self.reason_code.into())?;
            self.properties.encode(buf)
        } else {
            buf.put_u8(self.reason_code.to_v3_return_code())
        }
    }

    pub(crate) fn decode_body(version: ProtocolVersion, buf: &mut ByteBuffer) -> Result<Self> {
        let ack_flags = buf.read_u8()?;
        if ack_flags & 0xFE != 0 {
            return Err(ProtocolError::malformed("CONNACK reserved flags are set"));
        }
        let session_present = ack_flags & 0x01 != 0;

        let code = buf.read_u8()?;
        let reason_code = if version.is_v5() {
            ConnectReasonCode::try_from(code)?
        } else {
            ConnectReasonCode::from_v3_return_code(code)?
        };
        // MQTT-3.2.2-6: a refused connection never has a session
        if reason_code.is_error() && session_present {
            return Err(ProtocolError::violation(
                "CONNACK with an error reason code must not set Session Present",
            ));
        }

        let properties = if version.is_v5() && buf.remaining() > 0 {
            Properties::decode_in(buf, PropertyScope::Packet(PacketType::ConnAck))?
        } else {
            Properties::new()
        };

        Ok(Self {
            session_present,
            reason_code,
            properties,
        })
    }
}
