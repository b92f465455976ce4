//! Error types for the wire codec.

use thiserror::Error;

use crate::reason::DisconnectReasonCode;

/// Errors raised while decoding bytes received from the peer.
///
/// Every variant maps onto the DISCONNECT reason code the client must send
/// when it abandons the connection because of it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Invalid variable byte integer encoding")]
    InvalidVariableByteInteger,

    #[error("Incomplete packet: need {needed} bytes, have {have}")]
    IncompletePacket { needed: usize, have: usize },

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Protocol error: {0}")]
    Violation(String),

    #[error("Packet too large: {size} bytes, maximum is {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Receive maximum exceeded by PUBLISH with packet id {packet_id}")]
    ReceiveMaximumExceeded { packet_id: u16 },

    #[error("Invalid topic alias: {0}")]
    TopicAliasInvalid(u16),
}

impl ProtocolError {
    /// Reason code carried by the DISCONNECT sent because of this error.
    pub fn reason_code(&self) -> DisconnectReasonCode {
        match self {
            ProtocolError::InvalidPacketType(_) | ProtocolError::Violation(_) => {
                DisconnectReasonCode::ProtocolError
            }
            ProtocolError::InvalidVariableByteInteger
            | ProtocolError::IncompletePacket { .. }
            | ProtocolError::InvalidUtf8
            | ProtocolError::MalformedPacket(_) => DisconnectReasonCode::MalformedPacket,
            ProtocolError::PacketTooLarge { .. } => DisconnectReasonCode::PacketTooLarge,
            ProtocolError::ReceiveMaximumExceeded { .. } => {
                DisconnectReasonCode::ReceiveMaximumExceeded
            }
            ProtocolError::TopicAliasInvalid(_) => DisconnectReasonCode::TopicAliasInvalid,
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ProtocolError::MalformedPacket(msg.into())
    }

    pub(crate) fn violation(msg: impl Into<String>) -> Self {
        ProtocolError::Violation(msg.into())
    }
}

/// Errors raised while composing bytes to send.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("String too long: {0} bytes, maximum is 65535")]
    StringTooLong(usize),

    #[error("Binary data too long: {0} bytes, maximum is 65535")]
    BinaryTooLong(usize),

    #[error("Value {0} does not fit a variable byte integer")]
    VariableByteIntegerTooLarge(u64),

    #[error("Buffer full: need {needed} bytes, {available} available")]
    BufferFull { needed: usize, available: usize },

    #[error("Packet too large: {size} bytes, maximum is {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("{0} packets do not exist in MQTT 3.1.1")]
    NotInProtocolVersion(&'static str),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
