//! MQTT v5 reason codes, one enum per packet family.
//!
//! Several codes share a numeric value across families (0x9C/0x9D appear both
//! in CONNACK and DISCONNECT). Code that needs to correlate families goes
//! through [`Redirection`] instead of comparing raw numbers.

use crate::error::ProtocolError;

macro_rules! reason_codes {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident = $value:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value,)+
        }

        impl $name {
            /// Codes at or above 0x80 report a failure.
            pub fn is_error(self) -> bool {
                (self as u8) >= 0x80
            }
        }

        impl TryFrom<u8> for $name {
            type Error = ProtocolError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    _ => Err(ProtocolError::malformed(format!(
                        "Invalid {} reason code: {:#04x}",
                        stringify!($name),
                        value
                    ))),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(code: $name) -> u8 {
                code as u8
            }
        }
    };
}

reason_codes! {
    /// CONNACK reason codes.
    ConnectReasonCode {
        Success = 0x00,
        UnspecifiedError = 0x80,
        MalformedPacket = 0x81,
        ProtocolError = 0x82,
        ImplementationSpecificError = 0x83,
        UnsupportedProtocolVersion = 0x84,
        ClientIdentifierNotValid = 0x85,
        BadUserNameOrPassword = 0x86,
        NotAuthorized = 0x87,
        ServerUnavailable = 0x88,
        ServerBusy = 0x89,
        Banned = 0x8A,
        BadAuthenticationMethod = 0x8C,
        TopicNameInvalid = 0x90,
        PacketTooLarge = 0x95,
        QuotaExceeded = 0x97,
        PayloadFormatInvalid = 0x99,
        RetainNotSupported = 0x9A,
        QosNotSupported = 0x9B,
        UseAnotherServer = 0x9C,
        ServerMoved = 0x9D,
        ConnectionRateExceeded = 0x9F,
    }
}

reason_codes! {
    /// DISCONNECT reason codes.
    DisconnectReasonCode {
        NormalDisconnection = 0x00,
        DisconnectWithWillMessage = 0x04,
        UnspecifiedError = 0x80,
        MalformedPacket = 0x81,
        ProtocolError = 0x82,
        ImplementationSpecificError = 0x83,
        NotAuthorized = 0x87,
        ServerBusy = 0x89,
        ServerShuttingDown = 0x8B,
        KeepAliveTimeout = 0x8D,
        SessionTakenOver = 0x8E,
        TopicFilterInvalid = 0x8F,
        TopicNameInvalid = 0x90,
        ReceiveMaximumExceeded = 0x93,
        TopicAliasInvalid = 0x94,
        PacketTooLarge = 0x95,
        MessageRateTooHigh = 0x96,
        QuotaExceeded = 0x97,
        AdministrativeAction = 0x98,
        PayloadFormatInvalid = 0x99,
        RetainNotSupported = 0x9A,
        QosNotSupported = 0x9B,
        UseAnotherServer = 0x9C,
        ServerMoved = 0x9D,
        SharedSubscriptionsNotSupported = 0x9E,
        ConnectionRateExceeded = 0x9F,
        MaximumConnectTime = 0xA0,
        SubscriptionIdentifiersNotSupported = 0xA1,
        WildcardSubscriptionsNotSupported = 0xA2,
    }
}

reason_codes! {
    /// PUBACK and PUBREC reason codes.
    PubAckReasonCode {
        Success = 0x00,
        NoMatchingSubscribers = 0x10,
        UnspecifiedError = 0x80,
        ImplementationSpecificError = 0x83,
        NotAuthorized = 0x87,
        TopicNameInvalid = 0x90,
        PacketIdentifierInUse = 0x91,
        QuotaExceeded = 0x97,
        PayloadFormatInvalid = 0x99,
    }
}

reason_codes! {
    /// PUBREL and PUBCOMP reason codes.
    PubRelReasonCode {
        Success = 0x00,
        PacketIdentifierNotFound = 0x92,
    }
}

reason_codes! {
    /// SUBACK reason codes. In MQTT 3.1.1 only the granted QoS values and
    /// 0x80 (failure) occur.
    SubAckReasonCode {
        GrantedQos0 = 0x00,
        GrantedQos1 = 0x01,
        GrantedQos2 = 0x02,
        UnspecifiedError = 0x80,
        ImplementationSpecificError = 0x83,
        NotAuthorized = 0x87,
        TopicFilterInvalid = 0x8F,
        PacketIdentifierInUse = 0x91,
        QuotaExceeded = 0x97,
        SharedSubscriptionsNotSupported = 0x9E,
        SubscriptionIdentifiersNotSupported = 0xA1,
        WildcardSubscriptionsNotSupported = 0xA2,
    }
}

reason_codes! {
    /// UNSUBACK reason codes.
    UnsubAckReasonCode {
        Success = 0x00,
        NoSubscriptionExisted = 0x11,
        UnspecifiedError = 0x80,
        ImplementationSpecificError = 0x83,
        NotAuthorized = 0x87,
        TopicFilterInvalid = 0x8F,
        PacketIdentifierInUse = 0x91,
    }
}

reason_codes! {
    /// AUTH reason codes.
    AuthReasonCode {
        Success = 0x00,
        ContinueAuthentication = 0x18,
        ReAuthenticate = 0x19,
    }
}

/// Broker instruction to continue the session elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirection {
    /// Temporary: try the referenced server.
    UseAnotherServer,
    /// Permanent: the referenced server replaces this one.
    ServerMoved,
}

impl ConnectReasonCode {
    pub fn redirection(self) -> Option<Redirection> {
        match self {
            ConnectReasonCode::UseAnotherServer => Some(Redirection::UseAnotherServer),
            ConnectReasonCode::ServerMoved => Some(Redirection::ServerMoved),
            _ => None,
        }
    }

    /// Map an MQTT 3.1.1 CONNACK return code onto its v5 equivalent.
    pub fn from_v3_return_code(code: u8) -> Result<Self, ProtocolError> {
        match code {
            0 => Ok(ConnectReasonCode::Success),
            1 => Ok(ConnectReasonCode::UnsupportedProtocolVersion),
            2 => Ok(ConnectReasonCode::ClientIdentifierNotValid),
            3 => Ok(ConnectReasonCode::ServerUnavailable),
            4 => Ok(ConnectReasonCode::BadUserNameOrPassword),
            5 => Ok(ConnectReasonCode::NotAuthorized),
            _ => Err(ProtocolError::malformed(format!(
                "Invalid CONNACK return code: {}",
                code
            ))),
        }
    }

    /// Closest MQTT 3.1.1 return code.
    pub fn to_v3_return_code(self) -> u8 {
        match self {
            ConnectReasonCode::Success => 0,
            ConnectReasonCode::UnsupportedProtocolVersion => 1,
            ConnectReasonCode::ClientIdentifierNotValid => 2,
            ConnectReasonCode::BadUserNameOrPassword => 4,
            ConnectReasonCode::NotAuthorized | ConnectReasonCode::Banned => 5,
            _ => 3,
        }
    }
}

impl DisconnectReasonCode {
    pub fn redirection(self) -> Option<Redirection> {
        match self {
            DisconnectReasonCode::UseAnotherServer => Some(Redirection::UseAnotherServer),
            DisconnectReasonCode::ServerMoved => Some(Redirection::ServerMoved),
            _ => None,
        }
    }
}

impl SubAckReasonCode {
    pub fn granted(qos: crate::packet::QoS) -> Self {
        match qos {
            crate::packet::QoS::AtMostOnce => SubAckReasonCode::GrantedQos0,
            crate::packet::QoS::AtLeastOnce => SubAckReasonCode::GrantedQos1,
            crate::packet::QoS::ExactlyOnce => SubAckReasonCode::GrantedQos2,
        }
    }
}
