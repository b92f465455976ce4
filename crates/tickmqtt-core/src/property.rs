//! MQTT v5 properties.
//!
//! A [`Properties`] bag is an insertion-ordered multi-map from
//! [`PropertyType`] to a typed [`PropertyValue`]. The per-type rules (wire
//! data type, whether repeats are allowed, which packets may carry it) are
//! fixed by the protocol and live in [`PropertyType::traits`] and
//! [`PropertyType::allowed_in`].

use bytes::Bytes;

use crate::buffer::ByteBuffer;
use crate::error::{EncodeError, ProtocolError, Result};
use crate::packet::PacketType;
use crate::varint::VariableByteInteger;
use crate::wire::{BinaryData, Decode, Encode, Utf8String, Utf8StringPair};

/// Property identifiers. All defined identifiers fit in a single byte, which
/// is how they are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropertyType {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0B,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1A,
    ServerReference = 0x1C,
    ReasonString = 0x1F,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQos = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2A,
}

// Identifiers are written as one byte; a two-byte identifier would need the
// variable byte integer form instead.
const _: () = assert!((PropertyType::SharedSubscriptionAvailable as u8) < 0x80);

impl TryFrom<u8> for PropertyType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        use PropertyType::*;
        Ok(match value {
            0x01 => PayloadFormatIndicator,
            0x02 => MessageExpiryInterval,
            0x03 => ContentType,
            0x08 => ResponseTopic,
            0x09 => CorrelationData,
            0x0B => SubscriptionIdentifier,
            0x11 => SessionExpiryInterval,
            0x12 => AssignedClientIdentifier,
            0x13 => ServerKeepAlive,
            0x15 => AuthenticationMethod,
            0x16 => AuthenticationData,
            0x17 => RequestProblemInformation,
            0x18 => WillDelayInterval,
            0x19 => RequestResponseInformation,
            0x1A => ResponseInformation,
            0x1C => ServerReference,
            0x1F => ReasonString,
            0x21 => ReceiveMaximum,
            0x22 => TopicAliasMaximum,
            0x23 => TopicAlias,
            0x24 => MaximumQos,
            0x25 => RetainAvailable,
            0x26 => UserProperty,
            0x27 => MaximumPacketSize,
            0x28 => WildcardSubscriptionAvailable,
            0x29 => SubscriptionIdentifierAvailable,
            0x2A => SharedSubscriptionAvailable,
            _ => {
                return Err(ProtocolError::malformed(format!(
                    "Unknown property identifier: {:#04x}",
                    value
                )))
            }
        })
    }
}

/// Wire representation of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyDataType {
    Byte,
    TwoByteInteger,
    FourByteInteger,
    VariableByteInteger,
    Utf8String,
    Utf8StringPair,
    BinaryData,
}

/// Static rules for one property type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyTraits {
    pub data_type: PropertyDataType,
    pub allow_duplicates: bool,
}

/// Where a property bag sits: in a packet's variable header, or in the will
/// section of CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyScope {
    Packet(PacketType),
    Will,
}

impl PropertyType {
    pub const fn traits(self) -> PropertyTraits {
        use PropertyDataType as D;
        use PropertyType::*;
        let data_type = match self {
            PayloadFormatIndicator
            | RequestProblemInformation
            | RequestResponseInformation
            | MaximumQos
            | RetainAvailable
            | WildcardSubscriptionAvailable
            | SubscriptionIdentifierAvailable
            | SharedSubscriptionAvailable => D::Byte,
            ServerKeepAlive | ReceiveMaximum | TopicAliasMaximum | TopicAlias => {
                D::TwoByteInteger
            }
            MessageExpiryInterval
            | SessionExpiryInterval
            | WillDelayInterval
            | MaximumPacketSize => D::FourByteInteger,
            SubscriptionIdentifier => D::VariableByteInteger,
            ContentType
            | ResponseTopic
            | AssignedClientIdentifier
            | AuthenticationMethod
            | ResponseInformation
            | ServerReference
            | ReasonString => D::Utf8String,
            UserProperty => D::Utf8StringPair,
            CorrelationData | AuthenticationData => D::BinaryData,
        };
        // A PUBLISH matching several subscriptions carries one identifier each
        let allow_duplicates = matches!(self, UserProperty | SubscriptionIdentifier);
        PropertyTraits {
            data_type,
            allow_duplicates,
        }
    }

    /// Whether MQTT 5 permits this property in the given scope.
    pub fn allowed_in(self, scope: PropertyScope) -> bool {
        use PacketType as P;
        use PropertyType::*;
        let packet = match scope {
            PropertyScope::Will => {
                return matches!(
                    self,
                    PayloadFormatIndicator
                        | MessageExpiryInterval
                        | ContentType
                        | ResponseTopic
                        | CorrelationData
                        | WillDelayInterval
                        | UserProperty
                )
            }
            PropertyScope::Packet(packet) => packet,
        };
        match self {
            UserProperty => true,
            PayloadFormatIndicator | MessageExpiryInterval | ContentType | ResponseTopic
            | CorrelationData | TopicAlias => packet == P::Publish,
            SubscriptionIdentifier => matches!(packet, P::Publish | P::Subscribe),
            SessionExpiryInterval => matches!(packet, P::Connect | P::ConnAck | P::Disconnect),
            AssignedClientIdentifier
            | ServerKeepAlive
            | ResponseInformation
            | MaximumQos
            | RetainAvailable
            | WildcardSubscriptionAvailable
            | SubscriptionIdentifierAvailable
            | SharedSubscriptionAvailable => packet == P::ConnAck,
            AuthenticationMethod | AuthenticationData => {
                matches!(packet, P::Connect | P::ConnAck | P::Auth)
            }
            RequestProblemInformation | RequestResponseInformation => packet == P::Connect,
            WillDelayInterval => false,
            ServerReference => matches!(packet, P::ConnAck | P::Disconnect),
            ReasonString => !matches!(
                packet,
                P::Connect | P::Publish | P::Subscribe | P::Unsubscribe | P::PingReq | P::PingResp
            ),
            ReceiveMaximum | TopicAliasMaximum | MaximumPacketSize => {
                matches!(packet, P::Connect | P::ConnAck)
            }
        }
    }
}

/// A decoded property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Byte(u8),
    TwoByteInteger(u16),
    FourByteInteger(u32),
    VariableByteInteger(VariableByteInteger),
    Utf8String(Utf8String),
    Utf8StringPair(Utf8StringPair),
    BinaryData(BinaryData),
}

impl PropertyValue {
    pub fn data_type(&self) -> PropertyDataType {
        match self {
            PropertyValue::Byte(_) => PropertyDataType::Byte,
            PropertyValue::TwoByteInteger(_) => PropertyDataType::TwoByteInteger,
            PropertyValue::FourByteInteger(_) => PropertyDataType::FourByteInteger,
            PropertyValue::VariableByteInteger(_) => PropertyDataType::VariableByteInteger,
            PropertyValue::Utf8String(_) => PropertyDataType::Utf8String,
            PropertyValue::Utf8StringPair(_) => PropertyDataType::Utf8StringPair,
            PropertyValue::BinaryData(_) => PropertyDataType::BinaryData,
        }
    }

    fn encoding_size(&self) -> usize {
        match self {
            PropertyValue::Byte(_) => 1,
            PropertyValue::TwoByteInteger(_) => 2,
            PropertyValue::FourByteInteger(_) => 4,
            PropertyValue::VariableByteInteger(v) => v.encoding_size(),
            PropertyValue::Utf8String(v) => v.encoding_size(),
            PropertyValue::Utf8StringPair(v) => v.encoding_size(),
            PropertyValue::BinaryData(v) => v.encoding_size(),
        }
    }

    fn encode(&self, buf: &mut ByteBuffer) -> std::result::Result<(), EncodeError> {
        match self {
            PropertyValue::Byte(v) => buf.put_u8(*v),
            PropertyValue::TwoByteInteger(v) => buf.put_u16(*v),
            PropertyValue::FourByteInteger(v) => buf.put_u32(*v),
            PropertyValue::VariableByteInteger(v) => v.encode(buf),
            PropertyValue::Utf8String(v) => v.encode(buf),
            PropertyValue::Utf8StringPair(v) => v.encode(buf),
            PropertyValue::BinaryData(v) => v.encode(buf),
        }
    }

    fn decode(data_type: PropertyDataType, buf: &mut ByteBuffer) -> Result<Self> {
        Ok(match data_type {
            PropertyDataType::Byte => PropertyValue::Byte(buf.read_u8()?),
            PropertyDataType::TwoByteInteger => PropertyValue::TwoByteInteger(buf.read_u16()?),
            PropertyDataType::FourByteInteger => PropertyValue::FourByteInteger(buf.read_u32()?),
            PropertyDataType::VariableByteInteger => {
                PropertyValue::VariableByteInteger(VariableByteInteger::decode(buf)?)
            }
            PropertyDataType::Utf8String => PropertyValue::Utf8String(Utf8String::decode(buf)?),
            PropertyDataType::Utf8StringPair => {
                PropertyValue::Utf8StringPair(Utf8StringPair::decode(buf)?)
            }
            PropertyDataType::BinaryData => PropertyValue::BinaryData(BinaryData::decode(buf)?),
        })
    }
}

impl From<u8> for PropertyValue {
    fn from(v: u8) -> Self {
        PropertyValue::Byte(v)
    }
}

impl From<u16> for PropertyValue {
    fn from(v: u16) -> Self {
        PropertyValue::TwoByteInteger(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::FourByteInteger(v)
    }
}

impl From<VariableByteInteger> for PropertyValue {
    fn from(v: VariableByteInteger) -> Self {
        PropertyValue::VariableByteInteger(v)
    }
}

impl From<Utf8String> for PropertyValue {
    fn from(v: Utf8String) -> Self {
        PropertyValue::Utf8String(v)
    }
}

impl From<Utf8StringPair> for PropertyValue {
    fn from(v: Utf8StringPair) -> Self {
        PropertyValue::Utf8StringPair(v)
    }
}

impl From<BinaryData> for PropertyValue {
    fn from(v: BinaryData) -> Self {
        PropertyValue::BinaryData(v)
    }
}

/// One entry of a property bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub property_type: PropertyType,
    pub value: PropertyValue,
}

/// Insertion-ordered property bag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<Property>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.entries.iter()
    }

    pub fn contains(&self, property_type: PropertyType) -> bool {
        self.entries.iter().any(|p| p.property_type == property_type)
    }

    /// Insert `value` when `condition` holds.
    ///
    /// Returns false without inserting if the condition is false, the value
    /// has the wrong data type for `property_type`, or the type does not
    /// allow duplicates and is already present.
    pub fn try_add(
        &mut self,
        property_type: PropertyType,
        value: impl Into<PropertyValue>,
        condition: bool,
    ) -> bool {
        if !condition {
            return false;
        }
        let value = value.into();
        let traits = property_type.traits();
        if value.data_type() != traits.data_type {
            return false;
        }
        if !traits.allow_duplicates && self.contains(property_type) {
            return false;
        }
        self.entries.push(Property {
            property_type,
            value,
        });
        true
    }

    /// Add a user property, failing only if either string is too long.
    pub fn add_user_property(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> std::result::Result<(), EncodeError> {
        let pair = Utf8StringPair::new(key, value)?;
        self.try_add(PropertyType::UserProperty, pair, true);
        Ok(())
    }

    /// First value stored under `property_type`.
    pub fn get(&self, property_type: PropertyType) -> Option<&PropertyValue> {
        self.entries
            .iter()
            .find(|p| p.property_type == property_type)
            .map(|p| &p.value)
    }

    /// Every value stored under `property_type`, in insertion order.
    pub fn get_all(&self, property_type: PropertyType) -> impl Iterator<Item = &PropertyValue> {
        self.entries
            .iter()
            .filter(move |p| p.property_type == property_type)
            .map(|p| &p.value)
    }

    pub fn get_u8(&self, property_type: PropertyType) -> Option<u8> {
        match self.get(property_type)? {
            PropertyValue::Byte(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u16(&self, property_type: PropertyType) -> Option<u16> {
        match self.get(property_type)? {
            PropertyValue::TwoByteInteger(v) => Some(*v),
            _ => None,
        }
    }

    /// Four-byte and variable-byte integers both read as `u32`.
    pub fn get_u32(&self, property_type: PropertyType) -> Option<u32> {
        match self.get(property_type)? {
            PropertyValue::FourByteInteger(v) => Some(*v),
            PropertyValue::VariableByteInteger(v) => Some(v.value()),
            _ => None,
        }
    }

    pub fn get_str(&self, property_type: PropertyType) -> Option<&str> {
        match self.get(property_type)? {
            PropertyValue::Utf8String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_binary(&self, property_type: PropertyType) -> Option<Bytes> {
        match self.get(property_type)? {
            PropertyValue::BinaryData(v) => Some(v.clone().into_bytes()),
            _ => None,
        }
    }

    pub fn user_properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.get_all(PropertyType::UserProperty)
            .filter_map(|v| match v {
                PropertyValue::Utf8StringPair(pair) => {
                    Some((pair.key.as_str(), pair.value.as_str()))
                }
                _ => None,
            })
    }

    /// Remove every value stored under `property_type`.
    pub fn remove(&mut self, property_type: PropertyType) {
        self.entries.retain(|p| p.property_type != property_type);
    }

    /// Sum of the encoded properties, excluding the length prefix.
    pub fn properties_length(&self) -> usize {
        self.entries
            .iter()
            .map(|p| 1 + p.value.encoding_size())
            .sum()
    }

    /// Decode a bag and check each property is permitted in `scope`.
    pub fn decode_in(buf: &mut ByteBuffer, scope: PropertyScope) -> Result<Self> {
        let props = Self::decode(buf)?;
        if let Some(p) = props
            .entries
            .iter()
            .find(|p| !p.property_type.allowed_in(scope))
        {
            return Err(ProtocolError::violation(format!(
                "Property {:?} is not allowed in {:?}",
                p.property_type, scope
            )));
        }
        Ok(props)
    }
}

impl Encode for Properties {
    fn encoding_size(&self) -> usize {
        let len = self.properties_length();
        crate::varint::encoded_len(len as u32) + len
    }

    fn encode(&self, buf: &mut ByteBuffer) -> std::result::Result<(), EncodeError> {
        VariableByteInteger::from_len(self.properties_length())?.encode(buf)?;
        for p in &self.entries {
            buf.put_u8(p.property_type as u8)?;
            p.value.encode(buf)?;
        }
        Ok(())
    }
}

impl Decode for Properties {
    fn decode(buf: &mut ByteBuffer) -> Result<Self> {
        let declared = VariableByteInteger::decode(buf)?.value() as usize;
        if declared > buf.remaining() {
            return Err(ProtocolError::malformed(format!(
                "Property length {} exceeds the {} bytes left in the packet",
                declared,
                buf.remaining()
            )));
        }
        let end = buf.read_cursor() + declared;
        let mut props = Properties::new();

        while buf.read_cursor() < end {
            let property_type = PropertyType::try_from(buf.read_u8()?)?;
            let traits = property_type.traits();
            let value = PropertyValue::decode(traits.data_type, buf)?;
            if buf.read_cursor() > end {
                return Err(ProtocolError::malformed(format!(
                    "Property {:?} overruns the declared property length",
                    property_type
                )));
            }
            if let PropertyValue::VariableByteInteger(id) = &value {
                if property_type == PropertyType::SubscriptionIdentifier && id.value() == 0 {
                    return Err(ProtocolError::violation("Subscription identifier of 0"));
                }
            }
            if !traits.allow_duplicates && props.contains(property_type) {
                return Err(ProtocolError::violation(format!(
                    "Duplicate property {:?}",
                    property_type
                )));
            }
            props.entries.push(Property {
                property_type,
                value,
            });
        }

        Ok(props)
    }
}
