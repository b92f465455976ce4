//! Arguments for connect, publish and disconnect.

use std::fmt;

use bytes::Bytes;
use tickmqtt_core::property::{Properties, PropertyType};
use tickmqtt_core::varint::VariableByteInteger;
use tickmqtt_core::{BinaryData, Connect, ProtocolVersion, QoS, Utf8String};

use crate::error::{ClientError, Result};
use crate::will::Will;

pub const DEFAULT_PORT: u16 = 1883;

/// Broker host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host` or `host:port`. Bracketed IPv6 literals are accepted.
    pub fn parse(s: &str, default_port: u16) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']')?;
            let port = match tail.strip_prefix(':') {
                Some(port) => port.parse().ok()?,
                None if tail.is_empty() => default_port,
                None => return None,
            };
            return Some(Self::new(host, port));
        }
        match s.rsplit_once(':') {
            // A bare IPv6 literal has several colons and no port
            Some((host, _)) if host.contains(':') => Some(Self::new(s, default_port)),
            Some((host, port)) if !host.is_empty() => Some(Self::new(host, port.parse().ok()?)),
            Some(_) => None,
            None => Some(Self::new(s, default_port)),
        }
    }

    /// Parse a SERVER_REFERENCE property value. Several references may be
    /// separated by spaces; the first usable one wins.
    pub fn parse_reference(reference: &str, default_port: u16) -> Option<Self> {
        reference
            .split_whitespace()
            .find_map(|candidate| Self::parse(candidate, default_port))
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectArgs {
    pub version: ProtocolVersion,
    pub client_id: String,
    pub clean_start: bool,
    /// Keep-alive interval in seconds (0 = disabled).
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub will: Option<Will>,
    pub session_expiry_interval: Option<u32>,
    /// In-flight QoS 1/2 publishes this client accepts (v5 default 65535).
    pub receive_maximum: Option<u16>,
    pub maximum_packet_size: Option<u32>,
    /// Inbound topic aliases this client accepts (0 = none).
    pub topic_alias_maximum: Option<u16>,
    pub authentication_method: Option<String>,
    pub authentication_data: Option<Bytes>,
    pub user_properties: Vec<(String, String)>,
    /// Tried in order when the primary address fails.
    pub additional_addresses: Vec<BrokerAddress>,
}

impl Default for ConnectArgs {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::V5,
            client_id: String::new(),
            clean_start: true,
            keep_alive: 60,
            username: None,
            password: None,
            will: None,
            session_expiry_interval: None,
            receive_maximum: None,
            maximum_packet_size: None,
            topic_alias_maximum: None,
            authentication_method: None,
            authentication_data: None,
            user_properties: Vec::new(),
            additional_addresses: Vec::new(),
        }
    }
}

impl ConnectArgs {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    /// Use MQTT 3.1.1 instead of 5.0.
    pub fn mqtt311(mut self) -> Self {
        self.version = ProtocolVersion::V311;
        self
    }

    pub fn clean_start(mut self, clean: bool) -> Self {
        self.clean_start = clean;
        self
    }

    /// Set keep-alive interval in seconds.
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set username and password.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<Bytes>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    pub fn session_expiry_interval(mut self, seconds: u32) -> Self {
        self.session_expiry_interval = Some(seconds);
        self
    }

    pub fn receive_maximum(mut self, maximum: u16) -> Self {
        self.receive_maximum = Some(maximum);
        self
    }

    pub fn maximum_packet_size(mut self, bytes: u32) -> Self {
        self.maximum_packet_size = Some(bytes);
        self
    }

    pub fn topic_alias_maximum(mut self, maximum: u16) -> Self {
        self.topic_alias_maximum = Some(maximum);
        self
    }

    pub fn authentication(mut self, method: impl Into<String>, data: Option<Bytes>) -> Self {
        self.authentication_method = Some(method.into());
        self.authentication_data = data;
        self
    }

    pub fn user_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.push((key.into(), value.into()));
        self
    }

    pub fn additional_address(mut self, address: BrokerAddress) -> Self {
        self.additional_addresses.push(address);
        self
    }

    /// Receive Maximum this client advertises.
    pub(crate) fn effective_receive_maximum(&self) -> u16 {
        match self.version {
            ProtocolVersion::V5 => self.receive_maximum.unwrap_or(u16::MAX),
            ProtocolVersion::V311 => u16::MAX,
        }
    }

    pub(crate) fn effective_topic_alias_maximum(&self) -> u16 {
        match self.version {
            ProtocolVersion::V5 => self.topic_alias_maximum.unwrap_or(0),
            ProtocolVersion::V311 => 0,
        }
    }

    /// Reject arguments that could never produce a valid CONNECT.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(ClientError::missing("client id"));
        }
        if self.receive_maximum == Some(0) {
            return Err(ClientError::invalid("receive maximum must be positive"));
        }
        if self.maximum_packet_size == Some(0) {
            return Err(ClientError::invalid("maximum packet size must be positive"));
        }
        // MQTT-3.1.2-22: v3.1.1 forbids a password without a user name
        if self.version == ProtocolVersion::V311
            && self.password.is_some()
            && self.username.is_none()
        {
            return Err(ClientError::invalid("password given without user name"));
        }
        if self.authentication_data.is_some() && self.authentication_method.is_none() {
            return Err(ClientError::invalid(
                "authentication data given without authentication method",
            ));
        }
        if let Some(will) = &self.will {
            will.to_packet_will()?;
        }
        Ok(())
    }

    /// Build the CONNECT packet for `client_id`, which may differ from
    /// `self.client_id` once the broker has assigned one.
    pub(crate) fn to_connect(&self, client_id: &str) -> Result<Connect> {
        let mut connect = Connect::new(
            self.version,
            Utf8String::new(client_id)
                .map_err(|_| ClientError::invalid("client id longer than 65535 bytes"))?,
        );
        connect.clean_start = self.clean_start;
        connect.keep_alive = self.keep_alive;
        connect.will = self.will.as_ref().map(Will::to_packet_will).transpose()?;
        connect.username = self.username.as_deref().map(Utf8String::new).transpose()?;
        connect.password = self.password.clone().map(BinaryData::new).transpose()?;

        let props = &mut connect.properties;
        if let Some(expiry) = self.session_expiry_interval {
            props.try_add(PropertyType::SessionExpiryInterval, expiry, true);
        }
        if let Some(max) = self.receive_maximum {
            props.try_add(PropertyType::ReceiveMaximum, max, true);
        }
        if let Some(max) = self.maximum_packet_size {
            props.try_add(PropertyType::MaximumPacketSize, max, true);
        }
        if let Some(max) = self.topic_alias_maximum {
            props.try_add(PropertyType::TopicAliasMaximum, max, max > 0);
        }
        if let Some(method) = &self.authentication_method {
            props.try_add(
                PropertyType::AuthenticationMethod,
                Utf8String::new(method.as_str())?,
                true,
            );
        }
        if let Some(data) = &self.authentication_data {
            props.try_add(
                PropertyType::AuthenticationData,
                BinaryData::new(data.clone())?,
                true,
            );
        }
        for (key, value) in &self.user_properties {
            props.add_user_property(key.as_str(), value.as_str())?;
        }

        Ok(connect)
    }
}

/// Per-publish options. Properties are ignored for MQTT 3.1.1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub qos: QoS,
    pub retain: bool,
    pub properties: Properties,
}

impl PublishOptions {
    pub fn new(qos: QoS) -> Self {
        Self {
            qos,
            ..Self::default()
        }
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn message_expiry_interval(mut self, seconds: u32) -> Self {
        self.properties
            .try_add(PropertyType::MessageExpiryInterval, seconds, true);
        self
    }

    pub fn topic_alias(mut self, alias: u16) -> Self {
        self.properties.try_add(PropertyType::TopicAlias, alias, true);
        self
    }

    pub fn payload_format_utf8(mut self) -> Self {
        self.properties
            .try_add(PropertyType::PayloadFormatIndicator, 1u8, true);
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Result<Self> {
        self.properties
            .try_add(PropertyType::ContentType, Utf8String::new(content_type)?, true);
        Ok(self)
    }

    pub fn response_topic(mut self, topic: &str) -> Result<Self> {
        self.properties
            .try_add(PropertyType::ResponseTopic, Utf8String::new(topic)?, true);
        Ok(self)
    }

    pub fn correlation_data(mut self, data: impl Into<Bytes>) -> Result<Self> {
        self.properties
            .try_add(PropertyType::CorrelationData, BinaryData::new(data)?, true);
        Ok(self)
    }

    pub fn user_property(mut self, key: &str, value: &str) -> Result<Self> {
        self.properties.add_user_property(key, value)?;
        Ok(self)
    }
}

/// Per-subscribe options beyond the topic filters themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeProperties {
    pub subscription_identifier: Option<u32>,
    pub user_properties: Vec<(String, String)>,
}

impl SubscribeProperties {
    pub(crate) fn to_properties(&self) -> Result<Properties> {
        let mut props = Properties::new();
        if let Some(id) = self.subscription_identifier {
            if id == 0 {
                return Err(ClientError::invalid("subscription identifier must be positive"));
            }
            props.try_add(
                PropertyType::SubscriptionIdentifier,
                VariableByteInteger::new(id)?,
                true,
            );
        }
        for (key, value) in &self.user_properties {
            props.add_user_property(key.as_str(), value.as_str())?;
        }
        Ok(props)
    }
}

/// Disconnect parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectArgs {
    /// Ask the broker to publish the will (DisconnectWithWillMessage).
    pub will_publish: bool,
    /// Drop queued but unsent packets instead of leaving them for a later
    /// connection.
    pub clear_queue: bool,
    pub session_expiry_interval: Option<u32>,
    pub reason_string: Option<String>,
}

impl DisconnectArgs {
    pub fn will_publish(mut self, publish: bool) -> Self {
        self.will_publish = publish;
        self
    }

    pub fn clear_queue(mut self, clear: bool) -> Self {
        self.clear_queue = clear;
        self
    }
}
