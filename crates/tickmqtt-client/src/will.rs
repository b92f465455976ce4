//! Will message (Last Will and Testament) support.
//!
//! Implements requirements:
//! - [MQTT-3.1.2-8] If Will Flag is set, Will Message MUST be stored and published on abnormal disconnect
//! - [MQTT-3.1.2-9] Will Topic and Will Message fields MUST be present if Will Flag is set

use bytes::Bytes;
use tickmqtt_core::packet;
use tickmqtt_core::property::{Properties, PropertyType};
use tickmqtt_core::{BinaryData, QoS, Utf8String};

use crate::error::{ClientError, Result};

/// Last Will and Testament message.
///
/// The Will Message is published by the broker if the client disconnects
/// unexpectedly (without sending DISCONNECT), or when the client asks for it
/// with [`crate::DisconnectArgs::will_publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    /// Topic to publish the will message to.
    pub topic: String,
    /// Will message payload.
    pub payload: Bytes,
    /// QoS level for will message delivery.
    pub qos: QoS,
    /// Whether the will message should be retained.
    pub retain: bool,
    /// Seconds the broker waits before publishing (v5).
    pub delay_interval: Option<u32>,
    /// Lifetime of the published will message in seconds (v5).
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<String>,
    pub user_properties: Vec<(String, String)>,
}

impl Will {
    /// Create a new will message with QoS 0 and no retain.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            delay_interval: None,
            message_expiry_interval: None,
            content_type: None,
            user_properties: Vec::new(),
        }
    }

    /// Set the QoS level for the will message.
    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Set whether the will message should be retained.
    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn delay_interval(mut self, seconds: u32) -> Self {
        self.delay_interval = Some(seconds);
        self
    }

    pub fn message_expiry_interval(mut self, seconds: u32) -> Self {
        self.message_expiry_interval = Some(seconds);
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn user_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.push((key.into(), value.into()));
        self
    }

    /// Check the will is publishable and convert it to its wire form.
    pub(crate) fn to_packet_will(&self) -> Result<packet::Will> {
        if self.topic.is_empty() {
            return Err(ClientError::invalid("will topic is empty"));
        }
        if self.topic.contains(['+', '#']) {
            return Err(ClientError::invalid(format!(
                "will topic contains wildcard: {}",
                self.topic
            )));
        }

        let mut properties = Properties::new();
        if let Some(delay) = self.delay_interval {
            properties.try_add(PropertyType::WillDelayInterval, delay, true);
        }
        if let Some(expiry) = self.message_expiry_interval {
            properties.try_add(PropertyType::MessageExpiryInterval, expiry, true);
        }
        if let Some(content_type) = &self.content_type {
            properties.try_add(
                PropertyType::ContentType,
                Utf8String::new(content_type.as_str())?,
                true,
            );
        }
        for (key, value) in &self.user_properties {
            properties.add_user_property(key.as_str(), value.as_str())?;
        }

        Ok(packet::Will {
            topic: Utf8String::new(self.topic.as_str())
                .map_err(|_| ClientError::invalid("will topic longer than 65535 bytes"))?,
            payload: BinaryData::new(self.payload.clone())
                .map_err(|_| ClientError::invalid("will payload longer than 65535 bytes"))?,
            qos: self.qos,
            retain: self.retain,
            properties,
        })
    }
}
