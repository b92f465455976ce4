//! Client events and state types.

use tickmqtt_core::{
    Auth, ConnAck, ConnectReasonCode, Disconnect, DisconnectReasonCode, Packet, Publish, QoS,
    SubAck, UnsubAck,
};

use crate::error::ErrorCode;
use crate::options::BrokerAddress;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// CONNECT sent or about to be sent; waiting for CONNACK.
    Connecting,
    Connected,
    /// Re-establishing a previously connected session (redirect or
    /// additional address).
    Reconnecting,
}

/// Outcome of a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectDetails {
    pub is_successful: bool,
    /// `None` if the attempt failed before any CONNACK arrived.
    pub reason_code: Option<ConnectReasonCode>,
    pub session_present: bool,
    pub address: BrokerAddress,
    pub ack: Option<ConnAck>,
}

/// Outcome of a QoS 1/2 publish exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCompleted {
    pub packet_id: u16,
    pub qos: QoS,
    /// False if the broker answered with a failure reason code.
    pub is_successful: bool,
    /// The PUBACK, PUBREC (on failure) or PUBCOMP that ended the exchange.
    pub packet: Packet,
}

/// Events returned by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// First connection attempt finished, successfully or not.
    Connect(ConnectDetails),
    /// A redirected or failed-over connection attempt finished.
    Reconnect(ConnectDetails),
    /// Connection closed.
    Disconnect {
        /// The broker sent DISCONNECT or closed the socket.
        is_broker_induced: bool,
        reason_code: Option<DisconnectReasonCode>,
        packet: Option<Disconnect>,
    },
    /// Received a publish message.
    Publish(Publish),
    PublishCompleted(PublishCompleted),
    SubscribeAck(SubAck),
    UnsubscribeAck(UnsubAck),
    /// AUTH received during enhanced authentication.
    Auth(Auth),
    Error { code: ErrorCode, message: String },
}
