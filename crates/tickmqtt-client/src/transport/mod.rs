//! Byte transport consumed by the connection state machine.
//!
//! A transport owns the socket and does the framing: every
//! [`TransportEvent::Data`] carries exactly one MQTT packet. The state machine
//! polls for events once per tick instead of receiving callbacks.

mod tcp;

pub use tcp::TcpTransport;

use std::io;

use bytes::Bytes;
use tickmqtt_core::ProtocolError;

use crate::options::BrokerAddress;

/// Something the transport observed since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Outcome of a [`Transport::connect`] attempt.
    Connected(bool),
    /// One complete packet, fixed header included.
    Data(Bytes),
    /// The peer closed the connection.
    Disconnected,
    Error(String),
    /// The byte stream could not be framed.
    Malformed(ProtocolError),
}

pub trait Transport: Send {
    /// Start connecting. Returns false if the attempt could not even be
    /// started; otherwise the outcome arrives as [`TransportEvent::Connected`].
    fn connect(&mut self, address: &BrokerAddress) -> bool;

    /// Write as much of `bytes` as the socket accepts without blocking.
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Close the connection. Returns false if nothing was open.
    fn close(&mut self) -> bool;

    fn is_connected(&self) -> bool;

    /// Append pending events to `events`.
    fn poll_events(&mut self, events: &mut Vec<TransportEvent>);

    /// Largest packet the framer accepts, as advertised in CONNECT.
    fn set_maximum_packet_size(&mut self, _maximum: Option<u32>) {}
}
