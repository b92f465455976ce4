//! tickmqtt-client - Tick-driven MQTT client engine.
//!
//! The engine never blocks and owns no threads of its own: every call to
//! [`Client::tick`] polls the transport, flushes the send queue, processes
//! received packets, runs keep-alive and retries unacknowledged messages.
//! [`TickMode::Async`] moves that loop onto a background thread.
//!
//! # Example
//!
//! ```ignore
//! use tickmqtt_client::{BrokerAddress, Client, Config, ConnectArgs, Event, PublishOptions, QoS};
//!
//! let client = Client::tcp(Config::default())?;
//! client.connect(
//!     BrokerAddress::new("localhost", 1883),
//!     ConnectArgs::new("sensor-17").keep_alive(30),
//! )?;
//!
//! loop {
//!     client.tick()?;
//!     while let Some(event) = client.try_next_event() {
//!         match event {
//!             Event::Connect(details) if details.is_successful => {
//!                 client.subscribe(&[("cmd/sensor-17/#", QoS::AtLeastOnce)])?;
//!                 client.publish(
//!                     "sensors/17/temp",
//!                     "25.5",
//!                     &PublishOptions::default().qos(QoS::AtLeastOnce),
//!                 )?;
//!             }
//!             Event::Publish(publish) => println!("{}: {:?}", publish.topic, publish.payload),
//!             _ => {}
//!         }
//!     }
//! }
//! ```

mod client;
mod config;
mod connection;
mod error;
mod events;
mod options;
mod packet_id;
mod receive_maximum;
mod receive_queue;
mod send_queue;
mod session;
mod store;
pub mod transport;
mod will;

pub use client::Client;
pub use config::{Config, TickMode};
pub use error::{ClientError, ErrorCode, Result};
pub use events::{ConnectDetails, ConnectionState, Event, PublishCompleted};
pub use options::{
    BrokerAddress, ConnectArgs, DisconnectArgs, PublishOptions, SubscribeProperties, DEFAULT_PORT,
};
pub use packet_id::PacketIdPool;
pub use receive_maximum::ReceiveMaximumTracker;
pub use receive_queue::{ReceiveBatch, ReceiveQueue};
pub use send_queue::{BatchOutcome, SendContext, SendQueue};
pub use session::{MessageEntry, MessageStatus, SessionState};
pub use store::{MemorySessionStore, SessionStore, StoredMessage};
pub use transport::{TcpTransport, Transport, TransportEvent};
pub use will::Will;

// Re-export useful types from core
pub use tickmqtt_core::{
    Auth, ConnAck, ConnectReasonCode, Disconnect, DisconnectReasonCode, Packet, Properties,
    PropertyType, ProtocolError, ProtocolVersion, Publish, QoS, RetainHandling,
    SubscriptionOptions,
};
