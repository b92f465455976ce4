//! tickmqtt-core - MQTT wire format.
//!
//! Byte buffer, wire primitives, MQTT v5 properties, reason codes and the
//! packet codec for MQTT 3.1.1 and 5.0. Nothing in this crate performs I/O.

pub mod buffer;
pub mod error;
pub mod frame;
pub mod packet;
pub mod property;
pub mod reason;
pub mod varint;
pub mod wire;

pub use buffer::ByteBuffer;
pub use error::{EncodeError, ProtocolError, Result};
pub use packet::*;
pub use property::{Properties, PropertyType};
pub use reason::*;
pub use wire::{BinaryData, Decode, Encode, Utf8String, Utf8StringPair};
