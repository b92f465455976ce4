//! Incoming packet queue.
//!
//! Holds framed packets handed over by the transport until the next tick
//! decodes them. Flow-control bookkeeping happens here, before the state
//! machine sees the packet.

use std::collections::VecDeque;

use bytes::Bytes;
use tickmqtt_core::property::PropertyType;
use tickmqtt_core::{Packet, ProtocolError, ProtocolVersion, QoS};

use crate::receive_maximum::ReceiveMaximumTracker;

/// Result of [`ReceiveQueue::receive_next_batch`].
#[derive(Debug, Default)]
pub struct ReceiveBatch {
    /// Packets decoded before the first failure, in arrival order.
    pub packets: Vec<Packet>,
    pub error: Option<ProtocolError>,
}

#[derive(Debug, Default)]
pub struct ReceiveQueue {
    frames: VecDeque<Bytes>,
}

impl ReceiveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one complete packet.
    pub fn push(&mut self, frame: Bytes) {
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Decode everything queued.
    ///
    /// The queue is always emptied. The first failure ends the batch and the
    /// frames after it are discarded with the connection.
    pub fn receive_next_batch(
        &mut self,
        version: ProtocolVersion,
        tracker: &mut ReceiveMaximumTracker,
    ) -> ReceiveBatch {
        let mut batch = ReceiveBatch::default();
        for frame in self.frames.drain(..) {
            match decode_one(&frame, version, tracker) {
                Ok(packet) => batch.packets.push(packet),
                Err(e) => {
                    batch.error = Some(e);
                    break;
                }
            }
        }
        batch
    }
}

fn decode_one(
    frame: &[u8],
    version: ProtocolVersion,
    tracker: &mut ReceiveMaximumTracker,
) -> Result<Packet, ProtocolError> {
    let packet = Packet::decode(frame, version)?;
    match &packet {
        Packet::Connect(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) | Packet::PingReq => {
            return Err(ProtocolError::Violation(format!(
                "{:?} is never sent to a client",
                packet.packet_type()
            )));
        }
        Packet::Publish(publish) if publish.qos != QoS::AtMostOnce => {
            let packet_id = publish.packet_id.unwrap_or(0);
            if !tracker.decrement_receive_allowance(packet_id) {
                return Err(ProtocolError::ReceiveMaximumExceeded { packet_id });
            }
        }
        Packet::PubAck(ack) => {
            tracker.increment_send_allowance(ack.packet_id);
        }
        Packet::PubRec(ack) if ack.reason_code.is_error() => {
            tracker.increment_send_allowance(ack.packet_id);
        }
        Packet::PubComp(comp) => {
            tracker.increment_send_allowance(comp.packet_id);
        }
        Packet::ConnAck(ack) if !ack.reason_code.is_error() => {
            let maximum = ack
                .properties
                .get_u16(PropertyType::ReceiveMaximum)
                .unwrap_or(u16::MAX);
            tracker.reset_send(maximum);
        }
        _ => {}
    }
    Ok(packet)
}
