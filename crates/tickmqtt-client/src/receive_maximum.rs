//! Receive Maximum flow control in both directions.
//!
//! - [MQTT-3.3.4-7] The Client MUST NOT send more than Receive Maximum QoS 1 and QoS 2 PUBLISH packets
//!   for which it has not received PUBACK, PUBCOMP, or PUBREC with a Reason Code of 128 or greater.
//! - [MQTT-3.3.4-9] The Server MUST NOT send more than Receive Maximum QoS 1 and QoS 2 PUBLISH packets
//!   to the Client without acknowledgment.

use std::collections::HashSet;

#[derive(Debug)]
struct Allowance {
    maximum: u16,
    in_flight: HashSet<u16>,
}

impl Allowance {
    fn new(maximum: u16) -> Self {
        Self {
            maximum,
            in_flight: HashSet::new(),
        }
    }

    fn available(&self) -> u16 {
        self.maximum
            .saturating_sub(self.in_flight.len().min(u16::MAX as usize) as u16)
    }

    fn decrement(&mut self, packet_id: u16) -> bool {
        if self.in_flight.contains(&packet_id) {
            return true;
        }
        if self.available() == 0 {
            return false;
        }
        self.in_flight.insert(packet_id);
        true
    }

    fn increment(&mut self, packet_id: u16) -> bool {
        self.in_flight.remove(&packet_id)
    }

    fn reset(&mut self, maximum: u16) {
        self.maximum = maximum;
        self.in_flight.clear();
    }
}

/// In-flight QoS 1/2 publish accounting.
///
/// The receive side counts publishes from the broker that this client has not
/// finished acknowledging; the send side counts publishes this client sent
/// that the broker has not acknowledged. Both track individual packet IDs so
/// duplicate publishes and duplicate acknowledgments never move a counter
/// twice.
#[derive(Debug)]
pub struct ReceiveMaximumTracker {
    receive: Allowance,
    send: Allowance,
}

impl Default for ReceiveMaximumTracker {
    fn default() -> Self {
        Self::new(u16::MAX, u16::MAX)
    }
}

impl ReceiveMaximumTracker {
    pub fn new(receive_maximum: u16, send_maximum: u16) -> Self {
        Self {
            receive: Allowance::new(receive_maximum),
            send: Allowance::new(send_maximum),
        }
    }

    /// Account for an inbound QoS 1/2 PUBLISH. False means the broker
    /// exceeded the Receive Maximum this client advertised.
    pub fn decrement_receive_allowance(&mut self, packet_id: u16) -> bool {
        self.receive.decrement(packet_id)
    }

    /// Inbound exchange for `packet_id` finished. False if it was not tracked.
    pub fn increment_receive_allowance(&mut self, packet_id: u16) -> bool {
        self.receive.increment(packet_id)
    }

    /// Reserve a send slot for an outbound QoS 1/2 PUBLISH. False means the
    /// publish must wait for an acknowledgment to free a slot.
    pub fn decrement_send_allowance(&mut self, packet_id: u16) -> bool {
        self.send.decrement(packet_id)
    }

    pub fn increment_send_allowance(&mut self, packet_id: u16) -> bool {
        self.send.increment(packet_id)
    }

    pub fn is_send_tracked(&self, packet_id: u16) -> bool {
        self.send.in_flight.contains(&packet_id)
    }

    pub fn receive_allowance(&self) -> u16 {
        self.receive.available()
    }

    pub fn send_allowance(&self) -> u16 {
        self.send.available()
    }

    pub fn reset_receive(&mut self, maximum: u16) {
        self.receive.reset(maximum);
    }

    pub fn reset_send(&mut self, maximum: u16) {
        self.send.reset(maximum);
    }
}
