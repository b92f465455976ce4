//! Outgoing packet queue.
//!
//! Packets are encoded lazily, when a batch is composed, so flow control is
//! evaluated against the state at send time rather than at publish time.

use std::collections::VecDeque;
use std::io;
use std::thread;

use bytes::BytesMut;
use tickmqtt_core::{EncodeError, Packet, ProtocolVersion, QoS};

use crate::config::Config;
use crate::error::ClientError;
use crate::receive_maximum::ReceiveMaximumTracker;
use crate::transport::Transport;

/// Borrowed connection state for one batch.
pub struct SendContext<'a> {
    pub transport: &'a mut dyn Transport,
    pub tracker: &'a mut ReceiveMaximumTracker,
    pub version: ProtocolVersion,
    /// Broker MAXIMUM_PACKET_SIZE.
    pub max_packet_size: Option<u32>,
    pub config: &'a Config,
    /// CONNACK accepted. Until then only CONNECT, AUTH and DISCONNECT leave
    /// the queue.
    pub session_established: bool,
}

/// Result of [`SendQueue::send_next_batch`].
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Packets whose last byte reached the transport, in send order.
    pub flushed: Vec<Packet>,
    pub bytes_sent: usize,
    /// Unrecoverable failure; the connection must be dropped.
    pub error: Option<ClientError>,
}

#[derive(Debug, Default)]
pub struct SendQueue {
    tag: String,
    queue: VecDeque<Packet>,
}

impl SendQueue {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            queue: VecDeque::new(),
        }
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = tag.into();
    }

    pub fn push(&mut self, packet: Packet) {
        self.queue.push_back(packet);
    }

    /// Queue ahead of everything else (CONNECT).
    pub fn push_front(&mut self, packet: Packet) {
        self.queue.push_front(packet);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.queue.iter()
    }

    /// Drop every queued packet, returning them so the caller can release
    /// their packet IDs.
    pub fn clear(&mut self) -> Vec<Packet> {
        self.queue.drain(..).collect()
    }

    /// Remove the packets matching `pred`, keeping the order of the rest.
    pub fn take_where(&mut self, mut pred: impl FnMut(&Packet) -> bool) -> Vec<Packet> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for packet in self.queue.drain(..) {
            if pred(&packet) {
                taken.push(packet);
            } else {
                kept.push_back(packet);
            }
        }
        self.queue = kept;
        taken
    }

    /// Compose every sendable packet into one buffer and write it.
    ///
    /// A QoS 1/2 PUBLISH without send allowance stays queued, and so does
    /// every QoS 1/2 PUBLISH behind it, so those leave in order. QoS 0
    /// publishes and control packets behind a blocked publish are still sent.
    pub fn send_next_batch(&mut self, ctx: SendContext<'_>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if self.queue.is_empty() {
            return outcome;
        }

        let mut buf = BytesMut::new();
        let mut batch: Vec<(Packet, usize)> = Vec::new();
        let mut held = VecDeque::with_capacity(self.queue.len());
        let mut publish_blocked = false;

        while let Some(packet) = self.queue.pop_front() {
            if !ctx.session_established
                && !matches!(
                    packet,
                    Packet::Connect(_) | Packet::Auth(_) | Packet::Disconnect(_)
                )
            {
                held.push_back(packet);
                continue;
            }

            let flow_controlled = matches!(&packet, Packet::Publish(p) if p.qos != QoS::AtMostOnce);
            if flow_controlled && publish_blocked {
                held.push_back(packet);
                continue;
            }

            let encoded = match encode_checked(&packet, ctx.version, ctx.max_packet_size) {
                Ok(encoded) => encoded,
                Err(e) => {
                    log::error!(
                        "{} cannot encode {:?}: {}",
                        self.tag,
                        packet.packet_type(),
                        e
                    );
                    outcome.error = Some(e.into());
                    break;
                }
            };

            if !batch.is_empty() && buf.len() + encoded.len() > ctx.config.max_batch_bytes {
                held.push_back(packet);
                break;
            }

            if flow_controlled {
                let packet_id = packet.packet_id().unwrap_or(0);
                if !ctx.tracker.decrement_send_allowance(packet_id) {
                    log::debug!(
                        "{} send allowance exhausted, holding packet_id={}",
                        self.tag,
                        packet_id
                    );
                    publish_blocked = true;
                    held.push_back(packet);
                    continue;
                }
            }

            buf.extend_from_slice(&encoded);
            batch.push((packet, buf.len()));
        }

        // Whatever was not looked at keeps its place behind the held packets
        held.append(&mut self.queue);
        self.queue = held;

        if batch.is_empty() {
            return outcome;
        }

        let (sent, error) = send_all(ctx.transport, &buf, ctx.config, &self.tag);
        outcome.bytes_sent = sent;
        if outcome.error.is_none() {
            outcome.error = error;
        }
        outcome.flushed = batch
            .into_iter()
            .take_while(|(_, end)| *end <= sent)
            .map(|(packet, _)| packet)
            .collect();
        outcome
    }
}

fn encode_checked(
    packet: &Packet,
    version: ProtocolVersion,
    max_packet_size: Option<u32>,
) -> Result<Vec<u8>, EncodeError> {
    if let Some(max) = max_packet_size {
        let size = packet.encoding_size(version);
        if size > max as usize {
            return Err(EncodeError::PacketTooLarge {
                size,
                max: max as usize,
            });
        }
    }
    Ok(packet.encode(version)?.as_slice().to_vec())
}

/// Write all of `bytes`, retrying partial and failed writes with backoff.
///
/// Returns the number of bytes written and the error that ended the attempt,
/// if any.
pub(crate) fn send_all(
    transport: &mut dyn Transport,
    bytes: &[u8],
    config: &Config,
    tag: &str,
) -> (usize, Option<ClientError>) {
    let mut offset = 0;
    let mut failures = 0;
    while offset < bytes.len() {
        let error = match transport.send(&bytes[offset..]) {
            Ok(0) => io::Error::new(io::ErrorKind::WouldBlock, "socket accepted no bytes"),
            Ok(n) => {
                offset += n;
                failures = 0;
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => e,
        };

        failures += 1;
        if failures > config.send_retry_count {
            log::warn!(
                "{} send failed after {} attempts with {} of {} bytes written: {}",
                tag,
                failures,
                offset,
                bytes.len(),
                error
            );
            return (offset, Some(ClientError::Transport(error.to_string())));
        }
        log::debug!("{} send attempt {} failed: {}", tag, failures, error);
        thread::sleep(config.send_retry_backoff());
    }
    (offset, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::BrokerAddress;
    use crate::transport::TransportEvent;
    use bytes::Bytes;
    use std::time::Duration;
    use tickmqtt_core::{Publish, PublishAck, Utf8String};

    /// Accepts at most `limit` bytes per call; errors once `budget` runs out.
    struct ChunkedTransport {
        written: Vec<u8>,
        limit: usize,
        budget: usize,
        fail: bool,
    }

    impl ChunkedTransport {
        fn new(limit: usize) -> Self {
            Self {
                written: Vec::new(),
                limit,
                budget: usize::MAX,
                fail: false,
            }
        }
    }

    impl Transport for ChunkedTransport {
        fn connect(&mut self, _address: &BrokerAddress) -> bool {
            true
        }

        fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken"));
            }
            let n = bytes.len().min(self.limit).min(self.budget);
            self.budget -= n;
            self.written.extend_from_slice(&bytes[..n]);
            Ok(n)
        }

        fn close(&mut self) -> bool {
            true
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn poll_events(&mut self, _events: &mut Vec<TransportEvent>) {}
    }

    fn config() -> Config {
        Config::default().send_retries(2, Duration::ZERO)
    }

    fn publish(packet_id: Option<u16>, qos: QoS) -> Packet {
        let mut publish = Publish::new(
            Utf8String::new("a/b").unwrap(),
            qos,
            Bytes::from_static(b"hello"),
        );
        publish.packet_id = packet_id;
        Packet::Publish(publish)
    }

    fn ctx<'a>(
        transport: &'a mut ChunkedTransport,
        tracker: &'a mut ReceiveMaximumTracker,
        config: &'a Config,
    ) -> SendContext<'a> {
        SendContext {
            transport,
            tracker,
            version: ProtocolVersion::V5,
            max_packet_size: None,
            config,
            session_established: true,
        }
    }

    #[test]
    fn test_batch_in_fifo_order() {
        let config = config();
        let mut transport = ChunkedTransport::new(usize::MAX);
        let mut tracker = ReceiveMaximumTracker::default();
        let mut queue = SendQueue::new("test");
        queue.push(Packet::PingReq);
        queue.push(publish(None, QoS::AtMostOnce));

        let outcome = queue.send_next_batch(ctx(&mut transport, &mut tracker, &config));
        assert!(outcome.error.is_none());
        assert_eq!(outcome.flushed.len(), 2);
        assert_eq!(&transport.written[..2], &[0xC0, 0x00]);
        assert_eq!(transport.written[2] >> 4, 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_partial_send_flushes_by_packet_boundary() {
        let config = config();
        let mut transport = ChunkedTransport::new(3);
        // PINGREQ (2 bytes) fits, the PUBACK (4 bytes) is cut after 1 byte
        transport.budget = 3;
        let mut tracker = ReceiveMaximumTracker::default();
        let mut queue = SendQueue::new("test");
        queue.push(Packet::PingReq);
        queue.push(Packet::PubAck(PublishAck::new(1)));

        let outcome = queue.send_next_batch(ctx(&mut transport, &mut tracker, &config));
        assert_eq!(outcome.bytes_sent, 3);
        assert_eq!(outcome.flushed, vec![Packet::PingReq]);
        assert!(matches!(outcome.error, Some(ClientError::Transport(_))));
    }

    #[test]
    fn test_small_writes_are_retried_to_completion() {
        let config = config();
        let mut transport = ChunkedTransport::new(1);
        let mut tracker = ReceiveMaximumTracker::default();
        let mut queue = SendQueue::new("test");
        queue.push(publish(None, QoS::AtMostOnce));

        let outcome = queue.send_next_batch(ctx(&mut transport, &mut tracker, &config));
        assert!(outcome.error.is_none());
        assert_eq!(outcome.flushed.len(), 1);
        assert_eq!(outcome.bytes_sent, transport.written.len());
    }

    #[test]
    fn test_send_error_reported_after_retries() {
        let config = config();
        let mut transport = ChunkedTransport::new(usize::MAX);
        transport.fail = true;
        let mut tracker = ReceiveMaximumTracker::default();
        let mut queue = SendQueue::new("test");
        queue.push(Packet::PingReq);

        let outcome = queue.send_next_batch(ctx(&mut transport, &mut tracker, &config));
        assert!(outcome.flushed.is_empty());
        assert!(matches!(outcome.error, Some(ClientError::Transport(_))));
    }

    #[test]
    fn test_send_allowance_holds_publishes_in_order() {
        let config = config();
        let mut transport = ChunkedTransport::new(usize::MAX);
        let mut tracker = ReceiveMaximumTracker::new(10, 1);
        let mut queue = SendQueue::new("test");
        queue.push(publish(Some(1), QoS::AtLeastOnce));
        queue.push(publish(Some(2), QoS::AtLeastOnce));
        queue.push(publish(None, QoS::AtMostOnce));
        queue.push(Packet::PingReq);

        let outcome = queue.send_next_batch(ctx(&mut transport, &mut tracker, &config));
        let sent: Vec<_> = outcome.flushed.iter().map(Packet::packet_type).collect();
        assert_eq!(
            sent,
            vec![
                tickmqtt_core::PacketType::Publish,
                tickmqtt_core::PacketType::Publish,
                tickmqtt_core::PacketType::PingReq
            ]
        );
        assert_eq!(outcome.flushed[0].packet_id(), Some(1));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next().unwrap().packet_id(), Some(2));

        // Allowance restored by the PUBACK
        tracker.increment_send_allowance(1);
        let outcome = queue.send_next_batch(ctx(&mut transport, &mut tracker, &config));
        assert_eq!(outcome.flushed.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_too_large_packet_is_unrecoverable() {
        let config = config();
        let mut transport = ChunkedTransport::new(usize::MAX);
        let mut tracker = ReceiveMaximumTracker::default();
        let mut queue = SendQueue::new("test");
        queue.push(publish(None, QoS::AtMostOnce));

        let mut context = ctx(&mut transport, &mut tracker, &config);
        context.max_packet_size = Some(8);
        let outcome = queue.send_next_batch(context);
        assert!(matches!(
            outcome.error,
            Some(ClientError::Encode(EncodeError::PacketTooLarge { .. }))
        ));
        assert!(transport.written.is_empty());
    }

    #[test]
    fn test_held_until_session_established() {
        let config = config();
        let mut transport = ChunkedTransport::new(usize::MAX);
        let mut tracker = ReceiveMaximumTracker::default();
        let mut queue = SendQueue::new("test");
        queue.push(Packet::PingReq);
        queue.push(Packet::Disconnect(Default::default()));

        let mut context = ctx(&mut transport, &mut tracker, &config);
        context.session_established = false;
        let outcome = queue.send_next_batch(context);
        assert_eq!(outcome.flushed.len(), 1);
        assert!(matches!(outcome.flushed[0], Packet::Disconnect(_)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_batch_byte_cap() {
        let mut config = config();
        config.max_batch_bytes = 3;
        let mut transport = ChunkedTransport::new(usize::MAX);
        let mut tracker = ReceiveMaximumTracker::default();
        let mut queue = SendQueue::new("test");
        queue.push(Packet::PingReq);
        queue.push(Packet::PingReq);

        let outcome = queue.send_next_batch(ctx(&mut transport, &mut tracker, &config));
        assert_eq!(outcome.flushed.len(), 1);
        assert_eq!(queue.len(), 1);
    }
}
