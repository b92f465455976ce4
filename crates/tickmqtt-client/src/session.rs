//! Session state tracking for MQTT client.
//!
//! Implements client-side session state per MQTT spec Section 4.1:
//! - QoS 1 and QoS 2 messages sent but not completely acknowledged
//! - QoS 2 messages received but not completely acknowledged
//!
//! Key requirements:
//! - [MQTT-4.4.0-1] On reconnect with CleanStart=0, re-send unacknowledged messages
//! - [MQTT-4.6.0-1] Re-send in the order originally sent
//!
//! Outbound entries are kept in non-decreasing retry-time order. Every
//! reschedule moves the entry to the back, so the retry scan can stop at the
//! first entry that is not due yet.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant, SystemTime};

use tickmqtt_core::{Packet, Publish, PublishRelease, QoS};

use crate::packet_id::PacketIdPool;
use crate::store::{SessionStore, StoredMessage};

/// Delivery status of a QoS 1/2 message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    /// QoS 1 PUBLISH sent, awaiting PUBACK.
    Pending,
    /// QoS 2 PUBLISH sent, awaiting PUBREC.
    WaitingForPubRec,
    /// QoS 2 PUBLISH received and PUBREC sent, awaiting PUBREL.
    WaitingForPubRel,
    /// PUBREL sent, awaiting PUBCOMP.
    WaitingForPubComp,
}

impl MessageStatus {
    /// Initial status of an outbound publish.
    pub fn initial(qos: QoS) -> Self {
        match qos {
            QoS::ExactlyOnce => MessageStatus::WaitingForPubRec,
            _ => MessageStatus::Pending,
        }
    }
}

/// A pending outbound QoS 1 or QoS 2 message.
#[derive(Debug, Clone)]
pub struct MessageEntry {
    pub packet_id: u16,
    pub publish: Publish,
    pub status: MessageStatus,
    pub next_retry: Instant,
    /// A copy sits in the send queue and has not been flushed yet.
    queued: bool,
    /// Publish order, kept across reschedules.
    sequence: u64,
}

impl MessageEntry {
    /// Packet to retransmit for the current status.
    fn retransmission(&self) -> Packet {
        match self.status {
            MessageStatus::WaitingForPubComp => {
                Packet::PubRel(PublishRelease::new(self.packet_id))
            }
            _ => {
                let mut publish = self.publish.clone();
                publish.dup = true;
                Packet::Publish(publish)
            }
        }
    }
}

/// Client session state.
pub struct SessionState {
    tag: String,
    retry_interval: Duration,
    outbound: VecDeque<MessageEntry>,
    /// Inbound QoS 2 packet IDs awaiting PUBREL.
    inbound: HashSet<u16>,
    next_sequence: u64,
    store: Option<Box<dyn SessionStore>>,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("tag", &self.tag)
            .field("outbound", &self.outbound)
            .field("inbound", &self.inbound)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl SessionState {
    pub fn new(tag: impl Into<String>, retry_interval: Duration) -> Self {
        Self {
            tag: tag.into(),
            retry_interval,
            outbound: VecDeque::new(),
            inbound: HashSet::new(),
            next_sequence: 0,
            store: None,
        }
    }

    pub fn set_store(&mut self, store: Box<dyn SessionStore>) {
        self.store = Some(store);
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = tag.into();
    }

    pub fn len(&self) -> usize {
        self.outbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
    }

    pub fn get(&self, packet_id: u16) -> Option<&MessageEntry> {
        self.outbound.iter().find(|e| e.packet_id == packet_id)
    }

    /// Outbound entries front to back.
    pub fn iter(&self) -> impl Iterator<Item = &MessageEntry> {
        self.outbound.iter()
    }

    /// Track a QoS 1/2 publish that has just been queued for sending.
    pub fn add_message(&mut self, packet_id: u16, publish: Publish, now: Instant) {
        let status = MessageStatus::initial(publish.qos);
        self.persist(|store, tag| {
            let stored = StoredMessage {
                packet_id,
                status,
                publish: publish.clone(),
                stored_at: SystemTime::now(),
            };
            log_store_error(tag, "write", store.write(&stored));
        });
        let sequence = self.next_sequence();
        self.outbound.push_back(MessageEntry {
            packet_id,
            publish,
            status,
            next_retry: now + self.retry_interval,
            queued: true,
            sequence,
        });
    }

    /// Change the status of an entry and reschedule it. Returns false if
    /// `packet_id` is unknown.
    pub fn update_message(&mut self, packet_id: u16, status: MessageStatus, now: Instant) -> bool {
        let Some(mut entry) = self.take(packet_id) else {
            return false;
        };
        entry.status = status;
        entry.queued = status == MessageStatus::WaitingForPubComp;
        entry.next_retry = now + self.retry_interval;
        self.outbound.push_back(entry);
        self.persist(|store, tag| {
            log_store_error(tag, "update", store.update_message(packet_id, status));
        });
        true
    }

    /// Final acknowledgment received.
    pub fn remove_message(&mut self, packet_id: u16) -> Option<MessageEntry> {
        let entry = self.take(packet_id)?;
        self.persist(|store, tag| {
            log_store_error(tag, "remove", store.remove_message(packet_id));
        });
        Some(entry)
    }

    /// The queued copy of `packet_id` reached the socket; the retry timer
    /// starts now.
    pub fn mark_flushed(&mut self, packet_id: u16, now: Instant) {
        if let Some(mut entry) = self.take(packet_id) {
            entry.queued = false;
            entry.next_retry = now + self.retry_interval;
            self.outbound.push_back(entry);
        }
    }

    /// Packets to retransmit at `now`, in their original relative order.
    ///
    /// Entries whose previous copy is still waiting in the send queue are
    /// rescheduled without producing a duplicate.
    pub fn due_retries(&mut self, now: Instant) -> Vec<Packet> {
        let mut due = Vec::new();
        let mut rescheduled = Vec::new();
        while let Some(front) = self.outbound.front() {
            if front.next_retry > now {
                break;
            }
            let Some(mut entry) = self.outbound.pop_front() else {
                break;
            };
            if !entry.queued {
                log::debug!(
                    "{} retrying packet_id={} status={:?}",
                    self.tag,
                    entry.packet_id,
                    entry.status
                );
                due.push(entry.retransmission());
                entry.queued = true;
            }
            entry.next_retry = now + self.retry_interval;
            rescheduled.push(entry);
        }
        self.outbound.extend(rescheduled);
        due
    }

    /// Retransmit every outbound entry after a reconnection, in the order
    /// the messages were first published.
    pub fn resend_all(&mut self, now: Instant) -> Vec<Packet> {
        let next_retry = now + self.retry_interval;
        self.outbound
            .make_contiguous()
            .sort_by_key(|entry| entry.sequence);
        self.outbound
            .iter_mut()
            .map(|entry| {
                entry.queued = true;
                entry.next_retry = next_retry;
                entry.retransmission()
            })
            .collect()
    }

    /// Queued copies were dropped without being sent.
    pub fn clear_queued(&mut self) {
        for entry in &mut self.outbound {
            entry.queued = false;
        }
    }

    /// Record an inbound QoS 2 publish. False if it is a duplicate.
    pub fn add_inbound(&mut self, packet_id: u16) -> bool {
        self.inbound.insert(packet_id)
    }

    /// PUBREL received. False if `packet_id` was not awaiting one.
    pub fn release_inbound(&mut self, packet_id: u16) -> bool {
        self.inbound.remove(&packet_id)
    }

    /// Drop all state, persisted state included.
    pub fn clear(&mut self) {
        self.outbound.clear();
        self.inbound.clear();
        self.persist(|store, tag| {
            log_store_error(tag, "clear", store.remove_from_store());
        });
    }

    /// Load persisted messages for `client_id`, reserving their packet IDs.
    ///
    /// Expired messages are purged first. Restored entries are due
    /// immediately.
    pub fn restore(&mut self, client_id: &str, pool: &PacketIdPool, now: Instant) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        if let Err(e) = store.initialize(client_id) {
            log::warn!("{} session store initialize failed: {}", self.tag, e);
            return;
        }
        log_store_error(
            &self.tag,
            "expire",
            store.remove_expired_from_store(SystemTime::now()),
        );
        let messages = match store.read_all() {
            Ok(messages) => messages,
            Err(e) => {
                log::warn!("{} session store read failed: {}", self.tag, e);
                return;
            }
        };

        self.outbound.clear();
        for message in messages {
            if message.status == MessageStatus::WaitingForPubRel {
                continue;
            }
            if !pool.reserve(message.packet_id) {
                log::warn!(
                    "{} skipping stored message with duplicate packet_id={}",
                    self.tag,
                    message.packet_id
                );
                continue;
            }
            let sequence = self.next_sequence();
            self.outbound.push_back(MessageEntry {
                packet_id: message.packet_id,
                publish: message.publish,
                status: message.status,
                next_retry: now,
                queued: false,
                sequence,
            });
        }
        if !self.outbound.is_empty() {
            log::info!(
                "{} restored {} unacknowledged messages",
                self.tag,
                self.outbound.len()
            );
        }
    }

    /// Point the store at `client_id` without loading anything.
    pub fn initialize_store(&mut self, client_id: &str) {
        if let Some(store) = self.store.as_mut() {
            log_store_error(&self.tag, "initialize", store.initialize(client_id));
        }
    }

    fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn take(&mut self, packet_id: u16) -> Option<MessageEntry> {
        let index = self.outbound.iter().position(|e| e.packet_id == packet_id)?;
        self.outbound.remove(index)
    }

    fn persist(&mut self, f: impl FnOnce(&mut dyn SessionStore, &str)) {
        if let Some(store) = self.store.as_mut() {
            f(store.as_mut(), &self.tag);
        }
    }
}

fn log_store_error(tag: &str, op: &str, result: std::io::Result<()>) {
    if let Err(e) = result {
        log::warn!("{} session store {} failed: {}", tag, op, e);
    }
}
