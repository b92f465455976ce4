//! Session state persistence.
//!
//! The engine writes to a [`SessionStore`] fire-and-forget: a failed write is
//! logged and the in-memory session carries on. A store only has to survive
//! process restarts; it is never consulted while a connection is running.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tickmqtt_core::{Publish, PropertyType};

use crate::session::MessageStatus;

/// One outbound QoS 1/2 message as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub packet_id: u16,
    pub status: MessageStatus,
    pub publish: Publish,
    pub stored_at: SystemTime,
}

impl StoredMessage {
    /// True once the publish MESSAGE_EXPIRY_INTERVAL has elapsed.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        let Some(seconds) = self
            .publish
            .properties
            .get_u32(PropertyType::MessageExpiryInterval)
        else {
            return false;
        };
        match now.duration_since(self.stored_at) {
            Ok(age) => age >= Duration::from_secs(u64::from(seconds)),
            Err(_) => false,
        }
    }
}

/// Backend that keeps a client's session across process restarts.
///
/// All operations apply to the client passed to [`SessionStore::initialize`].
/// `read_all` must return messages in the order they were written.
pub trait SessionStore: Send {
    fn initialize(&mut self, client_id: &str) -> io::Result<()>;

    fn write(&mut self, message: &StoredMessage) -> io::Result<()>;

    fn read_all(&mut self) -> io::Result<Vec<StoredMessage>>;

    fn remove_message(&mut self, packet_id: u16) -> io::Result<()>;

    fn update_message(&mut self, packet_id: u16, status: MessageStatus) -> io::Result<()>;

    /// Drop every message of the current client.
    fn remove_from_store(&mut self) -> io::Result<()>;

    fn remove_expired_from_store(&mut self, now: SystemTime) -> io::Result<()>;
}

/// In-process store. Clones share the same backing map, so a store handed
/// to one client can be handed to its replacement to simulate a restart.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    messages: Arc<Mutex<HashMap<String, Vec<StoredMessage>>>>,
    client_id: Option<String>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages stored for `client_id`.
    pub fn len(&self, client_id: &str) -> usize {
        self.messages.lock().get(client_id).map_or(0, Vec::len)
    }

    fn with_client<T>(&self, f: impl FnOnce(&mut Vec<StoredMessage>) -> T) -> io::Result<T> {
        let client_id = self.client_id.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "session store not initialized")
        })?;
        let mut messages = self.messages.lock();
        Ok(f(messages.entry(client_id.clone()).or_default()))
    }
}

impl SessionStore for MemorySessionStore {
    fn initialize(&mut self, client_id: &str) -> io::Result<()> {
        self.client_id = Some(client_id.to_string());
        Ok(())
    }

    fn write(&mut self, message: &StoredMessage) -> io::Result<()> {
        self.with_client(|messages| {
            messages.retain(|m| m.packet_id != message.packet_id);
            messages.push(message.clone());
        })
    }

    fn read_all(&mut self) -> io::Result<Vec<StoredMessage>> {
        self.with_client(|messages| messages.clone())
    }

    fn remove_message(&mut self, packet_id: u16) -> io::Result<()> {
        self.with_client(|messages| messages.retain(|m| m.packet_id != packet_id))
    }

    fn update_message(&mut self, packet_id: u16, status: MessageStatus) -> io::Result<()> {
        self.with_client(|messages| {
            if let Some(message) = messages.iter_mut().find(|m| m.packet_id == packet_id) {
                message.status = status;
            }
        })
    }

    fn remove_from_store(&mut self) -> io::Result<()> {
        self.with_client(Vec::clear)
    }

    fn remove_expired_from_store(&mut self, now: SystemTime) -> io::Result<()> {
        self.with_client(|messages| messages.retain(|m| !m.is_expired(now)))
    }
}
