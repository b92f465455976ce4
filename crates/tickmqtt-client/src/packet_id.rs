//! Packet identifier allocation and tracking.
//!
//! Implements requirements from MQTT spec:
//! - [MQTT-2.3.1-2] Each time a Client sends a new packet it MUST assign a currently unused Packet Identifier.
//! - [MQTT-2.3.1-3] If a Client re-sends a particular Control Packet, then it MUST use the same Packet Identifier.

use std::collections::{BTreeSet, HashSet};

use parking_lot::Mutex;

const FIRST_ID: u32 = 1;
const LAST_ID: u32 = u16::MAX as u32;

#[derive(Debug)]
struct PoolState {
    /// Next never-issued ID; `LAST_ID + 1` once the sequence is spent.
    next_id: u32,
    /// Released IDs below `next_id`, handed out smallest first.
    released: BTreeSet<u16>,
    in_use: HashSet<u16>,
}

/// Thread-safe pool of 16-bit packet identifiers.
///
/// Released identifiers are reused before the sequence advances, so a
/// long-running connection keeps its identifiers small and never issues
/// one that is still in flight.
#[derive(Debug)]
pub struct PacketIdPool {
    state: Mutex<PoolState>,
}

impl Default for PacketIdPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketIdPool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                next_id: FIRST_ID,
                released: BTreeSet::new(),
                in_use: HashSet::new(),
            }),
        }
    }

    /// Allocate an unused identifier.
    ///
    /// Returns `None` if all 65535 identifiers are in flight.
    pub fn get_id(&self) -> Option<u16> {
        let mut state = self.state.lock();

        if let Some(id) = state.released.pop_first() {
            state.in_use.insert(id);
            return Some(id);
        }

        while state.next_id <= LAST_ID {
            let id = state.next_id as u16;
            state.next_id += 1;
            // Reserved IDs restored from a session may sit ahead of the sequence
            if state.in_use.insert(id) {
                return Some(id);
            }
        }
        None
    }

    /// Return an identifier to the pool.
    ///
    /// Zero and identifiers not currently in use are ignored, so duplicate
    /// acknowledgments cannot release an ID twice.
    pub fn release_id(&self, id: u16) {
        if id == 0 {
            return;
        }
        let mut state = self.state.lock();
        if !state.in_use.remove(&id) {
            return;
        }
        if u32::from(id) < state.next_id {
            state.released.insert(id);
        }
    }

    /// Mark `id` as in flight without allocating it, for identifiers carried
    /// over from a restored session. Returns false if it was already taken.
    pub fn reserve(&self, id: u16) -> bool {
        if id == 0 {
            return false;
        }
        let mut state = self.state.lock();
        if !state.in_use.insert(id) {
            return false;
        }
        state.released.remove(&id);
        true
    }

    pub fn is_in_use(&self, id: u16) -> bool {
        self.state.lock().in_use.contains(&id)
    }

    pub fn in_use_count(&self) -> usize {
        self.state.lock().in_use.len()
    }

    /// Forget every allocation (clean start).
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.next_id = FIRST_ID;
        state.released.clear();
        state.in_use.clear();
    }
}
