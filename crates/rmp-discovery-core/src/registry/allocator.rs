//! Monotonic global id allocator.

use parking_lot::Mutex;

use crate::types::GlobalId;

/// First id handed out by a fresh gateway.
pub const DEFAULT_FIRST_ID: GlobalId = 100;

/// Hands out strictly increasing ids; safe to share between gateways.
#[derive(Debug)]
pub struct IdAllocator {
    next: Mutex<GlobalId>,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_FIRST_ID)
    }
}

impl IdAllocator {
    /// Allocator whose next id is `cursor`.
    pub fn new(cursor: GlobalId) -> Self {
        Self {
            next: Mutex::new(cursor.max(1)),
        }
    }

    /// Return the current cursor and advance it.
    pub fn next(&self) -> GlobalId {
        let mut next = self.next.lock();
        let id = *next;
        *next += 1;
        id
    }

    /// Replace the cursor with a persisted value.
    pub fn load(&self, cursor: GlobalId) {
        *self.next.lock() = cursor.max(1);
    }

    /// Move the cursor past `id` if it is not already.
    pub fn reserve_through(&self, id: GlobalId) {
        let mut next = self.next.lock();
        if *next <= id {
            *next = id + 1;
        }
    }

    /// Value to persist; the next id that will be handed out.
    pub fn snapshot(&self) -> GlobalId {
        *self.next.lock()
    }
}
