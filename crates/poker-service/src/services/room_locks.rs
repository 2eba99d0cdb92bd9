//! Per-room mutation locks.
//!
//! Every read-modify-write of a room (router handlers, REST handlers, the
//! sweeper, disconnect reconciliation) holds the room's lock across
//! load, persist and broadcast, so mutations of one room are serialized
//! while different rooms proceed independently.
//!
//! Entries exist only while someone holds or waits for the lock. The last
//! guard to drop removes its entry, so deleted rooms and requests for
//! unknown rooms leave nothing behind.

use common::types::RoomId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = HashMap<RoomId, Arc<Mutex<()>>>;

/// Lock table keyed by room id.
#[derive(Debug, Default)]
pub struct RoomLocks {
    table: Arc<StdMutex<LockTable>>,
}

/// Exclusive access to one room. Dropping it releases the lock.
#[derive(Debug)]
pub struct RoomGuard {
    room_id: RoomId,
    table: Arc<StdMutex<LockTable>>,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RoomLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a room.
    pub async fn acquire(&self, room_id: RoomId) -> RoomGuard {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(room_id).or_default())
        };
        // Built before waiting so a cancelled acquire still cleans up.
        let mut room_guard = RoomGuard {
            room_id,
            table: Arc::clone(&self.table),
            lock,
            guard: None,
        };
        room_guard.guard = Some(Arc::clone(&room_guard.lock).lock_owned().await);
        room_guard
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for RoomGuard {
    fn drop(&mut self) {
        // Clones are only handed out under the table lock, so a count of two
        // (table entry plus this guard) means nobody else holds or waits.
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        let idle = Arc::strong_count(&self.lock) == 2
            && table
                .get(&self.room_id)
                .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock));
        if idle {
            table.remove(&self.room_id);
        }
    }
}
