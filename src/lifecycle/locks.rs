//! Per-drop mutual exclusion.
//!
//! Each drop id maps to its own async mutex, so a payout blocked on the
//! gateway for seconds only stalls callers of that same drop. Entries are
//! removed when the last holder or waiter lets go.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::drop_id::DropId;

type Slot = Arc<AsyncMutex<()>>;

#[derive(Debug, Default)]
pub struct LockTable {
    slots: Arc<Mutex<HashMap<DropId, Slot>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: &DropId) -> DropLock {
        let slot = {
            let mut slots = lock_slots(&self.slots);
            Arc::clone(slots.entry(id.clone()).or_default())
        };
        let guard = Arc::clone(&slot).lock_owned().await;
        DropLock {
            id: id.clone(),
            slot,
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Number of ids with a live lock entry.
    pub fn active(&self) -> usize {
        lock_slots(&self.slots).len()
    }
}

fn lock_slots(slots: &Mutex<HashMap<DropId, Slot>>) -> MutexGuard<'_, HashMap<DropId, Slot>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held for the whole status-check, payout, commit sequence of one drop.
#[derive(Debug)]
pub struct DropLock {
    id: DropId,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<Mutex<HashMap<DropId, Slot>>>,
}

impl DropLock {
    pub fn id(&self) -> &DropId {
        &self.id
    }
}

impl Drop for DropLock {
    fn drop(&mut self) {
        let mut slots = lock_slots(&self.slots);
        self.guard.take();
        // Table entry, this handle. Anyone else cloned the slot under the
        // table mutex we now hold, so the count cannot grow behind us.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.id);
        }
    }
}
