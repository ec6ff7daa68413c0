use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

#[cfg(test)]
use super::StoreError;
use super::{DropStore, StoreResult};
use crate::drop_id::DropId;
use crate::lifecycle::ReconciliationEntry;
use crate::models::drop::Drop;

/// Process-local store used for development and tests.
#[derive(Debug, Default)]
pub struct MemoryDropStore {
    drops: RwLock<HashMap<DropId, Drop>>,
    holds: RwLock<HashMap<String, ReconciliationEntry>>,
    #[cfg(test)]
    fail_writes: AtomicBool,
}

impl MemoryDropStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        #[cfg(test)]
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DropStore for MemoryDropStore {
    async fn put(&self, drop: &Drop) -> StoreResult<()> {
        self.check_writable()?;
        self.drops
            .write()
            .await
            .insert(drop.id.clone(), drop.clone());
        Ok(())
    }

    async fn get(&self, id: &DropId) -> StoreResult<Option<Drop>> {
        Ok(self.drops.read().await.get(id).cloned())
    }

    async fn list_all(&self) -> StoreResult<Vec<Drop>> {
        Ok(self.drops.read().await.values().cloned().collect())
    }

    async fn delete(&self, id: &DropId) -> StoreResult<()> {
        self.check_writable()?;
        self.drops.write().await.remove(id);
        Ok(())
    }

    async fn update_view_counters(
        &self,
        id: &DropId,
        view_count: u32,
        last_view_reset: i64,
    ) -> StoreResult<()> {
        self.check_writable()?;
        if let Some(drop) = self.drops.write().await.get_mut(id) {
            drop.view_count = view_count;
            drop.last_view_reset = last_view_reset;
        }
        Ok(())
    }

    async fn save_hold(&self, entry: &ReconciliationEntry) -> StoreResult<()> {
        self.check_writable()?;
        self.holds
            .write()
            .await
            .insert(entry.drop_id.clone(), entry.clone());
        Ok(())
    }

    async fn delete_hold(&self, id: &DropId) -> StoreResult<()> {
        self.check_writable()?;
        self.holds.write().await.remove(id.as_str());
        Ok(())
    }

    async fn list_holds(&self) -> StoreResult<Vec<ReconciliationEntry>> {
        let mut holds: Vec<_> = self.holds.read().await.values().cloned().collect();
        holds.sort_by_key(|entry| entry.recorded_at);
        Ok(holds)
    }
}
