//! Durable drop persistence.
//!
//! `get` after `put` on the same key must observe the write; the claim and
//! refund paths depend on it. Listings may lag by one sweep cycle.
//!
//! Reconciliation holds share the store so they survive a restart.

use async_trait::async_trait;
use sea_orm::DbErr;

use crate::drop_id::DropId;
use crate::lifecycle::ReconciliationEntry;
use crate::models::drop::{Drop, DropStatus};

mod database;
mod memory;

pub use database::DatabaseDropStore;
pub use memory::MemoryDropStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("stored drop {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait DropStore: Send + Sync {
    async fn put(&self, drop: &Drop) -> StoreResult<()>;

    async fn get(&self, id: &DropId) -> StoreResult<Option<Drop>>;

    async fn list_all(&self) -> StoreResult<Vec<Drop>>;

    async fn delete(&self, id: &DropId) -> StoreResult<()>;

    /// Writes only the throttle counters, leaving status untouched.
    async fn update_view_counters(
        &self,
        id: &DropId,
        view_count: u32,
        last_view_reset: i64,
    ) -> StoreResult<()>;

    /// Upserts the hold for `entry.drop_id`.
    async fn save_hold(&self, entry: &ReconciliationEntry) -> StoreResult<()>;

    async fn delete_hold(&self, id: &DropId) -> StoreResult<()>;

    async fn list_holds(&self) -> StoreResult<Vec<ReconciliationEntry>>;

    /// Status index. Not authoritative; callers re-check status under lock.
    async fn list_by_status(&self, status: DropStatus) -> StoreResult<Vec<Drop>> {
        let mut drops = self.list_all().await?;
        drops.retain(|drop| drop.status == status);
        Ok(drops)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
