//! Payouts whose outcome the store does not reflect.
//!
//! An entry means money may have left the wallet without the drop recording
//! it. The drop stays on hold until an operator clears the entry, and no
//! further payout is attempted for it. The engine also writes each entry to
//! the drop store so a restart does not release it.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::{error, warn};

use crate::drop_id::DropId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutKind {
    Claim,
    Refund,
}

impl PayoutKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Refund => "refund",
        }
    }
}

impl FromStr for PayoutKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "claim" => Ok(Self::Claim),
            "refund" => Ok(Self::Refund),
            other => Err(format!("unknown payout kind {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationReason {
    /// Gateway confirmed the payment; the status commit failed.
    SettledButNotPersisted,
    /// Gateway did not answer in time; the payment may or may not exist.
    PayoutTimedOut,
    /// Request may have reached the gateway but no usable answer came back.
    PayoutIndeterminate,
}

impl ReconciliationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SettledButNotPersisted => "settled_but_not_persisted",
            Self::PayoutTimedOut => "payout_timed_out",
            Self::PayoutIndeterminate => "payout_indeterminate",
        }
    }
}

impl FromStr for ReconciliationReason {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "settled_but_not_persisted" => Ok(Self::SettledButNotPersisted),
            "payout_timed_out" => Ok(Self::PayoutTimedOut),
            "payout_indeterminate" => Ok(Self::PayoutIndeterminate),
            other => Err(format!("unknown reconciliation reason {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationEntry {
    pub drop_id: String,
    pub kind: PayoutKind,
    pub reason: ReconciliationReason,
    pub payment_request: String,
    pub payment_hash: Option<String>,
    pub detail: String,
    pub recorded_at: i64,
}

#[derive(Debug, Default)]
pub struct ReconciliationLog {
    entries: Mutex<HashMap<DropId, ReconciliationEntry>>,
}

impl ReconciliationLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<DropId, ReconciliationEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, id: &DropId, entry: ReconciliationEntry) {
        error!(
            drop_id = %id,
            kind = ?entry.kind,
            reason = ?entry.reason,
            payment_hash = entry.payment_hash.as_deref().unwrap_or("unknown"),
            "Payout requires manual reconciliation: {}",
            entry.detail
        );
        self.entries().insert(id.clone(), entry);
    }

    /// Reinstates a hold loaded from the store.
    pub fn restore(&self, id: &DropId, entry: ReconciliationEntry) {
        warn!(drop_id = %id, reason = ?entry.reason, "Reconciliation hold restored");
        self.entries().insert(id.clone(), entry);
    }

    pub fn is_held(&self, id: &DropId) -> bool {
        self.entries().contains_key(id)
    }

    #[cfg(test)]
    pub fn get(&self, id: &DropId) -> Option<ReconciliationEntry> {
        self.entries().get(id).cloned()
    }

    /// Operator acknowledgement; releases the hold.
    pub fn resolve(&self, id: &DropId) -> Option<ReconciliationEntry> {
        self.entries().remove(id)
    }

    pub fn snapshot(&self) -> Vec<ReconciliationEntry> {
        let mut entries: Vec<_> = self.entries().values().cloned().collect();
        entries.sort_by_key(|entry| entry.recorded_at);
        entries
    }
}
