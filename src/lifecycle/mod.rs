//! Drop lifecycle: `pending -> live -> {claimed | expired} -> returned`.
//!
//! Claim and refund hold the drop's lock from the status check through the
//! payout to the status commit, so at most one payout is ever made per drop.
//! The payout always happens before the commit; a payout whose commit fails
//! is parked in the [`ReconciliationLog`] and the drop is held. Holds are
//! also written to the store and reloaded by [`DropEngine::restore_holds`].

use std::cmp::Reverse;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::challenge::HumanityVerifier;
use crate::clock::Clock;
use crate::config::{GatewayConfig, LifecycleConfig};
use crate::drop_id::DropId;
use crate::error::{DropError, DropResult};
use crate::gateway::memo::{drop_id_from_memo, funding_memo};
use crate::gateway::{GatewayError, Payment, PaymentGateway, normalize_payment_request};
use crate::models::drop::{
    Drop, DropStatus, DropView, MAX_AMOUNT_SATS, MIN_AMOUNT_SATS, MSAT_PER_SAT, sanitize_message,
};
use crate::store::DropStore;
use crate::throttle::ViewThrottle;

mod locks;
mod reconciliation;

use locks::LockTable;
pub use reconciliation::{
    PayoutKind, ReconciliationEntry, ReconciliationLog, ReconciliationReason,
};

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub expiry_grace_seconds: i64,
    pub stale_pending_seconds: i64,
    pub payout_timeout: Duration,
    pub receivable_timeout: Duration,
    pub notify_url: Option<String>,
    pub verify_funding: bool,
}

impl LifecycleSettings {
    pub fn from_config(lifecycle: &LifecycleConfig, gateway: &GatewayConfig) -> Self {
        Self {
            expiry_grace_seconds: lifecycle.expiry_grace_seconds,
            stale_pending_seconds: lifecycle.stale_pending_seconds,
            payout_timeout: lifecycle.payout_timeout(),
            receivable_timeout: lifecycle.receivable_timeout(),
            notify_url: gateway.notify_url.clone(),
            verify_funding: gateway.verify_funding,
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        let lifecycle = LifecycleConfig::default();
        Self {
            expiry_grace_seconds: lifecycle.expiry_grace_seconds,
            stale_pending_seconds: lifecycle.stale_pending_seconds,
            payout_timeout: lifecycle.payout_timeout(),
            receivable_timeout: lifecycle.receivable_timeout(),
            notify_url: None,
            verify_funding: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateDrop {
    pub amount_sats: u64,
    pub expiry_minutes: u64,
    pub message: Option<String>,
    pub show_in_gallery: bool,
}

#[derive(Debug, Clone)]
pub struct CreatedDrop {
    pub id: DropId,
    pub payment_request: String,
    pub payment_hash: String,
    pub expiry: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewOutcome {
    pub view_count: u32,
    pub challenge_required: bool,
}

#[derive(Debug, Clone)]
pub struct Payout {
    pub drop: Drop,
    pub payment_hash: String,
}

/// Parsed gateway completion notification.
#[derive(Debug, Clone, Default)]
pub struct FundingNotification {
    pub memo: Option<String>,
    pub payment_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingOutcome {
    Activated(DropId),
    AlreadyProcessed { id: DropId, status: DropStatus },
    UnknownDrop(DropId),
    /// Memo carried no drop id we issued.
    Unmatched,
    /// Gateway could not vouch for the payment.
    Ignored(&'static str),
}

impl FundingOutcome {
    pub fn drop_id(&self) -> Option<&DropId> {
        match self {
            Self::Activated(id) | Self::UnknownDrop(id) => Some(id),
            Self::AlreadyProcessed { id, .. } => Some(id),
            Self::Unmatched | Self::Ignored(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub deleted: usize,
    pub failed: usize,
}

pub struct DropEngine {
    store: Arc<dyn DropStore>,
    gateway: Arc<dyn PaymentGateway>,
    verifier: Arc<dyn HumanityVerifier>,
    clock: Arc<dyn Clock>,
    throttle: ViewThrottle,
    settings: LifecycleSettings,
    locks: LockTable,
    reconciliation: ReconciliationLog,
}

impl DropEngine {
    pub fn new(
        store: Arc<dyn DropStore>,
        gateway: Arc<dyn PaymentGateway>,
        verifier: Arc<dyn HumanityVerifier>,
        clock: Arc<dyn Clock>,
        throttle: ViewThrottle,
        settings: LifecycleSettings,
    ) -> Self {
        assert!(
            settings.expiry_grace_seconds >= 0,
            "Expiry grace cannot be negative"
        );
        assert!(
            settings.stale_pending_seconds > 0,
            "Stale pending window must be positive"
        );
        Self {
            store,
            gateway,
            verifier,
            clock,
            throttle,
            settings,
            locks: LockTable::new(),
            reconciliation: ReconciliationLog::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DropStore> {
        &self.store
    }

    pub fn reconciliation(&self) -> &ReconciliationLog {
        &self.reconciliation
    }

    pub async fn create(&self, request: CreateDrop) -> DropResult<CreatedDrop> {
        if request.amount_sats < MIN_AMOUNT_SATS {
            return Err(DropError::validation("Amount must be at least 1 sat"));
        }
        if request.amount_sats > MAX_AMOUNT_SATS {
            return Err(DropError::validation("Maximum amount is 1,000,000 sats"));
        }
        if request.expiry_minutes < 1 {
            return Err(DropError::validation("Invalid expiry time"));
        }

        let now = self.clock.now();
        let expiry = i64::try_from(request.expiry_minutes)
            .ok()
            .and_then(|minutes| minutes.checked_mul(60))
            .and_then(|seconds| now.checked_add(seconds))
            .ok_or_else(|| DropError::validation("Invalid expiry time"))?;

        let id = DropId::generate();
        let amount_msat = request.amount_sats * MSAT_PER_SAT;
        let memo = funding_memo(request.amount_sats, &id);

        let receivable = with_gateway_timeout(
            self.settings.receivable_timeout,
            self.gateway.create_receivable(
                amount_msat,
                &memo,
                self.settings.notify_url.as_deref(),
            ),
        )
        .await
        .map_err(|err| {
            warn!(drop_id = %id, "Receivable creation failed: {err}");
            err
        })?;

        let drop = Drop {
            id: id.clone(),
            status: DropStatus::Pending,
            amount_msat,
            expiry,
            message: sanitize_message(request.message.as_deref()),
            show_in_gallery: request.show_in_gallery,
            created_at: now,
            claimed_at: None,
            view_count: 0,
            last_view_reset: now,
        };
        self.store.put(&drop).await?;
        info!(drop_id = %id, amount_msat, expiry, "Drop created");

        Ok(CreatedDrop {
            id,
            payment_request: receivable.payment_request,
            payment_hash: receivable.payment_hash,
            expiry,
        })
    }

    pub async fn view(&self, raw_id: &str) -> DropResult<DropView> {
        let id = DropId::parse(raw_id)?;
        let drop = self.load(&id).await?;
        Ok(DropView::from_drop(&drop, self.clock.now()))
    }

    /// Idempotent `pending -> live`. Unknown ids and drops past `pending`
    /// are acknowledged without change.
    pub async fn confirm_funding(&self, id: &DropId) -> DropResult<FundingOutcome> {
        self.confirm_funding_with_amount(id, None).await
    }

    async fn confirm_funding_with_amount(
        &self,
        id: &DropId,
        paid_msat: Option<u64>,
    ) -> DropResult<FundingOutcome> {
        let _lock = self.locks.acquire(id).await;
        let Some(drop) = self.store.get(id).await? else {
            info!(drop_id = %id, "Funding notification for unknown drop");
            return Ok(FundingOutcome::UnknownDrop(id.clone()));
        };
        if drop.status != DropStatus::Pending {
            info!(drop_id = %id, status = %drop.status, "Drop already processed");
            return Ok(FundingOutcome::AlreadyProcessed {
                id: id.clone(),
                status: drop.status,
            });
        }
        if let Some(paid) = paid_msat {
            if paid < drop.amount_msat {
                warn!(
                    drop_id = %id,
                    paid_msat = paid,
                    expected_msat = drop.amount_msat,
                    "Receivable underpaid"
                );
                return Ok(FundingOutcome::Ignored("receivable underpaid"));
            }
        }

        self.store.put(&drop.with_status(DropStatus::Live)).await?;
        info!(drop_id = %id, "Drop activated");
        Ok(FundingOutcome::Activated(id.clone()))
    }

    /// Correlate a gateway notification back to its drop and confirm it.
    pub async fn handle_funding_notification(
        &self,
        notification: FundingNotification,
    ) -> DropResult<FundingOutcome> {
        let (memo, paid_msat) = if self.settings.verify_funding {
            let Some(hash) = notification.payment_hash.filter(|hash| !hash.is_empty()) else {
                info!("Funding notification without payment hash ignored");
                return Ok(FundingOutcome::Ignored("missing payment hash"));
            };
            let status = with_gateway_timeout(
                self.settings.receivable_timeout,
                self.gateway.lookup_receivable(&hash),
            )
            .await?;
            match status {
                None => {
                    info!(payment_hash = %hash, "Funding notification for unknown receivable");
                    return Ok(FundingOutcome::Ignored("unknown receivable"));
                }
                Some(status) if !status.paid => {
                    info!(payment_hash = %hash, "Funding notification for unpaid receivable");
                    return Ok(FundingOutcome::Ignored("receivable not paid"));
                }
                Some(status) => (status.memo, status.amount_msat),
            }
        } else {
            (notification.memo.unwrap_or_default(), None)
        };

        let Some(id) = drop_id_from_memo(&memo) else {
            info!("Funding notification without drop id in memo: {memo}");
            return Ok(FundingOutcome::Unmatched);
        };
        self.confirm_funding_with_amount(&id, paid_msat).await
    }

    /// View accounting. Deliberately not serialized with claims.
    pub async fn record_view(&self, raw_id: &str) -> DropResult<ViewOutcome> {
        let id = DropId::parse(raw_id)?;
        let drop = self.load(&id).await?;
        let now = self.clock.now();
        let window = self.throttle.next_window(&drop, now);
        self.store
            .update_view_counters(&id, window.view_count, window.last_view_reset)
            .await?;

        let challenge_required = self.throttle.is_burst(window, now);
        if challenge_required {
            debug!(drop_id = %id, views = window.view_count, "Drop under burst load");
        }
        Ok(ViewOutcome {
            view_count: window.view_count,
            challenge_required,
        })
    }

    pub async fn claim(
        &self,
        raw_id: &str,
        raw_payment_request: &str,
        proof_of_humanity: Option<&str>,
    ) -> DropResult<Payout> {
        let id = DropId::parse(raw_id)?;
        let payment_request = parse_payment_request(raw_payment_request)?;

        let _lock = self.locks.acquire(&id).await;
        self.ensure_not_held(&id)?;
        let drop = self.load(&id).await?;
        if drop.status != DropStatus::Live {
            return Err(DropError::InvalidState {
                status: drop.status,
            });
        }

        let now = self.clock.now();
        if drop.is_past_expiry(now) {
            match self.store.put(&drop.with_status(DropStatus::Expired)).await {
                Ok(()) => info!(drop_id = %id, "Drop expired on claim attempt"),
                Err(err) => warn!(drop_id = %id, "Failed to record expiry: {err}"),
            }
            return Err(DropError::Expired);
        }

        self.check_humanity(&drop, now, proof_of_humanity).await?;

        let payment = self
            .pay_out(&drop, &payment_request, PayoutKind::Claim)
            .await?;
        let claimed = Drop {
            status: DropStatus::Claimed,
            claimed_at: Some(self.clock.now()),
            ..drop
        };
        self.commit_payout(&claimed, &payment_request, &payment, PayoutKind::Claim)
            .await?;

        info!(drop_id = %id, amount_msat = claimed.amount_msat, "Drop claimed");
        Ok(Payout {
            drop: claimed,
            payment_hash: payment.payment_hash,
        })
    }

    pub async fn refund(&self, raw_id: &str, raw_payment_request: &str) -> DropResult<Payout> {
        let id = DropId::parse(raw_id)?;
        let payment_request = parse_payment_request(raw_payment_request)?;

        let _lock = self.locks.acquire(&id).await;
        self.ensure_not_held(&id)?;
        let drop = self.load(&id).await?;
        let now = self.clock.now();
        match drop.status {
            DropStatus::Claimed => return Err(DropError::AlreadyClaimed),
            DropStatus::Returned => return Err(DropError::AlreadyReturned),
            DropStatus::Pending => return Err(DropError::NotFunded),
            DropStatus::Live if !drop.is_past_expiry(now) => {
                return Err(DropError::NotYetExpired);
            }
            DropStatus::Live | DropStatus::Expired => {}
        }

        let payment = self
            .pay_out(&drop, &payment_request, PayoutKind::Refund)
            .await?;
        let returned = drop.with_status(DropStatus::Returned);
        self.commit_payout(&returned, &payment_request, &payment, PayoutKind::Refund)
            .await?;

        info!(drop_id = %id, amount_msat = returned.amount_msat, "Drop refunded");
        Ok(Payout {
            drop: returned,
            payment_hash: payment.payment_hash,
        })
    }

    /// Expire live drops past `expiry + grace` and delete pending drops that
    /// were never funded. Per-drop failures are counted, not propagated.
    pub async fn sweep_expired(&self) -> DropResult<SweepReport> {
        let mut report = SweepReport::default();
        let now = self.clock.now();

        for candidate in self.store.list_by_status(DropStatus::Live).await? {
            if !self.is_stale_live(&candidate, now) {
                continue;
            }
            match self.expire_stale(&candidate.id, now).await {
                Ok(true) => report.expired += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(drop_id = %candidate.id, "Failed to expire drop: {err}");
                    report.failed += 1;
                }
            }
        }

        for candidate in self.store.list_by_status(DropStatus::Pending).await? {
            if !self.is_abandoned(&candidate, now) {
                continue;
            }
            match self.delete_abandoned(&candidate.id, now).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(drop_id = %candidate.id, "Failed to delete stale drop: {err}");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Finished, opted-in drops, most recent first.
    pub async fn list_gallery(&self, limit: usize) -> DropResult<Vec<Drop>> {
        let mut drops = self.store.list_by_status(DropStatus::Claimed).await?;
        drops.extend(self.store.list_by_status(DropStatus::Returned).await?);
        drops.retain(|drop| drop.show_in_gallery && drop.status.is_terminal());
        drops.sort_by_key(|drop| Reverse(drop.finished_at()));
        drops.truncate(limit);
        Ok(drops)
    }

    fn is_stale_live(&self, drop: &Drop, now: i64) -> bool {
        drop.status == DropStatus::Live
            && drop.expiry.saturating_add(self.settings.expiry_grace_seconds) < now
    }

    fn is_abandoned(&self, drop: &Drop, now: i64) -> bool {
        drop.status == DropStatus::Pending
            && drop.created_at.saturating_add(self.settings.stale_pending_seconds) < now
    }

    async fn expire_stale(&self, id: &DropId, now: i64) -> DropResult<bool> {
        let _lock = self.locks.acquire(id).await;
        if self.reconciliation.is_held(id) {
            return Ok(false);
        }
        let Some(drop) = self.store.get(id).await? else {
            return Ok(false);
        };
        if !self.is_stale_live(&drop, now) {
            return Ok(false);
        }
        self.store.put(&drop.with_status(DropStatus::Expired)).await?;
        info!(drop_id = %id, "Marked drop as expired");
        Ok(true)
    }

    async fn delete_abandoned(&self, id: &DropId, now: i64) -> DropResult<bool> {
        let _lock = self.locks.acquire(id).await;
        let Some(drop) = self.store.get(id).await? else {
            return Ok(false);
        };
        if !self.is_abandoned(&drop, now) {
            return Ok(false);
        }
        self.store.delete(id).await?;
        info!(drop_id = %id, "Deleted stale pending drop");
        Ok(true)
    }

    async fn load(&self, id: &DropId) -> DropResult<Drop> {
        self.store.get(id).await?.ok_or(DropError::NotFound)
    }

    fn ensure_not_held(&self, id: &DropId) -> DropResult<()> {
        if self.reconciliation.is_held(id) {
            return Err(DropError::ReconciliationPending {
                drop_id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn check_humanity(&self, drop: &Drop, now: i64, proof: Option<&str>) -> DropResult<()> {
        let required = self.throttle.is_under_burst(drop, now);
        match proof.map(str::trim).filter(|token| !token.is_empty()) {
            None if required => Err(DropError::ChallengeRequired),
            None => Ok(()),
            Some(token) => {
                if self.verifier.verify(token).await {
                    Ok(())
                } else {
                    Err(DropError::ChallengeFailed)
                }
            }
        }
    }

    async fn pay_out(
        &self,
        drop: &Drop,
        payment_request: &str,
        kind: PayoutKind,
    ) -> DropResult<Payment> {
        let (reason, detail) = match tokio::time::timeout(
            self.settings.payout_timeout,
            self.gateway.pay(payment_request),
        )
        .await
        {
            Ok(Ok(payment)) => return Ok(payment),
            Ok(Err(GatewayError::Indeterminate(detail))) => {
                (ReconciliationReason::PayoutIndeterminate, detail)
            }
            Ok(Err(err)) => {
                warn!(drop_id = %drop.id, ?kind, "Payout rejected: {err}");
                return Err(DropError::from(err));
            }
            Err(_) => (
                ReconciliationReason::PayoutTimedOut,
                format!(
                    "no gateway answer within {}ms",
                    self.settings.payout_timeout.as_millis()
                ),
            ),
        };
        self.place_hold(
            &drop.id,
            ReconciliationEntry {
                drop_id: drop.id.to_string(),
                kind,
                reason,
                payment_request: payment_request.to_string(),
                payment_hash: None,
                detail,
                recorded_at: self.clock.now(),
            },
        )
        .await;
        Err(DropError::GatewayTimeout)
    }

    async fn commit_payout(
        &self,
        next: &Drop,
        payment_request: &str,
        payment: &Payment,
        kind: PayoutKind,
    ) -> DropResult<()> {
        if let Err(err) = self.store.put(next).await {
            self.place_hold(
                &next.id,
                ReconciliationEntry {
                    drop_id: next.id.to_string(),
                    kind,
                    reason: ReconciliationReason::SettledButNotPersisted,
                    payment_request: payment_request.to_string(),
                    payment_hash: Some(payment.payment_hash.clone()),
                    detail: err.to_string(),
                    recorded_at: self.clock.now(),
                },
            )
            .await;
            return Err(DropError::SettledButNotPersisted {
                drop_id: next.id.to_string(),
            });
        }
        Ok(())
    }

    /// Holds take effect in memory first; the stored copy only matters
    /// across restarts, so a failed write is logged and not surfaced.
    async fn place_hold(&self, id: &DropId, entry: ReconciliationEntry) {
        self.reconciliation.record(id, entry.clone());
        if let Err(err) = self.store.save_hold(&entry).await {
            error!(drop_id = %id, "Failed to persist reconciliation hold: {err}");
        }
    }

    /// Operator release of a hold. The stored copy goes first so a failed
    /// delete keeps the drop held.
    pub async fn release_hold(&self, id: &DropId) -> DropResult<Option<ReconciliationEntry>> {
        if !self.reconciliation.is_held(id) {
            return Ok(None);
        }
        self.store.delete_hold(id).await?;
        Ok(self.reconciliation.resolve(id))
    }

    /// Reloads holds written before the last restart.
    pub async fn restore_holds(&self) -> DropResult<usize> {
        let entries = self.store.list_holds().await?;
        let mut restored = 0;
        for entry in entries {
            match DropId::parse(&entry.drop_id) {
                Ok(id) => {
                    self.reconciliation.restore(&id, entry);
                    restored += 1;
                }
                Err(err) => warn!(drop_id = %entry.drop_id, "Skipping unreadable hold: {err}"),
            }
        }
        Ok(restored)
    }
}

fn parse_payment_request(raw: &str) -> DropResult<String> {
    normalize_payment_request(raw).ok_or_else(|| DropError::validation("Invalid invoice"))
}

async fn with_gateway_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, GatewayError>>,
) -> DropResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(DropError::from),
        Err(_) => Err(DropError::GatewayTimeout),
    }
}

#[cfg(test)]
mod tests;
