use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::clock::ManualClock;
use crate::gateway::{FakeLnbits, FakePayReply, LnbitsGateway, MockGateway};
use crate::store::MemoryDropStore;

const T0: i64 = 1_700_000_000;
const INVOICE: &str = "lnbc10n1pjqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqq";
const REFUND_INVOICE: &str = "lnbc10n1pjrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrr";

/// Accepts exactly one token.
struct TokenVerifier(&'static str);

#[async_trait]
impl HumanityVerifier for TokenVerifier {
    async fn verify(&self, token: &str) -> bool {
        token == self.0
    }
}

struct Harness {
    engine: Arc<DropEngine>,
    store: Arc<MemoryDropStore>,
    gateway: Arc<MockGateway>,
    clock: Arc<ManualClock>,
}

fn harness_with(settings: LifecycleSettings) -> Harness {
    let store = Arc::new(MemoryDropStore::new());
    let gateway = Arc::new(MockGateway::new());
    let clock = Arc::new(ManualClock::new(T0));
    let engine = DropEngine::new(
        store.clone(),
        gateway.clone(),
        Arc::new(TokenVerifier("human")),
        clock.clone(),
        ViewThrottle::default(),
        settings,
    );
    Harness {
        engine: Arc::new(engine),
        store,
        gateway,
        clock,
    }
}

fn harness() -> Harness {
    harness_with(LifecycleSettings::default())
}

fn request(amount_sats: u64, expiry_minutes: u64) -> CreateDrop {
    CreateDrop {
        amount_sats,
        expiry_minutes,
        message: Some("gm".to_string()),
        show_in_gallery: true,
    }
}

fn drop_with(status: DropStatus, expiry: i64) -> Drop {
    Drop {
        id: DropId::generate(),
        status,
        amount_msat: 21_000,
        expiry,
        message: None,
        show_in_gallery: false,
        created_at: T0,
        claimed_at: None,
        view_count: 0,
        last_view_reset: T0,
    }
}

async fn seed(h: &Harness, drop: &Drop) {
    h.store.put(drop).await.unwrap();
}

async fn status_of(h: &Harness, id: &DropId) -> Option<DropStatus> {
    h.store.get(id).await.unwrap().map(|drop| drop.status)
}

async fn live_drop(h: &Harness, amount_sats: u64, expiry_minutes: u64) -> DropId {
    let created = h.engine.create(request(amount_sats, expiry_minutes)).await.unwrap();
    h.engine.confirm_funding(&created.id).await.unwrap();
    created.id
}

#[tokio::test]
async fn create_records_pending_drop() {
    let h = harness();
    for amount in [1, 1_000, 1_000_000] {
        let created = h.engine.create(request(amount, 60)).await.unwrap();
        assert!(crate::drop_id::is_well_formed(created.id.as_str()));
        assert!(created.payment_request.starts_with("lnbc"));
        assert_eq!(created.expiry, T0 + 3_600);

        let drop = h.store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(drop.status, DropStatus::Pending);
        assert_eq!(drop.amount_msat, amount * 1_000);
        assert_eq!(drop.view_count, 0);
        assert_eq!(drop.last_view_reset, T0);
        assert_eq!(drop.message.as_deref(), Some("gm"));
    }
}

#[tokio::test]
async fn create_rejects_out_of_range_input() {
    let h = harness();
    for (amount, minutes) in [(0, 60), (1_000_001, 60), (100, 0), (100, u64::MAX)] {
        let err = h.engine.create(request(amount, minutes)).await.unwrap_err();
        assert_eq!(err.code(), "validation_error", "{amount} sats, {minutes} min");
    }
    assert!(h.store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn gateway_failure_on_create_writes_nothing() {
    let h = harness();
    h.gateway.fail_receivables(true);
    let err = h.engine.create(request(100, 60)).await.unwrap_err();
    assert!(matches!(err, DropError::Gateway(_)));
    assert!(h.store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn receivable_timeout_writes_nothing() {
    let h = harness_with(LifecycleSettings {
        receivable_timeout: Duration::from_millis(50),
        ..LifecycleSettings::default()
    });
    h.gateway.set_receivable_delay(Duration::from_millis(500));
    let err = h.engine.create(request(100, 60)).await.unwrap_err();
    assert!(matches!(err, DropError::GatewayTimeout));
    assert!(h.store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn confirm_funding_is_idempotent() {
    let h = harness();
    let created = h.engine.create(request(100, 60)).await.unwrap();

    let first = h.engine.confirm_funding(&created.id).await.unwrap();
    assert_eq!(first, FundingOutcome::Activated(created.id.clone()));
    let second = h.engine.confirm_funding(&created.id).await.unwrap();
    assert_eq!(
        second,
        FundingOutcome::AlreadyProcessed {
            id: created.id.clone(),
            status: DropStatus::Live
        }
    );
    assert_eq!(status_of(&h, &created.id).await, Some(DropStatus::Live));

    let unknown = DropId::generate();
    assert_eq!(
        h.engine.confirm_funding(&unknown).await.unwrap(),
        FundingOutcome::UnknownDrop(unknown.clone())
    );
    assert!(h.store.get(&unknown).await.unwrap().is_none());
}

#[tokio::test]
async fn confirm_funding_leaves_claimed_drop_alone() {
    let h = harness();
    let drop = drop_with(DropStatus::Claimed, T0 + 60);
    seed(&h, &drop).await;
    let outcome = h.engine.confirm_funding(&drop.id).await.unwrap();
    assert!(matches!(outcome, FundingOutcome::AlreadyProcessed { .. }));
    assert_eq!(status_of(&h, &drop.id).await, Some(DropStatus::Claimed));
}

#[tokio::test]
async fn create_fund_claim_pays_once() {
    let h = harness();
    let id = live_drop(&h, 1_000, 60).await;

    let payout = h.engine.claim(id.as_str(), INVOICE, None).await.unwrap();
    assert_eq!(payout.drop.status, DropStatus::Claimed);
    assert_eq!(payout.drop.claimed_at, Some(T0));
    assert_eq!(h.gateway.payouts(), vec![INVOICE.to_string()]);

    let again = h.engine.claim(id.as_str(), INVOICE, None).await.unwrap_err();
    assert!(matches!(
        again,
        DropError::InvalidState {
            status: DropStatus::Claimed
        }
    ));
    assert_eq!(h.gateway.payout_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_pay_exactly_once() {
    let h = harness();
    h.gateway.set_pay_delay(Duration::from_millis(50));
    let id = live_drop(&h, 21, 60).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = Arc::clone(&h.engine);
        let id = id.to_string();
        handles.push(tokio::spawn(async move {
            engine.claim(&id, INVOICE, None).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(DropError::InvalidState { status }) => assert_eq!(status, DropStatus::Claimed),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(h.gateway.payout_count(), 1);
    assert_eq!(status_of(&h, &id).await, Some(DropStatus::Claimed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn claim_and_refund_race_pays_once() {
    let h = harness();
    h.gateway.set_pay_delay(Duration::from_millis(20));
    let drop = drop_with(DropStatus::Expired, T0 - 10);
    seed(&h, &drop).await;

    let mut handles = Vec::new();
    for attempt in 0..8 {
        let engine = Arc::clone(&h.engine);
        let id = drop.id.to_string();
        handles.push(tokio::spawn(async move {
            if attempt % 2 == 0 {
                engine.refund(&id, REFUND_INVOICE).await
            } else {
                engine.claim(&id, INVOICE, None).await
            }
        }));
    }
    let succeeded = count_successes(handles).await;
    assert_eq!(succeeded, 1);
    assert_eq!(h.gateway.payouts(), vec![REFUND_INVOICE.to_string()]);
}

async fn count_successes(
    handles: Vec<tokio::task::JoinHandle<DropResult<Payout>>>,
) -> usize {
    let mut ok = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    ok
}

#[tokio::test]
async fn claim_respects_expiry_boundary() {
    let h = harness();
    let stale = drop_with(DropStatus::Live, T0 - 1);
    let fresh = drop_with(DropStatus::Live, T0 + 1);
    let exact = drop_with(DropStatus::Live, T0);
    for drop in [&stale, &fresh, &exact] {
        seed(&h, drop).await;
    }

    let err = h.engine.claim(stale.id.as_str(), INVOICE, None).await.unwrap_err();
    assert!(matches!(err, DropError::Expired));
    assert_eq!(status_of(&h, &stale.id).await, Some(DropStatus::Expired));

    h.engine.claim(fresh.id.as_str(), INVOICE, None).await.unwrap();
    h.engine.claim(exact.id.as_str(), INVOICE, None).await.unwrap();
    assert_eq!(h.gateway.payout_count(), 2);
}

#[tokio::test]
async fn claim_validates_before_touching_state() {
    let h = harness();
    let id = live_drop(&h, 10, 60).await;

    let err = h.engine.claim("short", INVOICE, None).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");
    let err = h.engine.claim(id.as_str(), "not an invoice", None).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");
    let err = h
        .engine
        .claim(DropId::generate().as_str(), INVOICE, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DropError::NotFound));

    assert_eq!(status_of(&h, &id).await, Some(DropStatus::Live));
    assert_eq!(h.gateway.payout_count(), 0);
}

#[tokio::test]
async fn pending_drop_is_not_claimable() {
    let h = harness();
    let created = h.engine.create(request(10, 60)).await.unwrap();
    let err = h
        .engine
        .claim(created.id.as_str(), INVOICE, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DropError::InvalidState {
            status: DropStatus::Pending
        }
    ));
}

#[tokio::test]
async fn refund_covers_every_status() {
    let h = harness();
    let cases = [
        (drop_with(DropStatus::Claimed, T0 - 10), Some("already_claimed")),
        (drop_with(DropStatus::Returned, T0 - 10), Some("already_returned")),
        (drop_with(DropStatus::Pending, T0 - 10), Some("not_funded")),
        (drop_with(DropStatus::Live, T0 + 10), Some("not_yet_expired")),
        (drop_with(DropStatus::Live, T0 - 10), None),
        (drop_with(DropStatus::Expired, T0 - 10), None),
    ];
    for (drop, _) in &cases {
        seed(&h, drop).await;
    }

    for (drop, expected) in &cases {
        let result = h.engine.refund(drop.id.as_str(), REFUND_INVOICE).await;
        match expected {
            Some(code) => assert_eq!(result.unwrap_err().code(), *code),
            None => assert_eq!(result.unwrap().drop.status, DropStatus::Returned),
        }
    }
    assert_eq!(h.gateway.payout_count(), 2);
}

#[tokio::test]
async fn expired_drop_is_swept_and_refunded() {
    let h = harness();
    let id = live_drop(&h, 500, 1).await;

    h.clock.advance(60 + 300 + 1);
    let report = h.engine.sweep_expired().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(status_of(&h, &id).await, Some(DropStatus::Expired));

    let payout = h.engine.refund(id.as_str(), REFUND_INVOICE).await.unwrap();
    assert_eq!(payout.drop.status, DropStatus::Returned);
    assert_eq!(payout.drop.amount_msat, 500_000);

    let err = h.engine.refund(id.as_str(), REFUND_INVOICE).await.unwrap_err();
    assert!(matches!(err, DropError::AlreadyReturned));
    assert_eq!(h.gateway.payout_count(), 1);
}

#[tokio::test]
async fn sweep_honours_grace_window() {
    let h = harness();
    let id = live_drop(&h, 500, 1).await;

    h.clock.advance(60 + 300);
    let report = h.engine.sweep_expired().await.unwrap();
    assert_eq!(report, SweepReport::default());
    assert_eq!(status_of(&h, &id).await, Some(DropStatus::Live));
}

#[tokio::test]
async fn sweep_deletes_abandoned_pending_drops() {
    let h = harness();
    let abandoned = h.engine.create(request(10, 600)).await.unwrap();
    h.clock.advance(3_000);
    let recent = h.engine.create(request(10, 600)).await.unwrap();
    h.clock.advance(601);

    let report = h.engine.sweep_expired().await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.failed, 0);
    assert!(h.store.get(&abandoned.id).await.unwrap().is_none());
    assert_eq!(status_of(&h, &recent.id).await, Some(DropStatus::Pending));
}

#[tokio::test]
async fn sweep_counts_failures_and_continues() {
    let h = harness();
    live_drop(&h, 10, 1).await;
    live_drop(&h, 10, 1).await;
    h.clock.advance(3_601 + 60);
    h.store.fail_writes(true);

    let report = h.engine.sweep_expired().await.unwrap();
    assert_eq!(report.failed, 2);
    assert_eq!(report.expired, 0);
}

#[tokio::test]
async fn gallery_lists_finished_opted_in_drops() {
    let h = harness();
    let mut claimed = drop_with(DropStatus::Claimed, T0);
    claimed.show_in_gallery = true;
    claimed.claimed_at = Some(T0 + 50);
    let mut returned = drop_with(DropStatus::Returned, T0);
    returned.show_in_gallery = true;
    returned.created_at = T0 + 10;
    let mut hidden = drop_with(DropStatus::Claimed, T0);
    hidden.claimed_at = Some(T0 + 99);
    let mut live = drop_with(DropStatus::Live, T0 + 60);
    live.show_in_gallery = true;
    for drop in [&claimed, &returned, &hidden, &live] {
        seed(&h, drop).await;
    }

    let gallery = h.engine.list_gallery(50).await.unwrap();
    let ids: Vec<_> = gallery.iter().map(|drop| drop.id.clone()).collect();
    assert_eq!(ids, vec![claimed.id.clone(), returned.id.clone()]);

    assert_eq!(h.engine.list_gallery(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn burst_requires_proof_of_humanity() {
    let h = harness();
    let id = live_drop(&h, 10, 60).await;

    for expected in 1..=10 {
        let outcome = h.engine.record_view(id.as_str()).await.unwrap();
        assert_eq!(outcome.view_count, expected);
        assert!(!outcome.challenge_required);
    }
    let outcome = h.engine.record_view(id.as_str()).await.unwrap();
    assert_eq!(outcome.view_count, 11);
    assert!(outcome.challenge_required);

    let err = h.engine.claim(id.as_str(), INVOICE, None).await.unwrap_err();
    assert!(matches!(err, DropError::ChallengeRequired));
    let err = h
        .engine
        .claim(id.as_str(), INVOICE, Some("robot"))
        .await
        .unwrap_err();
    assert!(matches!(err, DropError::ChallengeFailed));
    assert_eq!(h.gateway.payout_count(), 0);

    h.engine
        .claim(id.as_str(), INVOICE, Some("human"))
        .await
        .unwrap();
    assert_eq!(h.gateway.payout_count(), 1);
}

#[tokio::test]
async fn burst_subsides_after_window() {
    let h = harness();
    let id = live_drop(&h, 10, 60).await;
    for _ in 0..11 {
        h.engine.record_view(id.as_str()).await.unwrap();
    }
    h.clock.advance(61);
    h.engine.claim(id.as_str(), INVOICE, None).await.unwrap();
}

#[tokio::test]
async fn supplied_proof_is_checked_without_burst() {
    let h = harness();
    let id = live_drop(&h, 10, 60).await;
    let err = h
        .engine
        .claim(id.as_str(), INVOICE, Some("robot"))
        .await
        .unwrap_err();
    assert!(matches!(err, DropError::ChallengeFailed));
}

#[tokio::test]
async fn views_never_clobber_status() {
    let h = harness();
    let id = live_drop(&h, 10, 60).await;
    h.engine.claim(id.as_str(), INVOICE, None).await.unwrap();
    h.engine.record_view(id.as_str()).await.unwrap();
    assert_eq!(status_of(&h, &id).await, Some(DropStatus::Claimed));

    let err = h.engine.record_view(DropId::generate().as_str()).await.unwrap_err();
    assert!(matches!(err, DropError::NotFound));
}

#[tokio::test]
async fn settled_payout_without_commit_holds_the_drop() {
    let h = harness();
    let id = live_drop(&h, 10, 60).await;
    h.store.fail_writes(true);

    let err = h.engine.claim(id.as_str(), INVOICE, None).await.unwrap_err();
    assert!(matches!(err, DropError::SettledButNotPersisted { .. }));
    assert!(!err.is_retryable());
    assert_eq!(h.gateway.payout_count(), 1);

    let entry = h.engine.reconciliation().get(&id).expect("hold recorded");
    assert_eq!(entry.reason, ReconciliationReason::SettledButNotPersisted);
    assert_eq!(entry.kind, PayoutKind::Claim);
    assert!(entry.payment_hash.is_some());

    h.store.fail_writes(false);
    let err = h.engine.claim(id.as_str(), INVOICE, None).await.unwrap_err();
    assert!(matches!(err, DropError::ReconciliationPending { .. }));
    let err = h.engine.refund(id.as_str(), REFUND_INVOICE).await.unwrap_err();
    assert!(matches!(err, DropError::ReconciliationPending { .. }));
    assert_eq!(h.gateway.payout_count(), 1);
}

#[tokio::test]
async fn payout_timeout_places_hold() {
    let h = harness_with(LifecycleSettings {
        payout_timeout: Duration::from_millis(50),
        ..LifecycleSettings::default()
    });
    h.gateway.set_pay_delay(Duration::from_millis(500));
    let id = live_drop(&h, 10, 60).await;

    let err = h.engine.claim(id.as_str(), INVOICE, None).await.unwrap_err();
    assert!(matches!(err, DropError::GatewayTimeout));
    assert_eq!(status_of(&h, &id).await, Some(DropStatus::Live));

    let entry = h.engine.reconciliation().get(&id).expect("hold recorded");
    assert_eq!(entry.reason, ReconciliationReason::PayoutTimedOut);
    assert!(entry.payment_hash.is_none());

    h.gateway.set_pay_delay(Duration::ZERO);
    let err = h.engine.claim(id.as_str(), INVOICE, None).await.unwrap_err();
    assert!(matches!(err, DropError::ReconciliationPending { .. }));

    h.engine.reconciliation().resolve(&id);
    h.engine.claim(id.as_str(), INVOICE, None).await.unwrap();
}

#[tokio::test]
async fn rejected_payout_leaves_drop_claimable() {
    let h = harness();
    let id = live_drop(&h, 10, 60).await;
    h.gateway.fail_payouts(true);

    let err = h.engine.claim(id.as_str(), INVOICE, None).await.unwrap_err();
    assert!(matches!(err, DropError::Gateway(_)));
    assert!(err.is_retryable());
    assert_eq!(status_of(&h, &id).await, Some(DropStatus::Live));
    assert!(!h.engine.reconciliation().is_held(&id));

    h.gateway.fail_payouts(false);
    h.engine.claim(id.as_str(), INVOICE, None).await.unwrap();
}

#[tokio::test]
async fn sweep_skips_held_drops() {
    let h = harness_with(LifecycleSettings {
        payout_timeout: Duration::from_millis(50),
        ..LifecycleSettings::default()
    });
    h.gateway.set_pay_delay(Duration::from_millis(500));
    let id = live_drop(&h, 10, 1).await;
    assert!(h.engine.claim(id.as_str(), INVOICE, None).await.is_err());

    h.clock.advance(3_600);
    let report = h.engine.sweep_expired().await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(status_of(&h, &id).await, Some(DropStatus::Live));
}

#[tokio::test]
async fn verified_notification_activates_drop() {
    let h = harness();
    let created = h.engine.create(request(42, 60)).await.unwrap();

    let outcome = h
        .engine
        .handle_funding_notification(FundingNotification {
            memo: Some("forged".to_string()),
            payment_hash: Some(created.payment_hash.clone()),
        })
        .await
        .unwrap();
    assert_eq!(outcome, FundingOutcome::Activated(created.id.clone()));
    assert_eq!(status_of(&h, &created.id).await, Some(DropStatus::Live));
}

#[tokio::test]
async fn unverifiable_notifications_are_ignored() {
    let h = harness();
    let created = h.engine.create(request(42, 60)).await.unwrap();
    let memo = Some(funding_memo(42, &created.id));

    let missing_hash = h
        .engine
        .handle_funding_notification(FundingNotification {
            memo: memo.clone(),
            payment_hash: None,
        })
        .await
        .unwrap();
    assert!(matches!(missing_hash, FundingOutcome::Ignored(_)));

    let unknown_hash = h
        .engine
        .handle_funding_notification(FundingNotification {
            memo: memo.clone(),
            payment_hash: Some("00".repeat(32)),
        })
        .await
        .unwrap();
    assert!(matches!(unknown_hash, FundingOutcome::Ignored(_)));

    h.gateway.mark_unpaid(&created.payment_hash);
    let unpaid = h
        .engine
        .handle_funding_notification(FundingNotification {
            memo,
            payment_hash: Some(created.payment_hash.clone()),
        })
        .await
        .unwrap();
    assert!(matches!(unpaid, FundingOutcome::Ignored(_)));
    assert_eq!(status_of(&h, &created.id).await, Some(DropStatus::Pending));
}

#[tokio::test]
async fn underpaid_receivable_leaves_drop_pending() {
    let h = harness();
    let created = h.engine.create(request(42, 60)).await.unwrap();
    h.gateway.set_paid_amount(&created.payment_hash, 41_999);

    let notification = FundingNotification {
        memo: Some(funding_memo(42, &created.id)),
        payment_hash: Some(created.payment_hash.clone()),
    };
    let outcome = h
        .engine
        .handle_funding_notification(notification.clone())
        .await
        .unwrap();
    assert_eq!(outcome, FundingOutcome::Ignored("receivable underpaid"));
    assert_eq!(status_of(&h, &created.id).await, Some(DropStatus::Pending));

    h.gateway.set_paid_amount(&created.payment_hash, 42_000);
    let outcome = h
        .engine
        .handle_funding_notification(notification)
        .await
        .unwrap();
    assert_eq!(outcome, FundingOutcome::Activated(created.id.clone()));
}

#[tokio::test]
async fn memo_only_notifications_when_verification_disabled() {
    let h = harness_with(LifecycleSettings {
        verify_funding: false,
        ..LifecycleSettings::default()
    });
    let created = h.engine.create(request(42, 60)).await.unwrap();

    let unmatched = h
        .engine
        .handle_funding_notification(FundingNotification {
            memo: Some("coffee".to_string()),
            payment_hash: None,
        })
        .await
        .unwrap();
    assert_eq!(unmatched, FundingOutcome::Unmatched);
    assert!(unmatched.drop_id().is_none());

    let outcome = h
        .engine
        .handle_funding_notification(FundingNotification {
            memo: Some(funding_memo(42, &created.id)),
            payment_hash: None,
        })
        .await
        .unwrap();
    assert_eq!(outcome.drop_id(), Some(&created.id));
    assert_eq!(status_of(&h, &created.id).await, Some(DropStatus::Live));
}

#[tokio::test]
async fn view_projection_reports_claimability() {
    let h = harness();
    let id = live_drop(&h, 10, 1).await;
    let view = h.engine.view(id.as_str()).await.unwrap();
    assert!(view.claimable);
    assert_eq!(view.seconds_remaining, 60);

    h.clock.advance(61);
    let view = h.engine.view(id.as_str()).await.unwrap();
    assert!(!view.claimable);
    assert!(view.refund_eligible);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweep_waits_for_in_flight_claim() {
    let h = harness();
    h.gateway.set_pay_delay(Duration::from_millis(300));
    let id = live_drop(&h, 10, 1).await;

    let engine = Arc::clone(&h.engine);
    let claim_id = id.to_string();
    let claim = tokio::spawn(async move { engine.claim(&claim_id, INVOICE, None).await });

    // Let the claim pass its checks and block inside the payout
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.clock.advance(60 + 300 + 1);
    let report = h.engine.sweep_expired().await.unwrap();

    assert_eq!(report.expired, 0);
    let payout = claim.await.unwrap().unwrap();
    assert_eq!(payout.drop.status, DropStatus::Claimed);
    assert_eq!(status_of(&h, &id).await, Some(DropStatus::Claimed));
    assert_eq!(h.gateway.payout_count(), 1);
}

#[tokio::test]
async fn holds_survive_engine_restart() {
    let h = harness_with(LifecycleSettings {
        payout_timeout: Duration::from_millis(50),
        ..LifecycleSettings::default()
    });
    h.gateway.set_pay_delay(Duration::from_millis(500));
    let id = live_drop(&h, 10, 60).await;
    assert!(h.engine.claim(id.as_str(), INVOICE, None).await.is_err());
    assert_eq!(h.store.list_holds().await.unwrap().len(), 1);

    h.gateway.set_pay_delay(Duration::ZERO);
    let restarted = DropEngine::new(
        h.store.clone(),
        h.gateway.clone(),
        Arc::new(TokenVerifier("human")),
        h.clock.clone(),
        ViewThrottle::default(),
        LifecycleSettings::default(),
    );
    assert_eq!(restarted.restore_holds().await.unwrap(), 1);
    let err = restarted.claim(id.as_str(), INVOICE, None).await.unwrap_err();
    assert!(matches!(err, DropError::ReconciliationPending { .. }));

    let released = restarted.release_hold(&id).await.unwrap().expect("held");
    assert_eq!(released.reason, ReconciliationReason::PayoutTimedOut);
    assert!(h.store.list_holds().await.unwrap().is_empty());
    assert!(restarted.release_hold(&id).await.unwrap().is_none());
    restarted.claim(id.as_str(), INVOICE, None).await.unwrap();
    assert_eq!(h.gateway.payout_count(), 1);
}

/// Engine over a real LNbits client pointed at a loopback fake.
async fn lnbits_engine(
    reply: FakePayReply,
) -> (DropEngine, Arc<MemoryDropStore>, FakeLnbits, DropId) {
    let fake = FakeLnbits::start(reply).await;
    let gateway = LnbitsGateway::new(&fake.url, "admin", Duration::from_millis(200)).unwrap();
    let store = Arc::new(MemoryDropStore::new());
    let drop = drop_with(DropStatus::Live, T0 + 3_600);
    store.put(&drop).await.unwrap();
    let engine = DropEngine::new(
        store.clone(),
        Arc::new(gateway),
        Arc::new(TokenVerifier("human")),
        Arc::new(ManualClock::new(T0)),
        ViewThrottle::default(),
        LifecycleSettings::default(),
    );
    (engine, store, fake, drop.id)
}

#[tokio::test]
async fn ambiguous_lnbits_payouts_are_never_retried() {
    for reply in [
        FakePayReply::Slow(Duration::from_secs(2)),
        FakePayReply::Garbled,
    ] {
        let (engine, store, fake, id) = lnbits_engine(reply).await;

        let err = engine.claim(id.as_str(), INVOICE, None).await.unwrap_err();
        assert!(matches!(err, DropError::GatewayTimeout), "{reply:?}: {err}");
        let entry = engine.reconciliation().get(&id).expect("hold recorded");
        assert_eq!(entry.reason, ReconciliationReason::PayoutIndeterminate);
        assert_eq!(store.list_holds().await.unwrap().len(), 1);

        let err = engine.claim(id.as_str(), INVOICE, None).await.unwrap_err();
        assert!(matches!(err, DropError::ReconciliationPending { .. }));
        let err = engine.refund(id.as_str(), REFUND_INVOICE).await.unwrap_err();
        assert!(matches!(err, DropError::ReconciliationPending { .. }));
        assert_eq!(fake.hits(), 1, "{reply:?}");
        assert_eq!(
            store.get(&id).await.unwrap().map(|drop| drop.status),
            Some(DropStatus::Live)
        );
    }
}

#[tokio::test]
async fn refused_lnbits_payout_stays_retryable() {
    let (engine, _store, fake, id) = lnbits_engine(FakePayReply::Refused(400)).await;

    let err = engine.claim(id.as_str(), INVOICE, None).await.unwrap_err();
    assert!(matches!(err, DropError::Gateway(_)));
    assert!(err.is_retryable());
    assert!(!engine.reconciliation().is_held(&id));

    assert!(engine.claim(id.as_str(), INVOICE, None).await.is_err());
    assert_eq!(fake.hits(), 2);
}
