use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::info;

use super::{GatewayError, Payment, PaymentGateway, Receivable, ReceivableStatus};
use crate::models::drop::MSAT_PER_SAT;

/// Offline gateway for local development.
///
/// Every receivable it issues reports as paid, and every `pay` call is
/// recorded so the number of payouts can be inspected.
#[derive(Debug, Default)]
pub struct MockGateway {
    receivables: Mutex<HashMap<String, ReceivableStatus>>,
    payouts: Mutex<Vec<String>>,
    pay_delay_ms: AtomicU64,
    receivable_delay_ms: AtomicU64,
    fail_receivables: AtomicBool,
    fail_payouts: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Fault and timing knobs for tests.
#[cfg(test)]
impl MockGateway {
    pub fn set_pay_delay(&self, delay: Duration) {
        self.pay_delay_ms.store(as_millis(delay), Ordering::SeqCst);
    }

    pub fn set_receivable_delay(&self, delay: Duration) {
        self.receivable_delay_ms
            .store(as_millis(delay), Ordering::SeqCst);
    }

    pub fn fail_receivables(&self, fail: bool) {
        self.fail_receivables.store(fail, Ordering::SeqCst);
    }

    pub fn fail_payouts(&self, fail: bool) {
        self.fail_payouts.store(fail, Ordering::SeqCst);
    }

    /// Payment requests paid so far, in call order.
    pub fn payouts(&self) -> Vec<String> {
        lock(&self.payouts).clone()
    }

    pub fn payout_count(&self) -> usize {
        lock(&self.payouts).len()
    }

    pub fn mark_unpaid(&self, payment_hash: &str) {
        if let Some(status) = lock(&self.receivables).get_mut(payment_hash) {
            status.paid = false;
        }
    }

    /// Overrides the amount the receivable reports as received.
    pub fn set_paid_amount(&self, payment_hash: &str, amount_msat: u64) {
        if let Some(status) = lock(&self.receivables).get_mut(payment_hash) {
            status.amount_msat = Some(amount_msat);
        }
    }
}

#[cfg(test)]
fn as_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

async fn pause(delay_ms: &AtomicU64) {
    let delay = delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn random_hash() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_receivable(
        &self,
        amount_msat: u64,
        memo: &str,
        _notify_url: Option<&str>,
    ) -> Result<Receivable, GatewayError> {
        pause(&self.receivable_delay_ms).await;
        if self.fail_receivables.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 503,
                body: "mock receivables disabled".to_string(),
            });
        }

        let payment_hash = random_hash();
        let payment_request = format!(
            "lnbc{}mock1{}",
            amount_msat / MSAT_PER_SAT,
            &payment_hash[..32]
        );
        lock(&self.receivables).insert(
            payment_hash.clone(),
            ReceivableStatus {
                paid: true,
                memo: memo.to_string(),
                amount_msat: Some(amount_msat),
            },
        );
        info!("[mock] created invoice for {amount_msat} msat: {memo}");

        Ok(Receivable {
            payment_request,
            payment_hash,
        })
    }

    async fn pay(&self, payment_request: &str) -> Result<Payment, GatewayError> {
        pause(&self.pay_delay_ms).await;
        if self.fail_payouts.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 520,
                body: "mock payout failed".to_string(),
            });
        }

        lock(&self.payouts).push(payment_request.to_string());
        let prefix: String = payment_request.chars().take(30).collect();
        info!("[mock] paid invoice {prefix}...");

        Ok(Payment {
            payment_hash: random_hash(),
        })
    }

    async fn lookup_receivable(
        &self,
        payment_hash: &str,
    ) -> Result<Option<ReceivableStatus>, GatewayError> {
        Ok(lock(&self.receivables).get(payment_hash).cloned())
    }
}
