//! Payment gateway seam.
//!
//! The engine only ever talks to [`PaymentGateway`]. Settlement happens on the
//! other side; a completed `pay` cannot be reversed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod lnbits;
pub mod memo;
mod mock;

pub use lnbits::LnbitsGateway;
#[cfg(test)]
pub(crate) use lnbits::fake::{FakeLnbits, FakePayReply};
pub use mock::MockGateway;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected gateway response: {0}")]
    Decode(String),
    /// The request may have reached the wallet and its outcome is unknown.
    /// Never safe to retry a payment that failed this way.
    #[error("payment outcome unknown: {0}")]
    Indeterminate(String),
}

/// Payment request issued for incoming funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receivable {
    pub payment_request: String,
    pub payment_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_hash: String,
}

/// What the gateway itself reports about a receivable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivableStatus {
    pub paid: bool,
    pub memo: String,
    pub amount_msat: Option<u64>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_receivable(
        &self,
        amount_msat: u64,
        memo: &str,
        notify_url: Option<&str>,
    ) -> Result<Receivable, GatewayError>;

    async fn pay(&self, payment_request: &str) -> Result<Payment, GatewayError>;

    async fn lookup_receivable(
        &self,
        payment_hash: &str,
    ) -> Result<Option<ReceivableStatus>, GatewayError>;
}

pub const MAX_PAYMENT_REQUEST_LEN: usize = 4_096;
const MIN_PAYMENT_REQUEST_LEN: usize = 16;

/// Shape check for a BOLT11 payout request: optional `lightning:` scheme,
/// `ln` prefix, bech32-safe characters only. Returns the normalized request.
pub fn normalize_payment_request(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .strip_prefix("lightning:")
        .or_else(|| trimmed.strip_prefix("LIGHTNING:"))
        .unwrap_or(trimmed);
    let normalized = without_scheme.to_ascii_lowercase();
    if normalized.len() < MIN_PAYMENT_REQUEST_LEN || normalized.len() > MAX_PAYMENT_REQUEST_LEN {
        return None;
    }
    if !normalized.starts_with("ln") {
        return None;
    }
    if !normalized.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(normalized)
}
