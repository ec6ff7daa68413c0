//! Error taxonomy for the drop lifecycle.
//!
//! Every variant maps to a stable machine-readable code so callers can branch
//! on outcomes without parsing messages.

use crate::gateway::GatewayError;
use crate::models::drop::DropStatus;
use crate::store::StoreError;

pub type DropResult<T> = std::result::Result<T, DropError>;

#[derive(Debug, thiserror::Error)]
pub enum DropError {
    #[error("{0}")]
    Validation(String),
    #[error("drop not found")]
    NotFound,
    #[error("drop is {status}, not claimable")]
    InvalidState { status: DropStatus },
    #[error("drop has expired")]
    Expired,
    #[error("drop was already claimed")]
    AlreadyClaimed,
    #[error("refund already processed")]
    AlreadyReturned,
    #[error("drop was never funded")]
    NotFunded,
    #[error("drop has not expired yet")]
    NotYetExpired,
    #[error("proof of humanity required for this drop")]
    ChallengeRequired,
    #[error("proof of humanity verification failed")]
    ChallengeFailed,
    #[error("payment gateway error: {0}")]
    Gateway(String),
    #[error("payment gateway timed out")]
    GatewayTimeout,
    #[error("payout for drop {drop_id} succeeded but could not be recorded")]
    SettledButNotPersisted { drop_id: String },
    #[error("drop {drop_id} has a payout awaiting manual reconciliation")]
    ReconciliationPending { drop_id: String },
    #[error("drop store unavailable: {0}")]
    Storage(String),
}

impl DropError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound => "not_found",
            Self::InvalidState { .. } => "invalid_state",
            Self::Expired => "expired",
            Self::AlreadyClaimed => "already_claimed",
            Self::AlreadyReturned => "already_returned",
            Self::NotFunded => "not_funded",
            Self::NotYetExpired => "not_yet_expired",
            Self::ChallengeRequired => "challenge_required",
            Self::ChallengeFailed => "challenge_failed",
            Self::Gateway(_) => "gateway_error",
            Self::GatewayTimeout => "gateway_timeout",
            Self::SettledButNotPersisted { .. } => "settled_but_not_persisted",
            Self::ReconciliationPending { .. } => "reconciliation_pending",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Whether the caller may retry. A retry after an ambiguous payout is
    /// stopped by the reconciliation hold, never by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Gateway(_) | Self::GatewayTimeout | Self::Storage(_)
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<StoreError> for DropError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<GatewayError> for DropError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Indeterminate(_) => Self::GatewayTimeout,
            other => Self::Gateway(other.to_string()),
        }
    }
}
