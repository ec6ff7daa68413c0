use serde::{Deserialize, Serialize};

use crate::lifecycle::{CreateDrop, CreatedDrop, Payout, ViewOutcome};
use crate::models::drop::{Drop, DropStatus, MSAT_PER_SAT};

pub const DEFAULT_GALLERY_LIMIT: usize = 50;
pub const MAX_GALLERY_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct CreateDropRequest {
    /// Whole sats.
    pub amount: u64,
    pub expiry_minutes: u64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub show_in_gallery: bool,
}

impl From<CreateDropRequest> for CreateDrop {
    fn from(request: CreateDropRequest) -> Self {
        Self {
            amount_sats: request.amount,
            expiry_minutes: request.expiry_minutes,
            message: request.message,
            show_in_gallery: request.show_in_gallery,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateDropResponse {
    pub id: String,
    pub payment_request: String,
    pub payment_hash: String,
    pub expiry: i64,
}

impl From<CreatedDrop> for CreateDropResponse {
    fn from(created: CreatedDrop) -> Self {
        Self {
            id: created.id.to_string(),
            payment_request: created.payment_request,
            payment_hash: created.payment_hash,
            expiry: created.expiry,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    #[serde(alias = "invoice")]
    pub payment_request: String,
    #[serde(default, alias = "hcaptcha_token")]
    pub captcha_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    #[serde(alias = "invoice")]
    pub payment_request: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PayoutResponse {
    pub id: String,
    pub status: DropStatus,
    pub amount_sats: u64,
    pub amount_msat: u64,
    pub payment_hash: String,
}

impl From<Payout> for PayoutResponse {
    fn from(payout: Payout) -> Self {
        Self {
            id: payout.drop.id.to_string(),
            status: payout.drop.status,
            amount_sats: payout.drop.amount_sats(),
            amount_msat: payout.drop.amount_msat,
            payment_hash: payout.payment_hash,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ViewResponse {
    pub view_count: u32,
    pub challenge_required: bool,
}

impl From<ViewOutcome> for ViewResponse {
    fn from(outcome: ViewOutcome) -> Self {
        Self {
            view_count: outcome.view_count,
            challenge_required: outcome.challenge_required,
        }
    }
}

/// Gateway completion callback. Only the fields used for correlation are
/// read; everything else the gateway sends is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct FundingWebhook {
    #[serde(default)]
    pub payment_hash: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drop_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GalleryQuery {
    pub limit: Option<usize>,
}

impl GalleryQuery {
    pub fn resolved_limit(&self) -> Option<usize> {
        match self.limit {
            None => Some(DEFAULT_GALLERY_LIMIT),
            Some(limit) if (1..=MAX_GALLERY_LIMIT).contains(&limit) => Some(limit),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub id: String,
    pub status: DropStatus,
    pub amount_sats: u64,
    pub message: Option<String>,
    pub created_at: i64,
    pub finished_at: i64,
}

impl From<&Drop> for GalleryEntry {
    fn from(drop: &Drop) -> Self {
        Self {
            id: drop.id.to_string(),
            status: drop.status,
            amount_sats: drop.amount_msat / MSAT_PER_SAT,
            message: drop.message.clone(),
            created_at: drop.created_at,
            finished_at: drop.finished_at(),
        }
    }
}
