use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::drop_id::DropId;

pub const MSAT_PER_SAT: u64 = 1_000;
pub const MIN_AMOUNT_SATS: u64 = 1;
pub const MAX_AMOUNT_SATS: u64 = 1_000_000;
pub const MAX_MESSAGE_CHARS: usize = 140;

const _: [(); 1] = [(); (MIN_AMOUNT_SATS * MSAT_PER_SAT == 1_000) as usize];
const _: [(); 1] = [(); (MAX_AMOUNT_SATS * MSAT_PER_SAT == 1_000_000_000) as usize];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropStatus {
    Pending,
    Live,
    Claimed,
    Expired,
    Returned,
}

impl DropStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Live => "live",
            Self::Claimed => "claimed",
            Self::Expired => "expired",
            Self::Returned => "returned",
        }
    }

    /// Position along `pending -> live -> {claimed | expired} -> returned`.
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Live => 1,
            Self::Claimed | Self::Expired => 2,
            Self::Returned => 3,
        }
    }

    pub fn can_transition_to(&self, next: DropStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Live)
                | (Self::Live, Self::Claimed)
                | (Self::Live, Self::Expired)
                | (Self::Live, Self::Returned)
                | (Self::Expired, Self::Returned)
        ) && next.rank() > self.rank()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Claimed | Self::Returned)
    }
}

impl fmt::Display for DropStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DropStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "live" => Ok(Self::Live),
            "claimed" => Ok(Self::Claimed),
            "expired" => Ok(Self::Expired),
            "returned" => Ok(Self::Returned),
            other => Err(format!("unknown drop status '{other}'")),
        }
    }
}

/// The persisted drop record. Timestamps are epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drop {
    pub id: DropId,
    pub status: DropStatus,
    pub amount_msat: u64,
    pub expiry: i64,
    pub message: Option<String>,
    pub show_in_gallery: bool,
    pub created_at: i64,
    pub claimed_at: Option<i64>,
    pub view_count: u32,
    pub last_view_reset: i64,
}

impl Drop {
    pub fn amount_sats(&self) -> u64 {
        self.amount_msat / MSAT_PER_SAT
    }

    pub fn is_past_expiry(&self, now: i64) -> bool {
        now > self.expiry
    }

    /// Ordering key for the gallery: most recent activity first.
    pub fn finished_at(&self) -> i64 {
        self.claimed_at.unwrap_or(self.created_at)
    }

    pub fn with_status(&self, status: DropStatus) -> Self {
        debug_assert!(
            self.status.can_transition_to(status),
            "illegal transition {} -> {}",
            self.status,
            status
        );
        Self {
            status,
            ..self.clone()
        }
    }
}

/// Trim, drop control characters and cap at [`MAX_MESSAGE_CHARS`].
pub fn sanitize_message(raw: Option<&str>) -> Option<String> {
    let cleaned: String = raw?
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_MESSAGE_CHARS)
        .collect();
    let cleaned = cleaned.trim_end().to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Read-only projection handed to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropView {
    pub id: String,
    pub status: DropStatus,
    pub amount_sats: u64,
    pub amount_msat: u64,
    pub expiry: i64,
    pub message: Option<String>,
    pub show_in_gallery: bool,
    pub created_at: i64,
    pub claimed_at: Option<i64>,
    pub seconds_remaining: i64,
    pub claimable: bool,
    pub refund_eligible: bool,
}

impl DropView {
    pub fn from_drop(drop: &Drop, now: i64) -> Self {
        let past_expiry = drop.is_past_expiry(now);
        Self {
            id: drop.id.to_string(),
            status: drop.status,
            amount_sats: drop.amount_sats(),
            amount_msat: drop.amount_msat,
            expiry: drop.expiry,
            message: drop.message.clone(),
            show_in_gallery: drop.show_in_gallery,
            created_at: drop.created_at,
            claimed_at: drop.claimed_at,
            seconds_remaining: (drop.expiry - now).max(0),
            claimable: drop.status == DropStatus::Live && !past_expiry,
            refund_eligible: drop.status == DropStatus::Expired
                || (drop.status == DropStatus::Live && past_expiry),
        }
    }
}
