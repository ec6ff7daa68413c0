//! Per-drop view burst detection.
//!
//! Counters live on the drop record and are written through
//! [`DropStore::update_view_counters`](crate::store::DropStore::update_view_counters),
//! never through a full `put`, so view traffic cannot overwrite a status
//! transition made concurrently by a claim.

use crate::config::ThrottleConfig;
use crate::models::drop::Drop;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewWindow {
    pub view_count: u32,
    pub last_view_reset: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct ViewThrottle {
    window_seconds: i64,
    burst_threshold: u32,
}

impl ViewThrottle {
    pub fn new(window_seconds: i64, burst_threshold: u32) -> Self {
        assert!(window_seconds > 0, "Throttle window must be positive");
        assert!(burst_threshold > 0, "Burst threshold must be positive");
        Self {
            window_seconds,
            burst_threshold,
        }
    }

    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::new(config.window_seconds, config.burst_threshold)
    }

    /// Counters after one more view at `now`.
    pub fn next_window(&self, drop: &Drop, now: i64) -> ViewWindow {
        if now - drop.last_view_reset > self.window_seconds {
            ViewWindow {
                view_count: 1,
                last_view_reset: now,
            }
        } else {
            ViewWindow {
                view_count: drop.view_count.saturating_add(1),
                last_view_reset: drop.last_view_reset,
            }
        }
    }

    pub fn is_burst(&self, window: ViewWindow, now: i64) -> bool {
        window.view_count > self.burst_threshold
            && now - window.last_view_reset <= self.window_seconds
    }

    pub fn is_under_burst(&self, drop: &Drop, now: i64) -> bool {
        self.is_burst(
            ViewWindow {
                view_count: drop.view_count,
                last_view_reset: drop.last_view_reset,
            },
            now,
        )
    }
}

impl Default for ViewThrottle {
    fn default() -> Self {
        Self::new(60, 10)
    }
}
