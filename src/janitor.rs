use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::lifecycle::{DropEngine, SweepReport};

/// Periodic sweeper that expires overdue drops and deletes abandoned ones.
pub struct Janitor {
    engine: Arc<DropEngine>,
    interval: Duration,
}

impl Janitor {
    pub fn new(engine: Arc<DropEngine>, interval: Duration) -> Self {
        assert!(!interval.is_zero(), "Sweep interval must be positive");
        Self { engine, interval }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_seconds = self.interval.as_secs(),
            "Starting drop janitor loop"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    match changed {
                        Ok(_) => {
                            if *shutdown.borrow() {
                                info!("Janitor shutdown signal received");
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("Shutdown channel closed unexpectedly. Exiting janitor loop");
                            break;
                        }
                    }
                }
                _ = sleep(self.interval) => {
                    self.tick().await;
                }
            }
        }
    }

    /// One sweep. A failed pass is logged and retried on the next tick.
    pub async fn tick(&self) -> Option<SweepReport> {
        match self.engine.sweep_expired().await {
            Ok(report) => {
                if report == SweepReport::default() {
                    debug!("Sweep found nothing to do");
                } else {
                    info!(
                        expired = report.expired,
                        deleted = report.deleted,
                        failed = report.failed,
                        "Sweep completed"
                    );
                }
                Some(report)
            }
            Err(err) => {
                warn!("Sweep failed: {err}");
                None
            }
        }
    }
}
