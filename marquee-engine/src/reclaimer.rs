use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use marquee_core::CoreResult;
use marquee_store::app_config::ReclaimerConfig;

use crate::manager::LockManager;

/// Outcome of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub reclaimed_locks: usize,
    pub released_seats: usize,
    pub failures: usize,
}

/// Background sweep that closes lapsed holds and frees their seats.
pub struct ExpiryReclaimer {
    manager: Arc<LockManager>,
    interval: Duration,
    batch_size: i64,
}

impl ExpiryReclaimer {
    pub fn new(manager: Arc<LockManager>, cfg: &ReclaimerConfig) -> Self {
        Self {
            manager,
            interval: cfg.sweep_interval(),
            batch_size: cfg.sweep_batch_size.max(1),
        }
    }

    /// Expires up to one batch of lapsed entries, each in its own transaction.
    /// A failing entry is counted and left for the next sweep.
    pub async fn sweep_once(&self) -> CoreResult<SweepReport> {
        let now = self.manager.now();
        let expired = self
            .manager
            .store()
            .expired_ledger_entries(now, self.batch_size)
            .await?;

        let mut report = SweepReport {
            scanned: expired.len(),
            ..SweepReport::default()
        };

        for entry in expired {
            match self.manager.expire_lock(entry.lock_id).await {
                Ok(Some(released)) => {
                    report.reclaimed_locks += 1;
                    report.released_seats += released;
                }
                // Released, confirmed or already swept since the scan
                Ok(None) => {}
                Err(e) => {
                    report.failures += 1;
                    error!("Failed to expire lock {}: {}", entry.lock_id, e);
                }
            }
        }

        Ok(report)
    }

    /// Sweeps on every tick until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Expiry reclaimer started, sweeping every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report.scanned > 0 => info!(
                            "Sweep reclaimed {} of {} expired locks ({} seats released, {} failures)",
                            report.reclaimed_locks, report.scanned, report.released_seats, report.failures
                        ),
                        Ok(_) => {}
                        Err(e) => error!("Expiry sweep failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Expiry reclaimer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use marquee_core::{LockRequest, LockResolution, ManualClock, SeatProvisioning, SeatSpec, SeatStatus};
    use marquee_store::app_config::LockingRules;
    use marquee_store::MemoryInventoryStore;

    async fn setup() -> (Arc<LockManager>, Arc<ManualClock>) {
        let store = MemoryInventoryStore::new();
        store
            .create_showtime("SH1", &SeatSpec::grid(&["A"], 5, None))
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::default());
        let manager = LockManager::with_clock(Arc::new(store), LockingRules::default(), clock.clone());
        (Arc::new(manager), clock)
    }

    #[tokio::test]
    async fn test_sweep_reclaims_only_expired() {
        let (manager, clock) = setup().await;
        let reclaimer = ExpiryReclaimer::new(manager.clone(), &ReclaimerConfig::default());

        let short = manager
            .lock_seats(&LockRequest::new("SH1", &["A1", "A2"], "U1", 1))
            .await
            .unwrap();
        manager
            .lock_seats(&LockRequest::new("SH1", &["A3"], "U2", 600))
            .await
            .unwrap();

        assert_eq!(reclaimer.sweep_once().await.unwrap(), SweepReport::default());

        clock.advance(ChronoDuration::seconds(5));
        let report = reclaimer.sweep_once().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                scanned: 1,
                reclaimed_locks: 1,
                released_seats: 2,
                failures: 0,
            }
        );

        let entry = manager.lock_details(short.lock_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(entry.resolution, Some(LockResolution::Expired));
        let seats = manager.seat_map("SH1", Some(SeatStatus::Locked)).await.unwrap();
        assert_eq!(seats.len(), 1);
        assert_eq!(seats[0].seat_number, "A3");
    }

    #[tokio::test]
    async fn test_sweep_leaves_newer_lock_of_same_holder() {
        let (manager, clock) = setup().await;
        let reclaimer = ExpiryReclaimer::new(manager.clone(), &ReclaimerConfig::default());

        let old = manager
            .lock_seats(&LockRequest::new("SH1", &["A4"], "U1", 1))
            .await
            .unwrap();
        clock.advance(ChronoDuration::seconds(2));
        let renewed = manager
            .lock_seats(&LockRequest::new("SH1", &["A4"], "U1", 600))
            .await
            .unwrap();
        assert!(renewed.success);
        assert_ne!(renewed.lock_id, old.lock_id);

        let report = reclaimer.sweep_once().await.unwrap();
        assert_eq!(report.reclaimed_locks, 1);
        assert_eq!(report.released_seats, 0);

        let seats = manager.seat_map("SH1", Some(SeatStatus::Locked)).await.unwrap();
        assert_eq!(seats[0].lock_id, renewed.lock_id);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (manager, _) = setup().await;
        let cfg = ReclaimerConfig {
            sweep_interval_seconds: 1,
            ..ReclaimerConfig::default()
        };
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(ExpiryReclaimer::new(manager, &cfg).run(rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
