use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use marquee_engine::{ExpiryReclaimer, LockManager};
use marquee_store::app_config::ReclaimerConfig;

/// Spawns the expiry reclaimer unless it is disabled. The task exits once
/// `shutdown` flips to true.
pub fn start_expiry_worker(
    manager: Arc<LockManager>,
    cfg: &ReclaimerConfig,
    shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if !cfg.enabled {
        info!("Expiry reclaimer disabled, expired holds are only reclaimed lazily");
        return None;
    }

    let reclaimer = ExpiryReclaimer::new(manager, cfg);
    Some(tokio::spawn(reclaimer.run(shutdown)))
}
