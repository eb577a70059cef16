use std::sync::Arc;

use marquee_core::{Clock, InventoryStore, SeatProvisioning, SystemClock};
use marquee_engine::LockManager;
use marquee_store::app_config::LockingRules;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<LockManager>,
    pub provisioning: Arc<dyn SeatProvisioning>,
}

impl AppState {
    pub fn new<S>(store: Arc<S>, rules: LockingRules) -> Self
    where
        S: InventoryStore + SeatProvisioning + 'static,
    {
        Self::with_clock(store, rules, Arc::new(SystemClock))
    }

    pub fn with_clock<S>(store: Arc<S>, rules: LockingRules, clock: Arc<dyn Clock>) -> Self
    where
        S: InventoryStore + SeatProvisioning + 'static,
    {
        let inventory: Arc<dyn InventoryStore> = store.clone();
        Self {
            manager: Arc::new(LockManager::with_clock(inventory, rules, clock)),
            provisioning: store,
        }
    }
}
