pub mod app_config;
pub mod database;
pub mod memory;
pub mod pg_inventory;

pub use app_config::{Config, StoreBackend};
pub use database::DbClient;
pub use memory::MemoryInventoryStore;
pub use pg_inventory::PgInventoryStore;
