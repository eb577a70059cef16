pub mod availability;
pub mod manager;
pub mod reclaimer;
pub mod retry;

pub use manager::LockManager;
pub use reclaimer::{ExpiryReclaimer, SweepReport};
pub use retry::RetryPolicy;
