pub mod clock;
pub mod seat;
pub mod ledger;
pub mod request;
pub mod outcome;
pub mod repository;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ledger::{LockLedgerEntry, LockResolution};
pub use outcome::{AvailabilityReport, LockFailure, SeatLockResult};
pub use repository::{InventoryStore, InventoryTransaction, SeatProvisioning, StoreError};
pub use request::{LockRequest, ValidatedLock, ValidationError};
pub use seat::{Seat, SeatError, SeatSpec, SeatStatus};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Inventory store failure: {0}")]
    Store(#[from] StoreError),
    #[error("Seat state violation: {0}")]
    Seat(#[from] SeatError),
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Store(e) if e.is_retryable())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
