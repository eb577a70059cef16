use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::ledger::LockLedgerEntry;
use crate::seat::{Seat, SeatSpec, SeatStatus};

/// Infrastructure failures raised by an inventory store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Inventory store unavailable: {0}")]
    Unavailable(String),

    #[error("Transaction aborted by serialization failure: {0}")]
    Serialization(String),

    #[error("Transaction aborted by deadlock: {0}")]
    Deadlock(String),

    #[error("Timed out waiting for row lock: {0}")]
    LockTimeout(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Transaction already finished")]
    Closed,

    #[error("Store query failed: {0}")]
    Query(String),
}

impl StoreError {
    /// The whole unit of work may be retried: the store aborted it without effect.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Serialization(_) | StoreError::Deadlock(_) | StoreError::UniqueViolation(_)
        )
    }
}

/// Durable seat and ledger storage.
///
/// Committed reads go through the store directly; anything that mutates seat or
/// ledger rows goes through an [`InventoryTransaction`].
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Opens a transaction. Every row-lock wait inside it is bounded by `lock_wait`.
    async fn begin(&self, lock_wait: Duration) -> Result<Box<dyn InventoryTransaction>, StoreError>;

    async fn showtime_exists(&self, showtime_id: &str) -> Result<bool, StoreError>;

    /// Committed state of the named seats, ordered by seat number. Missing seats are omitted.
    async fn fetch_seats(&self, showtime_id: &str, seat_numbers: &[String]) -> Result<Vec<Seat>, StoreError>;

    async fn list_seats(&self, showtime_id: &str, status: Option<SeatStatus>) -> Result<Vec<Seat>, StoreError>;

    async fn find_ledger_entry(&self, lock_id: Uuid) -> Result<Option<LockLedgerEntry>, StoreError>;

    /// Active entries whose expiry is before `now`, oldest first
    async fn expired_ledger_entries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<LockLedgerEntry>, StoreError>;

    async fn active_ledger_entries(&self, showtime_id: &str) -> Result<Vec<LockLedgerEntry>, StoreError>;

    async fn ledger_entries_for_holder(&self, holder_id: &str) -> Result<Vec<LockLedgerEntry>, StoreError>;
}

/// One unit of work against the store.
///
/// Rows selected "for update" stay exclusively held until `commit` or
/// `rollback`. Dropping a transaction without committing rolls it back.
/// When a transaction needs both a ledger row and seat rows it must lock the
/// ledger row first.
#[async_trait]
pub trait InventoryTransaction: Send {
    async fn showtime_exists(&mut self, showtime_id: &str) -> Result<bool, StoreError>;

    /// Exclusively locks the named seat rows in ascending seat-number order and
    /// returns them in that order. Missing seats are omitted.
    async fn select_seats_for_update(
        &mut self,
        showtime_id: &str,
        seat_numbers: &[String],
    ) -> Result<Vec<Seat>, StoreError>;

    async fn select_ledger_entry_for_update(&mut self, lock_id: Uuid) -> Result<Option<LockLedgerEntry>, StoreError>;

    async fn find_by_idempotency_key(
        &mut self,
        holder_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<LockLedgerEntry>, StoreError>;

    /// Fails with [`StoreError::UniqueViolation`] when (holder, idempotency key) is taken.
    async fn insert_ledger_entry(&mut self, entry: &LockLedgerEntry) -> Result<(), StoreError>;

    /// Persists activity, release time and resolution of a locked entry
    async fn update_ledger_entry(&mut self, entry: &LockLedgerEntry) -> Result<(), StoreError>;

    /// Persists status, hold and booking fields of seats previously selected for update
    async fn update_seats(&mut self, seats: &[Seat]) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Administrative seat provisioning, done once per showtime
#[async_trait]
pub trait SeatProvisioning: Send + Sync {
    /// Creates the showtime with all seats AVAILABLE. Returns false if it already exists.
    async fn create_showtime(&self, showtime_id: &str, seats: &[SeatSpec]) -> Result<bool, StoreError>;
}
