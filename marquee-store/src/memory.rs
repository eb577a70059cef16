use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use uuid::Uuid;

use marquee_core::repository::{InventoryStore, InventoryTransaction, SeatProvisioning, StoreError};
use marquee_core::{LockLedgerEntry, Seat, SeatSpec, SeatStatus};

/// One stored row: an async latch standing in for the database row lock, and
/// the committed value.
struct Row<T> {
    latch: Arc<Mutex<()>>,
    committed: RwLock<T>,
}

impl<T: Clone> Row<T> {
    fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            latch: Arc::new(Mutex::new(())),
            committed: RwLock::new(value),
        })
    }

    fn read(&self) -> T {
        self.committed.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn write(&self, value: T) {
        *self.committed.write().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

#[derive(Default)]
struct Tables {
    showtimes: BTreeMap<String, BTreeMap<String, Arc<Row<Seat>>>>,
    ledger: HashMap<Uuid, Arc<Row<LockLedgerEntry>>>,
    idempotency: HashMap<(String, String), Uuid>,
}

type SharedTables = Arc<RwLock<Tables>>;

fn read_tables(tables: &SharedTables) -> RwLockReadGuard<'_, Tables> {
    tables.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_tables(tables: &SharedTables) -> RwLockWriteGuard<'_, Tables> {
    tables.write().unwrap_or_else(PoisonError::into_inner)
}

/// In-process inventory store with the same transactional contract as the
/// Postgres store: row-exclusive selects, writes buffered until commit and
/// applied atomically, bounded lock waits. Nothing survives the process.
#[derive(Clone, Default)]
pub struct MemoryInventoryStore {
    tables: SharedTables,
}

impl MemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn begin(&self, lock_wait: Duration) -> Result<Box<dyn InventoryTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            lock_wait,
            deadline: Instant::now() + lock_wait,
            held: HashMap::new(),
            seat_writes: BTreeMap::new(),
            ledger_writes: HashMap::new(),
            ledger_inserts: Vec::new(),
            finished: false,
        }))
    }

    async fn showtime_exists(&self, showtime_id: &str) -> Result<bool, StoreError> {
        Ok(read_tables(&self.tables).showtimes.contains_key(showtime_id))
    }

    async fn fetch_seats(&self, showtime_id: &str, seat_numbers: &[String]) -> Result<Vec<Seat>, StoreError> {
        let tables = read_tables(&self.tables);
        let Some(seats) = tables.showtimes.get(showtime_id) else {
            return Ok(Vec::new());
        };

        let mut found: Vec<Seat> = seat_numbers
            .iter()
            .filter_map(|number| seats.get(number))
            .map(|row| row.read())
            .collect();
        found.sort_by(|a, b| a.seat_number.cmp(&b.seat_number));
        found.dedup_by(|a, b| a.seat_number == b.seat_number);
        Ok(found)
    }

    async fn list_seats(&self, showtime_id: &str, status: Option<SeatStatus>) -> Result<Vec<Seat>, StoreError> {
        let tables = read_tables(&self.tables);
        let Some(seats) = tables.showtimes.get(showtime_id) else {
            return Ok(Vec::new());
        };

        Ok(seats
            .values()
            .map(|row| row.read())
            .filter(|seat| status.map_or(true, |s| seat.status == s))
            .collect())
    }

    async fn find_ledger_entry(&self, lock_id: Uuid) -> Result<Option<LockLedgerEntry>, StoreError> {
        Ok(read_tables(&self.tables).ledger.get(&lock_id).map(|row| row.read()))
    }

    async fn expired_ledger_entries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<LockLedgerEntry>, StoreError> {
        let mut expired = self.scan_ledger(|entry| entry.active && entry.is_expired(now));
        expired.sort_by_key(|entry| entry.expires_at);
        expired.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(expired)
    }

    async fn active_ledger_entries(&self, showtime_id: &str) -> Result<Vec<LockLedgerEntry>, StoreError> {
        let mut entries = self.scan_ledger(|entry| entry.active && entry.showtime_id == showtime_id);
        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }

    async fn ledger_entries_for_holder(&self, holder_id: &str) -> Result<Vec<LockLedgerEntry>, StoreError> {
        let mut entries = self.scan_ledger(|entry| entry.holder_id == holder_id);
        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }
}

impl MemoryInventoryStore {
    fn scan_ledger(&self, keep: impl Fn(&LockLedgerEntry) -> bool) -> Vec<LockLedgerEntry> {
        read_tables(&self.tables)
            .ledger
            .values()
            .map(|row| row.read())
            .filter(|entry| keep(entry))
            .collect()
    }
}

#[async_trait]
impl SeatProvisioning for MemoryInventoryStore {
    async fn create_showtime(&self, showtime_id: &str, seats: &[SeatSpec]) -> Result<bool, StoreError> {
        let mut tables = write_tables(&self.tables);
        if tables.showtimes.contains_key(showtime_id) {
            return Ok(false);
        }

        let now = Utc::now();
        let rows = seats
            .iter()
            .map(|spec| (spec.seat_number.clone(), Row::new(Seat::new(showtime_id, spec, now))))
            .collect();
        tables.showtimes.insert(showtime_id.to_string(), rows);
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowId {
    Seat(String, String),
    Ledger(Uuid),
}

pub struct MemoryTransaction {
    tables: SharedTables,
    lock_wait: Duration,
    /// Every latch wait of the transaction shares this one budget
    deadline: Instant,
    held: HashMap<RowId, OwnedMutexGuard<()>>,
    seat_writes: BTreeMap<(String, String), Seat>,
    ledger_writes: HashMap<Uuid, LockLedgerEntry>,
    ledger_inserts: Vec<LockLedgerEntry>,
    finished: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Takes the row latch, waiting no later than the transaction's deadline.
    /// Re-entrant within one transaction.
    async fn acquire(&mut self, id: RowId, latch: Arc<Mutex<()>>) -> Result<(), StoreError> {
        if self.held.contains_key(&id) {
            return Ok(());
        }

        let guard = tokio::time::timeout_at(self.deadline, latch.lock_owned())
            .await
            .map_err(|_| {
                StoreError::LockTimeout(format!("{:?} still locked, lock wait of {:?} used up", id, self.lock_wait))
            })?;
        self.held.insert(id, guard);
        Ok(())
    }

    fn pending_key_taken(&self, holder_id: &str, key: &str) -> Option<&LockLedgerEntry> {
        self.ledger_inserts
            .iter()
            .find(|e| e.holder_id == holder_id && e.idempotency_key.as_deref() == Some(key))
    }

    fn finish(&mut self) {
        self.finished = true;
        self.seat_writes.clear();
        self.ledger_writes.clear();
        self.ledger_inserts.clear();
        // Dropping the guards releases the row latches
        self.held.clear();
    }
}

#[async_trait]
impl InventoryTransaction for MemoryTransaction {
    async fn showtime_exists(&mut self, showtime_id: &str) -> Result<bool, StoreError> {
        self.ensure_open()?;
        Ok(read_tables(&self.tables).showtimes.contains_key(showtime_id))
    }

    async fn select_seats_for_update(
        &mut self,
        showtime_id: &str,
        seat_numbers: &[String],
    ) -> Result<Vec<Seat>, StoreError> {
        self.ensure_open()?;

        // BTreeMap iteration gives the byte-wise acquisition order
        let rows: Vec<(String, Arc<Row<Seat>>)> = {
            let tables = read_tables(&self.tables);
            match tables.showtimes.get(showtime_id) {
                Some(seats) => {
                    let mut wanted: Vec<&String> = seat_numbers.iter().collect();
                    wanted.sort();
                    wanted.dedup();
                    wanted
                        .into_iter()
                        .filter_map(|n| seats.get(n).map(|row| (n.clone(), Arc::clone(row))))
                        .collect()
                }
                None => Vec::new(),
            }
        };

        let mut locked = Vec::with_capacity(rows.len());
        for (number, row) in rows {
            let key = (showtime_id.to_string(), number);
            self.acquire(RowId::Seat(key.0.clone(), key.1.clone()), Arc::clone(&row.latch))
                .await?;
            let seat = match self.seat_writes.get(&key) {
                Some(pending) => pending.clone(),
                None => row.read(),
            };
            locked.push(seat);
        }

        Ok(locked)
    }

    async fn select_ledger_entry_for_update(&mut self, lock_id: Uuid) -> Result<Option<LockLedgerEntry>, StoreError> {
        self.ensure_open()?;

        if let Some(pending) = self.ledger_inserts.iter().find(|e| e.lock_id == lock_id) {
            return Ok(Some(pending.clone()));
        }

        let row = read_tables(&self.tables).ledger.get(&lock_id).cloned();
        let Some(row) = row else {
            return Ok(None);
        };

        self.acquire(RowId::Ledger(lock_id), Arc::clone(&row.latch)).await?;
        let entry = match self.ledger_writes.get(&lock_id) {
            Some(pending) => pending.clone(),
            None => row.read(),
        };
        Ok(Some(entry))
    }

    async fn find_by_idempotency_key(
        &mut self,
        holder_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<LockLedgerEntry>, StoreError> {
        self.ensure_open()?;

        if let Some(pending) = self.pending_key_taken(holder_id, idempotency_key) {
            return Ok(Some(pending.clone()));
        }

        let tables = read_tables(&self.tables);
        let key = (holder_id.to_string(), idempotency_key.to_string());
        Ok(tables
            .idempotency
            .get(&key)
            .and_then(|lock_id| tables.ledger.get(lock_id))
            .map(|row| row.read()))
    }

    async fn insert_ledger_entry(&mut self, entry: &LockLedgerEntry) -> Result<(), StoreError> {
        self.ensure_open()?;

        {
            let tables = read_tables(&self.tables);
            if tables.ledger.contains_key(&entry.lock_id) {
                return Err(StoreError::UniqueViolation(format!("lock id {}", entry.lock_id)));
            }
            if let Some(key) = &entry.idempotency_key {
                if tables.idempotency.contains_key(&(entry.holder_id.clone(), key.clone())) {
                    return Err(StoreError::UniqueViolation(format!(
                        "idempotency key {} for {}",
                        key, entry.holder_id
                    )));
                }
            }
        }

        if let Some(key) = &entry.idempotency_key {
            if self.pending_key_taken(&entry.holder_id, key).is_some() {
                return Err(StoreError::UniqueViolation(format!(
                    "idempotency key {} for {}",
                    key, entry.holder_id
                )));
            }
        }

        self.ledger_inserts.push(entry.clone());
        Ok(())
    }

    async fn update_ledger_entry(&mut self, entry: &LockLedgerEntry) -> Result<(), StoreError> {
        self.ensure_open()?;

        if let Some(pending) = self.ledger_inserts.iter_mut().find(|e| e.lock_id == entry.lock_id) {
            *pending = entry.clone();
            return Ok(());
        }

        if !self.held.contains_key(&RowId::Ledger(entry.lock_id)) {
            return Err(StoreError::Query(format!(
                "ledger entry {} updated without being selected for update",
                entry.lock_id
            )));
        }
        self.ledger_writes.insert(entry.lock_id, entry.clone());
        Ok(())
    }

    async fn update_seats(&mut self, seats: &[Seat]) -> Result<(), StoreError> {
        self.ensure_open()?;

        for seat in seats {
            let id = RowId::Seat(seat.showtime_id.clone(), seat.seat_number.clone());
            if !self.held.contains_key(&id) {
                return Err(StoreError::Query(format!(
                    "seat {}/{} updated without being selected for update",
                    seat.showtime_id, seat.seat_number
                )));
            }
            self.seat_writes
                .insert((seat.showtime_id.clone(), seat.seat_number.clone()), seat.clone());
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;

        let shared = Arc::clone(&self.tables);
        let mut tables = write_tables(&shared);

        // The unique index is only checked for real at commit, as in Postgres
        let duplicate = self.ledger_inserts.iter().find_map(|entry| {
            let key = entry.idempotency_key.as_ref()?;
            tables
                .idempotency
                .contains_key(&(entry.holder_id.clone(), key.clone()))
                .then(|| format!("idempotency key {} for {}", key, entry.holder_id))
        });
        if let Some(detail) = duplicate {
            drop(tables);
            self.finish();
            return Err(StoreError::UniqueViolation(detail));
        }

        for entry in self.ledger_inserts.drain(..) {
            if let Some(key) = &entry.idempotency_key {
                tables
                    .idempotency
                    .insert((entry.holder_id.clone(), key.clone()), entry.lock_id);
            }
            tables.ledger.insert(entry.lock_id, Row::new(entry));
        }

        for (lock_id, entry) in self.ledger_writes.drain() {
            if let Some(row) = tables.ledger.get(&lock_id) {
                row.write(entry);
            }
        }

        for ((showtime_id, seat_number), seat) in std::mem::take(&mut self.seat_writes) {
            if let Some(row) = tables.showtimes.get(&showtime_id).and_then(|seats| seats.get(&seat_number)) {
                row.write(seat);
            }
        }

        drop(tables);
        self.finish();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.finish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const WAIT: Duration = Duration::from_millis(100);

    async fn store_with(showtime: &str, seats: &[&str]) -> MemoryInventoryStore {
        let store = MemoryInventoryStore::new();
        let specs: Vec<SeatSpec> = seats.iter().map(|s| SeatSpec::new(*s)).collect();
        assert!(store.create_showtime(showtime, &specs).await.unwrap());
        store
    }

    fn numbers(seats: &[&str]) -> Vec<String> {
        seats.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_select_orders_and_skips_missing() {
        let store = store_with("SH1", &["B1", "A10", "A2"]).await;
        let mut tx = store.begin(WAIT).await.unwrap();

        let seats = tx
            .select_seats_for_update("SH1", &numbers(&["B1", "A2", "Z9", "A10"]))
            .await
            .unwrap();
        let got: Vec<_> = seats.iter().map(|s| s.seat_number.as_str()).collect();
        assert_eq!(got, vec!["A10", "A2", "B1"]);
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let store = store_with("SH1", &["A1"]).await;
        let now = Utc::now();

        let mut tx = store.begin(WAIT).await.unwrap();
        let mut seats = tx.select_seats_for_update("SH1", &numbers(&["A1"])).await.unwrap();
        seats[0].lock("U1", Uuid::new_v4(), now + ChronoDuration::seconds(60), now).unwrap();
        tx.update_seats(&seats).await.unwrap();

        let committed = store.fetch_seats("SH1", &numbers(&["A1"])).await.unwrap();
        assert_eq!(committed[0].status, SeatStatus::Available);

        tx.commit().await.unwrap();
        let committed = store.fetch_seats("SH1", &numbers(&["A1"])).await.unwrap();
        assert_eq!(committed[0].status, SeatStatus::Locked);
    }

    #[tokio::test]
    async fn test_drop_rolls_back_and_releases_latch() {
        let store = store_with("SH1", &["A1"]).await;
        let now = Utc::now();

        {
            let mut tx = store.begin(WAIT).await.unwrap();
            let mut seats = tx.select_seats_for_update("SH1", &numbers(&["A1"])).await.unwrap();
            seats[0].enter_maintenance(now).unwrap();
            tx.update_seats(&seats).await.unwrap();
        }

        let mut tx = store.begin(WAIT).await.unwrap();
        let seats = tx.select_seats_for_update("SH1", &numbers(&["A1"])).await.unwrap();
        assert_eq!(seats[0].status, SeatStatus::Available);
    }

    #[tokio::test]
    async fn test_contended_row_times_out() {
        let store = store_with("SH1", &["A1"]).await;

        let mut first = store.begin(WAIT).await.unwrap();
        first.select_seats_for_update("SH1", &numbers(&["A1"])).await.unwrap();

        let mut second = store.begin(WAIT).await.unwrap();
        let err = second
            .select_seats_for_update("SH1", &numbers(&["A1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));

        first.rollback().await.unwrap();
        let mut third = store.begin(WAIT).await.unwrap();
        assert_eq!(third.select_seats_for_update("SH1", &numbers(&["A1"])).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lock_wait_bounds_whole_transaction() {
        let store = store_with("SH1", &["A1", "A2"]).await;

        // A1 frees up well within the wait, A2 only after the wait is spent
        for (seat, hold_ms) in [("A1", 200), ("A2", 450)] {
            let mut blocker = store.begin(WAIT).await.unwrap();
            blocker.select_seats_for_update("SH1", &numbers(&[seat])).await.unwrap();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(hold_ms)).await;
                blocker.rollback().await.unwrap();
            });
        }

        let mut tx = store.begin(Duration::from_millis(300)).await.unwrap();
        let err = tx
            .select_seats_for_update("SH1", &numbers(&["A1", "A2"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
    }

    #[tokio::test]
    async fn test_idempotency_key_is_unique_per_holder() {
        let store = store_with("SH1", &["A1"]).await;
        let now = Utc::now();
        let entry = |holder: &str| {
            LockLedgerEntry::grant(holder, "SH1", numbers(&["A1"]), Some("k1".into()), ChronoDuration::seconds(60), now)
        };

        let mut tx = store.begin(WAIT).await.unwrap();
        tx.insert_ledger_entry(&entry("U1")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(WAIT).await.unwrap();
        assert!(tx.find_by_idempotency_key("U1", "k1").await.unwrap().is_some());
        assert!(tx.find_by_idempotency_key("U2", "k1").await.unwrap().is_none());
        let err = tx.insert_ledger_entry(&entry("U1")).await.unwrap_err();
        assert!(err.is_retryable());
        tx.insert_ledger_entry(&entry("U2")).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_racing_inserts_conflict_at_commit() {
        let store = store_with("SH1", &["A1"]).await;
        let now = Utc::now();
        let entry = || {
            LockLedgerEntry::grant("U1", "SH1", numbers(&["A1"]), Some("k1".into()), ChronoDuration::seconds(60), now)
        };

        let mut a = store.begin(WAIT).await.unwrap();
        let mut b = store.begin(WAIT).await.unwrap();
        a.insert_ledger_entry(&entry()).await.unwrap();
        b.insert_ledger_entry(&entry()).await.unwrap();

        a.commit().await.unwrap();
        assert!(matches!(b.commit().await, Err(StoreError::UniqueViolation(_))));
        assert!(matches!(b.commit().await, Err(StoreError::Closed)));
        assert_eq!(store.ledger_entries_for_holder("U1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_requires_row_lock() {
        let store = store_with("SH1", &["A1"]).await;
        let seat = store.fetch_seats("SH1", &numbers(&["A1"])).await.unwrap().remove(0);

        let mut tx = store.begin(WAIT).await.unwrap();
        assert!(matches!(tx.update_seats(&[seat]).await, Err(StoreError::Query(_))));
    }

    #[tokio::test]
    async fn test_expired_entries_oldest_first() {
        let store = store_with("SH1", &["A1", "A2", "A3"]).await;
        let now = Utc::now();

        let mut tx = store.begin(WAIT).await.unwrap();
        for (seat, ttl) in [("A1", 30), ("A2", 10), ("A3", 600)] {
            let entry = LockLedgerEntry::grant(
                "U1",
                "SH1",
                numbers(&[seat]),
                None,
                ChronoDuration::seconds(ttl),
                now,
            );
            tx.insert_ledger_entry(&entry).await.unwrap();
        }
        tx.commit().await.unwrap();

        let later = now + ChronoDuration::seconds(60);
        let expired = store.expired_ledger_entries(later, 10).await.unwrap();
        let seats: Vec<_> = expired.iter().map(|e| e.seat_numbers[0].as_str()).collect();
        assert_eq!(seats, vec!["A2", "A1"]);

        assert_eq!(store.expired_ledger_entries(later, 1).await.unwrap().len(), 1);
        assert_eq!(store.active_ledger_entries("SH1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_showtime_refused() {
        let store = store_with("SH1", &["A1"]).await;
        assert!(!store.create_showtime("SH1", &[SeatSpec::new("B1")]).await.unwrap());
        assert_eq!(store.list_seats("SH1", None).await.unwrap().len(), 1);
        assert!(store.list_seats("SH1", Some(SeatStatus::Booked)).await.unwrap().is_empty());
    }
}
