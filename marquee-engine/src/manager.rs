use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use marquee_core::repository::{InventoryStore, InventoryTransaction};
use marquee_core::{
    Clock, CoreError, CoreResult, LockLedgerEntry, LockRequest, LockResolution, SeatLockResult,
    SeatStatus, StoreError, SystemClock, ValidatedLock,
};
use marquee_store::app_config::LockingRules;

use crate::retry::RetryPolicy;

/// Grants, releases, confirms and expires seat holds.
///
/// Every operation is one store transaction wrapped in the retry policy. Row
/// exclusivity comes from the store; the manager itself keeps no state.
pub struct LockManager {
    store: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
    rules: LockingRules,
    retry: RetryPolicy,
}

impl LockManager {
    pub fn new(store: Arc<dyn InventoryStore>, rules: LockingRules) -> Self {
        Self::with_clock(store, rules, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn InventoryStore>, rules: LockingRules, clock: Arc<dyn Clock>) -> Self {
        let retry = RetryPolicy::from_rules(&rules);
        Self { store, clock, rules, retry }
    }

    pub fn store(&self) -> &Arc<dyn InventoryStore> {
        &self.store
    }

    pub fn rules(&self) -> &LockingRules {
        &self.rules
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Atomically locks every requested seat for the holder, or none of them.
    ///
    /// Refusals (invalid request, unknown showtime or seats, conflicts, lock
    /// wait exceeded) come back as a failed [`SeatLockResult`]; only
    /// infrastructure failures are errors.
    pub async fn lock_seats(&self, request: &LockRequest) -> CoreResult<SeatLockResult> {
        let lock = match request.validate(self.rules.default_hold_seconds, self.rules.max_hold_seconds) {
            Ok(lock) => lock,
            Err(e) => {
                warn!("Rejected lock request from {}: {}", request.holder_id, e);
                return Ok(SeatLockResult::invalid(&e));
            }
        };

        let lock = &lock;
        match self.retry.run("lock_seats", || self.try_lock_seats(lock)).await {
            Err(CoreError::Store(StoreError::LockTimeout(detail))) => {
                warn!(
                    "Lock wait exceeded for {} on {} {:?}: {}",
                    lock.holder_id, lock.showtime_id, lock.seat_numbers, detail
                );
                Ok(SeatLockResult::busy(lock.seat_numbers.clone()))
            }
            other => other,
        }
    }

    async fn try_lock_seats(&self, lock: &ValidatedLock) -> CoreResult<SeatLockResult> {
        let mut tx = self.store.begin(self.rules.lock_wait()).await?;
        let now = self.clock.now();

        // 1. A request already granted under this key is answered from the ledger
        if let Some(key) = &lock.idempotency_key {
            if let Some(entry) = tx.find_by_idempotency_key(&lock.holder_id, key).await? {
                let result = replay(&mut *tx, lock, &entry, now).await?;
                tx.rollback().await?;
                return Ok(result);
            }
        }

        // 2. Showtime must exist
        if !tx.showtime_exists(&lock.showtime_id).await? {
            tx.rollback().await?;
            warn!("Lock request for unknown showtime {}", lock.showtime_id);
            return Ok(SeatLockResult::showtime_not_found(&lock.showtime_id, lock.seat_numbers.clone()));
        }

        // 3. Lock the seat rows in sorted order
        let mut seats = tx.select_seats_for_update(&lock.showtime_id, &lock.seat_numbers).await?;
        if seats.len() != lock.seat_numbers.len() {
            let missing: Vec<String> = lock
                .seat_numbers
                .iter()
                .filter(|n| !seats.iter().any(|s| &s.seat_number == *n))
                .cloned()
                .collect();
            tx.rollback().await?;
            warn!("Seats not found on {}: {:?}", lock.showtime_id, missing);
            return Ok(SeatLockResult::not_found(missing));
        }

        // 4. Expired holds no longer count
        for seat in seats.iter_mut() {
            if seat.reclaim_if_expired(now) {
                debug!("Lazily reclaimed expired hold on {}/{}", seat.showtime_id, seat.seat_number);
            }
        }

        // 5. All or nothing
        let conflicts: Vec<String> = seats
            .iter()
            .filter(|s| s.blocks(&lock.holder_id, now))
            .map(|s| s.seat_number.clone())
            .collect();
        if !conflicts.is_empty() {
            tx.rollback().await?;
            warn!("Seats unavailable for {} on {}: {:?}", lock.holder_id, lock.showtime_id, conflicts);
            return Ok(SeatLockResult::conflict(conflicts));
        }

        // 6. Ledger entry and seat holds commit together
        let entry = LockLedgerEntry::grant(
            lock.holder_id.as_str(),
            lock.showtime_id.as_str(),
            lock.seat_numbers.clone(),
            lock.idempotency_key.clone(),
            lock.ttl(),
            now,
        );
        tx.insert_ledger_entry(&entry).await?;
        for seat in seats.iter_mut() {
            seat.lock(&entry.holder_id, entry.lock_id, entry.expires_at, now)?;
        }
        tx.update_seats(&seats).await?;
        tx.commit().await?;

        info!(
            "Locked {:?} on {} for {} as {} until {}",
            entry.seat_numbers, entry.showtime_id, entry.holder_id, entry.lock_id, entry.expires_at
        );
        Ok(SeatLockResult::granted(&entry))
    }

    /// Returns the entry's seats to AVAILABLE. False when the lock is unknown,
    /// already resolved, or held by someone else.
    pub async fn release_lock(&self, lock_id: Uuid, holder_id: &str) -> CoreResult<bool> {
        self.retry
            .run("release_lock", || self.try_release_lock(lock_id, holder_id))
            .await
    }

    async fn try_release_lock(&self, lock_id: Uuid, holder_id: &str) -> CoreResult<bool> {
        let mut tx = self.store.begin(self.rules.lock_wait()).await?;

        let Some(mut entry) = self.authorized_entry(&mut *tx, lock_id, holder_id, "release").await? else {
            tx.rollback().await?;
            return Ok(false);
        };

        let now = self.clock.now();
        let released = close_entry(&mut *tx, &mut entry, LockResolution::Released, now).await?;
        tx.commit().await?;

        info!("Released lock {} for {} ({} seats)", lock_id, holder_id, released);
        Ok(true)
    }

    /// Books every seat of the lock for `user_id`, or none. False when the lock
    /// is unknown, resolved, expired, held by someone else, or no longer holds
    /// all of its seats.
    pub async fn confirm_booking(&self, lock_id: Uuid, holder_id: &str, user_id: &str) -> CoreResult<bool> {
        if user_id.trim().is_empty() {
            warn!("Refusing confirmation of lock {} without a user id", lock_id);
            return Ok(false);
        }

        self.retry
            .run("confirm_booking", || self.try_confirm_booking(lock_id, holder_id, user_id))
            .await
    }

    async fn try_confirm_booking(&self, lock_id: Uuid, holder_id: &str, user_id: &str) -> CoreResult<bool> {
        let mut tx = self.store.begin(self.rules.lock_wait()).await?;

        let Some(mut entry) = self.authorized_entry(&mut *tx, lock_id, holder_id, "confirm").await? else {
            tx.rollback().await?;
            return Ok(false);
        };

        let now = self.clock.now();
        if entry.is_expired(now) {
            tx.rollback().await?;
            warn!("Lock {} expired at {}, refusing confirmation", lock_id, entry.expires_at);
            return Ok(false);
        }

        let mut seats = tx.select_seats_for_update(&entry.showtime_id, &entry.seat_numbers).await?;
        let intact = seats.len() == entry.seat_numbers.len()
            && seats.iter().all(|s| s.is_held_by(holder_id, lock_id));
        if !intact {
            tx.rollback().await?;
            warn!("Lock {} no longer holds all of {:?}, refusing confirmation", lock_id, entry.seat_numbers);
            return Ok(false);
        }

        for seat in seats.iter_mut() {
            seat.book(user_id, lock_id, now)?;
        }
        tx.update_seats(&seats).await?;
        entry.close(LockResolution::Confirmed, now);
        tx.update_ledger_entry(&entry).await?;
        tx.commit().await?;

        info!("Confirmed lock {} for user {} ({} seats)", lock_id, user_id, seats.len());
        Ok(true)
    }

    /// Closes an active entry whose hold has lapsed. Returns the number of
    /// seats released, or None when the entry was resolved or renewed meanwhile.
    pub(crate) async fn expire_lock(&self, lock_id: Uuid) -> CoreResult<Option<usize>> {
        self.retry.run("expire_lock", || self.try_expire_lock(lock_id)).await
    }

    async fn try_expire_lock(&self, lock_id: Uuid) -> CoreResult<Option<usize>> {
        let mut tx = self.store.begin(self.rules.lock_wait()).await?;

        let now = self.clock.now();
        let entry = tx.select_ledger_entry_for_update(lock_id).await?;
        let Some(mut entry) = entry.filter(|e| e.active && e.is_expired(now)) else {
            tx.rollback().await?;
            return Ok(None);
        };

        let released = close_entry(&mut *tx, &mut entry, LockResolution::Expired, now).await?;
        tx.commit().await?;

        info!("Expired lock {} of {} ({} seats released)", lock_id, entry.holder_id, released);
        Ok(Some(released))
    }

    /// Administrative toggle between AVAILABLE and MAINTENANCE. False when the
    /// seat is unknown or in any other state.
    pub async fn set_maintenance(&self, showtime_id: &str, seat_number: &str, enabled: bool) -> CoreResult<bool> {
        self.retry
            .run("set_maintenance", || self.try_set_maintenance(showtime_id, seat_number, enabled))
            .await
    }

    async fn try_set_maintenance(&self, showtime_id: &str, seat_number: &str, enabled: bool) -> CoreResult<bool> {
        let mut tx = self.store.begin(self.rules.lock_wait()).await?;

        let mut seats = tx
            .select_seats_for_update(showtime_id, &[seat_number.to_string()])
            .await?;
        let Some(seat) = seats.first_mut() else {
            tx.rollback().await?;
            warn!("Maintenance toggle for unknown seat {}/{}", showtime_id, seat_number);
            return Ok(false);
        };

        let now = self.clock.now();
        let outcome = if enabled {
            seat.reclaim_if_expired(now);
            seat.enter_maintenance(now)
        } else {
            seat.leave_maintenance(now)
        };

        if let Err(e) = outcome {
            tx.rollback().await?;
            warn!("Maintenance toggle refused: {}", e);
            return Ok(false);
        }

        tx.update_seats(&seats).await?;
        tx.commit().await?;

        let status = if enabled { SeatStatus::Maintenance } else { SeatStatus::Available };
        info!("Seat {}/{} is now {}", showtime_id, seat_number, status);
        Ok(true)
    }

    /// Locks the ledger row and checks it may be resolved by `holder_id`.
    async fn authorized_entry(
        &self,
        tx: &mut dyn InventoryTransaction,
        lock_id: Uuid,
        holder_id: &str,
        action: &str,
    ) -> CoreResult<Option<LockLedgerEntry>> {
        match tx.select_ledger_entry_for_update(lock_id).await? {
            Some(entry) if entry.authorizes(holder_id) => Ok(Some(entry)),
            Some(entry) if !entry.active => {
                warn!("Unauthorized {} of lock {}: already {:?}", action, lock_id, entry.resolution);
                Ok(None)
            }
            Some(_) => {
                warn!("Unauthorized {} of lock {} by {}", action, lock_id, holder_id);
                Ok(None)
            }
            None => {
                warn!("Unauthorized {} of lock {}: not found", action, lock_id);
                Ok(None)
            }
        }
    }
}

/// Answers a request whose idempotency key is already in the ledger. Only a
/// live hold on exactly the requested seats replays as a success.
async fn replay(
    tx: &mut dyn InventoryTransaction,
    lock: &ValidatedLock,
    entry: &LockLedgerEntry,
    now: DateTime<Utc>,
) -> CoreResult<SeatLockResult> {
    let key = entry.idempotency_key.as_deref().unwrap_or_default();

    if entry.showtime_id != lock.showtime_id || entry.seat_numbers != lock.seat_numbers {
        warn!(
            "Idempotency key {} of {} already used by lock {} for {} {:?}",
            key, lock.holder_id, entry.lock_id, entry.showtime_id, entry.seat_numbers
        );
        return Ok(SeatLockResult::key_reused(entry, lock.seat_numbers.clone()));
    }

    let intact = entry.active && !entry.is_expired(now) && {
        let seats = tx.select_seats_for_update(&entry.showtime_id, &entry.seat_numbers).await?;
        seats.len() == entry.seat_numbers.len()
            && seats.iter().all(|s| s.is_held_by(&entry.holder_id, entry.lock_id))
    };
    if !intact {
        warn!("Idempotency key {} of {} names lapsed lock {}", key, lock.holder_id, entry.lock_id);
        return Ok(SeatLockResult::lapsed(entry, now));
    }

    info!("Replaying lock {} for {} (key {})", entry.lock_id, lock.holder_id, key);
    Ok(SeatLockResult::replayed(entry))
}

/// Releases the seats still held under `entry` and deactivates it. Seats that
/// were re-locked, booked or reclaimed in the meantime are left alone.
async fn close_entry(
    tx: &mut dyn InventoryTransaction,
    entry: &mut LockLedgerEntry,
    resolution: LockResolution,
    now: DateTime<Utc>,
) -> CoreResult<usize> {
    // Ledger row is already locked; seat rows come second
    let seats = tx.select_seats_for_update(&entry.showtime_id, &entry.seat_numbers).await?;

    let mut released = Vec::new();
    for mut seat in seats {
        if seat.is_held_by(&entry.holder_id, entry.lock_id) {
            seat.release(now)?;
            released.push(seat);
        }
    }

    if !released.is_empty() {
        tx.update_seats(&released).await?;
    }
    entry.close(resolution, now);
    tx.update_ledger_entry(entry).await?;
    Ok(released.len())
}
