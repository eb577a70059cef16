use uuid::Uuid;

use marquee_core::request::normalize_seat_numbers;
use marquee_core::{AvailabilityReport, CoreResult, LockLedgerEntry, Seat, SeatStatus};

use crate::manager::LockManager;

// Committed reads only. None of these take row locks or mutate anything:
// an expired hold reads as AVAILABLE until someone reclaims it.
impl LockManager {
    /// True iff every named seat exists and is logically available. An empty
    /// selection is never available.
    pub async fn check_availability(&self, showtime_id: &str, seat_numbers: &[String]) -> CoreResult<bool> {
        Ok(self.availability_report(showtime_id, seat_numbers).await?.available)
    }

    pub async fn availability_report(&self, showtime_id: &str, seat_numbers: &[String]) -> CoreResult<AvailabilityReport> {
        let requested = normalize_seat_numbers(seat_numbers);
        if requested.is_empty() {
            return Ok(AvailabilityReport::new(showtime_id, Vec::new(), Vec::new(), 0));
        }

        let seats = self.store().fetch_seats(showtime_id, &requested).await?;
        let now = self.now();

        let missing = requested
            .iter()
            .filter(|n| !seats.iter().any(|s| &s.seat_number == *n))
            .cloned()
            .collect();
        let unavailable = seats
            .iter()
            .filter(|s| !s.is_available_at(now))
            .map(|s| s.seat_number.clone())
            .collect();

        Ok(AvailabilityReport::new(showtime_id, unavailable, missing, requested.len()))
    }

    pub async fn showtime_exists(&self, showtime_id: &str) -> CoreResult<bool> {
        Ok(self.store().showtime_exists(showtime_id).await?)
    }

    /// All seats of the showtime ordered by seat number, optionally filtered
    /// by their logical status.
    pub async fn seat_map(&self, showtime_id: &str, status: Option<SeatStatus>) -> CoreResult<Vec<Seat>> {
        let now = self.now();
        let seats = self.store().list_seats(showtime_id, None).await?;

        Ok(seats
            .iter()
            .map(|seat| seat.logical_view(now))
            .filter(|seat| status.map_or(true, |wanted| seat.status == wanted))
            .collect())
    }

    pub async fn available_seats(&self, showtime_id: &str) -> CoreResult<Vec<Seat>> {
        self.seat_map(showtime_id, Some(SeatStatus::Available)).await
    }

    pub async fn lock_details(&self, lock_id: Uuid) -> CoreResult<Option<LockLedgerEntry>> {
        Ok(self.store().find_ledger_entry(lock_id).await?)
    }

    /// Unexpired active holds on the showtime
    pub async fn active_locks(&self, showtime_id: &str) -> CoreResult<Vec<LockLedgerEntry>> {
        let now = self.now();
        let entries = self.store().active_ledger_entries(showtime_id).await?;
        Ok(entries.into_iter().filter(|e| !e.is_expired(now)).collect())
    }

    /// Every ledger entry of the holder, resolved ones included
    pub async fn locks_for_holder(&self, holder_id: &str) -> CoreResult<Vec<LockLedgerEntry>> {
        Ok(self.store().ledger_entries_for_holder(holder_id).await?)
    }
}
