use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::LockLedgerEntry;
use crate::request::ValidationError;

/// Why a lock request was refused. None of these leave side effects behind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockFailure {
    NotFound,
    Conflict,
    Busy,
    Invalid,
}

/// Structured answer to a lock request. Business refusals are values, never errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatLockResult {
    pub success: bool,
    pub lock_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub failure: Option<LockFailure>,
    /// Locked seats on success, offending or missing seats on failure
    pub seats: Vec<String>,
    pub message: String,
    /// Answered from an earlier request with the same idempotency key
    #[serde(default)]
    pub replayed: bool,
}

impl SeatLockResult {
    pub fn granted(entry: &LockLedgerEntry) -> Self {
        Self {
            success: true,
            lock_id: Some(entry.lock_id),
            expires_at: Some(entry.expires_at),
            failure: None,
            seats: entry.seat_numbers.clone(),
            message: "Seats locked successfully".to_string(),
            replayed: false,
        }
    }

    pub fn replayed(entry: &LockLedgerEntry) -> Self {
        Self {
            message: "Seats already locked for this idempotency key".to_string(),
            replayed: true,
            ..Self::granted(entry)
        }
    }

    /// The idempotency key already names a different request
    pub fn key_reused(entry: &LockLedgerEntry, seats: Vec<String>) -> Self {
        let message = format!(
            "Idempotency key already used by lock {} for {} {:?}",
            entry.lock_id, entry.showtime_id, entry.seat_numbers
        );
        Self::refused(LockFailure::Invalid, seats, message)
    }

    /// The idempotency key names a hold that no longer covers its seats
    pub fn lapsed(entry: &LockLedgerEntry, now: DateTime<Utc>) -> Self {
        let state = match entry.resolution {
            Some(resolution) => resolution.as_str(),
            None if entry.is_expired(now) => "EXPIRED",
            None => "SUPERSEDED",
        };
        let message = format!("Lock {} for this idempotency key is no longer held ({})", entry.lock_id, state);
        Self::refused(LockFailure::Conflict, entry.seat_numbers.clone(), message)
    }

    pub fn showtime_not_found(showtime_id: &str, seats: Vec<String>) -> Self {
        Self::refused(LockFailure::NotFound, seats, format!("Showtime not found: {}", showtime_id))
    }

    pub fn not_found(seats: Vec<String>) -> Self {
        let message = format!("Seats not found: {:?}", seats);
        Self::refused(LockFailure::NotFound, seats, message)
    }

    pub fn conflict(seats: Vec<String>) -> Self {
        let message = format!("Seats unavailable: {:?}", seats);
        Self::refused(LockFailure::Conflict, seats, message)
    }

    pub fn busy(seats: Vec<String>) -> Self {
        Self::refused(
            LockFailure::Busy,
            seats,
            "Seats are being modified by another request, try again".to_string(),
        )
    }

    pub fn invalid(err: &ValidationError) -> Self {
        Self::refused(LockFailure::Invalid, Vec::new(), err.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    fn refused(failure: LockFailure, seats: Vec<String>, message: String) -> Self {
        Self {
            success: false,
            lock_id: None,
            expires_at: None,
            failure: Some(failure),
            seats,
            message,
            replayed: false,
        }
    }
}

/// Availability of a seat selection, with the reasons when it is not available
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailabilityReport {
    pub showtime_id: String,
    pub available: bool,
    pub unavailable: Vec<String>,
    pub missing: Vec<String>,
    pub message: String,
}

impl AvailabilityReport {
    pub fn new(showtime_id: &str, unavailable: Vec<String>, missing: Vec<String>, requested: usize) -> Self {
        let available = requested > 0 && unavailable.is_empty() && missing.is_empty();
        let message = if available {
            "All seats are available".to_string()
        } else if requested == 0 {
            "No seats requested".to_string()
        } else {
            "Some seats are not available".to_string()
        };

        Self {
            showtime_id: showtime_id.to_string(),
            available,
            unavailable,
            missing,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LockResolution;
    use chrono::Duration;

    #[test]
    fn test_granted_carries_lock() {
        let entry = LockLedgerEntry::grant("U1", "SH1", vec!["A1".into()], None, Duration::seconds(60), Utc::now());
        let result = SeatLockResult::granted(&entry);
        assert!(result.is_success());
        assert_eq!(result.lock_id, Some(entry.lock_id));
        assert_eq!(result.expires_at, Some(entry.expires_at));
        assert!(result.failure.is_none());

        let replay = SeatLockResult::replayed(&entry);
        assert!(replay.replayed);
        assert_eq!(replay.lock_id, result.lock_id);
    }

    #[test]
    fn test_conflict_lists_seats() {
        let result = SeatLockResult::conflict(vec!["A2".into()]);
        assert!(!result.is_success());
        assert_eq!(result.failure, Some(LockFailure::Conflict));
        assert_eq!(result.seats, vec!["A2"]);
        assert!(result.lock_id.is_none());
        assert!(result.message.contains("A2"));
    }

    #[test]
    fn test_lapsed_names_how_the_hold_ended() {
        let now = Utc::now();
        let mut entry = LockLedgerEntry::grant("U1", "SH1", vec!["A1".into()], Some("k".into()), Duration::seconds(1), now);

        let superseded = SeatLockResult::lapsed(&entry, now);
        assert_eq!(superseded.failure, Some(LockFailure::Conflict));
        assert_eq!(superseded.seats, vec!["A1"]);
        assert!(superseded.message.ends_with("(SUPERSEDED)"));

        assert!(SeatLockResult::lapsed(&entry, now + Duration::seconds(5)).message.ends_with("(EXPIRED)"));

        entry.close(LockResolution::Released, now);
        let released = SeatLockResult::lapsed(&entry, now);
        assert!(!released.is_success());
        assert!(released.lock_id.is_none());
        assert!(released.message.ends_with("(RELEASED)"));

        let reused = SeatLockResult::key_reused(&entry, vec!["B1".into()]);
        assert_eq!(reused.failure, Some(LockFailure::Invalid));
        assert_eq!(reused.seats, vec!["B1"]);
    }

    #[test]
    fn test_empty_selection_is_not_available() {
        let report = AvailabilityReport::new("SH1", vec![], vec![], 0);
        assert!(!report.available);
    }

    #[test]
    fn test_failure_wire_format() {
        let json = serde_json::to_value(SeatLockResult::busy(vec!["A1".into()])).unwrap();
        assert_eq!(json["failure"], "BUSY");
        assert_eq!(json["success"], false);
    }
}
