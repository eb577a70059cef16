use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Upper bound on any hold, whatever the configured maximum
pub const HOLD_CEILING_SECONDS: u64 = 7 * 24 * 60 * 60;

/// A lock request as it arrives from a calling layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRequest {
    pub showtime_id: String,
    pub seat_numbers: Vec<String>,
    pub holder_id: String,
    /// Zero or negative means "use the configured default"
    #[serde(default)]
    pub ttl_seconds: i64,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl LockRequest {
    pub fn new(
        showtime_id: impl Into<String>,
        seat_numbers: &[&str],
        holder_id: impl Into<String>,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            showtime_id: showtime_id.into(),
            seat_numbers: seat_numbers.iter().map(|s| s.to_string()).collect(),
            holder_id: holder_id.into(),
            ttl_seconds,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Trims, deduplicates and sorts the seat list and resolves the hold duration.
    /// `max_ttl_seconds` is capped at [`HOLD_CEILING_SECONDS`].
    pub fn validate(&self, default_ttl_seconds: u64, max_ttl_seconds: u64) -> Result<ValidatedLock, ValidationError> {
        let max_ttl_seconds = max_ttl_seconds.min(HOLD_CEILING_SECONDS);

        let showtime_id = self.showtime_id.trim();
        if showtime_id.is_empty() {
            return Err(ValidationError::MissingShowtime);
        }

        let holder_id = self.holder_id.trim();
        if holder_id.is_empty() {
            return Err(ValidationError::MissingHolder);
        }

        let seat_numbers = normalize_seat_numbers(&self.seat_numbers);
        if seat_numbers.is_empty() {
            return Err(ValidationError::EmptySeatList);
        }

        let ttl_seconds = if self.ttl_seconds <= 0 {
            default_ttl_seconds
        } else {
            self.ttl_seconds as u64
        };
        if ttl_seconds > max_ttl_seconds {
            return Err(ValidationError::TtlTooLong {
                requested: ttl_seconds,
                max: max_ttl_seconds,
            });
        }

        let idempotency_key = match self.idempotency_key.as_deref().map(str::trim) {
            Some("") => return Err(ValidationError::BlankIdempotencyKey),
            Some(key) => Some(key.to_string()),
            None => None,
        };

        Ok(ValidatedLock {
            showtime_id: showtime_id.to_string(),
            seat_numbers,
            holder_id: holder_id.to_string(),
            ttl_seconds,
            idempotency_key,
        })
    }
}

/// Lock request after validation: seat numbers are unique and in acquisition order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLock {
    pub showtime_id: String,
    pub seat_numbers: Vec<String>,
    pub holder_id: String,
    pub ttl_seconds: u64,
    pub idempotency_key: Option<String>,
}

impl ValidatedLock {
    pub fn ttl(&self) -> Duration {
        let seconds = self.ttl_seconds.min(HOLD_CEILING_SECONDS) as i64;
        Duration::try_seconds(seconds).unwrap_or_else(Duration::zero)
    }
}

/// Trimmed, deduplicated, byte-wise sorted seat numbers. Every store acquires
/// seat rows in this order.
pub fn normalize_seat_numbers(seat_numbers: &[String]) -> Vec<String> {
    seat_numbers
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("At least one seat number is required")]
    EmptySeatList,

    #[error("Showtime id is required")]
    MissingShowtime,

    #[error("Holder id is required")]
    MissingHolder,

    #[error("Hold of {requested}s exceeds the maximum of {max}s")]
    TtlTooLong { requested: u64, max: u64 },

    #[error("Idempotency key must not be blank")]
    BlankIdempotencyKey,
}
