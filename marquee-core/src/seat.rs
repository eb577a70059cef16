use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Seat lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Locked,
    Booked,
    Maintenance,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Locked => "LOCKED",
            SeatStatus::Booked => "BOOKED",
            SeatStatus::Maintenance => "MAINTENANCE",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatStatus {
    type Err = SeatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(SeatStatus::Available),
            "LOCKED" => Ok(SeatStatus::Locked),
            "BOOKED" => Ok(SeatStatus::Booked),
            "MAINTENANCE" => Ok(SeatStatus::Maintenance),
            other => Err(SeatError::UnknownStatus(other.to_string())),
        }
    }
}

/// Layout description used when a showtime's seats are provisioned
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatSpec {
    pub seat_number: String,
    pub row_label: Option<String>,
    pub category: Option<String>,
}

impl SeatSpec {
    pub fn new(seat_number: impl Into<String>) -> Self {
        Self {
            seat_number: seat_number.into(),
            row_label: None,
            category: None,
        }
    }

    /// Rectangular layout: rows ["A", "B"] with 3 seats each gives A1..A3, B1..B3
    pub fn grid(rows: &[&str], seats_per_row: u32, category: Option<&str>) -> Vec<SeatSpec> {
        rows.iter()
            .flat_map(|row| {
                (1..=seats_per_row).map(move |n| SeatSpec {
                    seat_number: format!("{}{}", row, n),
                    row_label: Some(row.to_string()),
                    category: category.map(str::to_string),
                })
            })
            .collect()
    }
}

/// A bookable seat scoped to one showtime.
///
/// Hold fields (`holder_id`, `lock_id`, `locked_until`) are populated only while
/// LOCKED; booking fields only once BOOKED. The transition methods below are the
/// only code paths that change `status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Seat {
    pub showtime_id: String,
    pub seat_number: String,
    pub row_label: Option<String>,
    pub category: Option<String>,
    pub status: SeatStatus,
    pub holder_id: Option<String>,
    pub lock_id: Option<Uuid>,
    pub locked_until: Option<DateTime<Utc>>,
    pub booking_id: Option<Uuid>,
    pub booked_by: Option<String>,
    pub booked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Seat {
    pub fn new(showtime_id: impl Into<String>, spec: &SeatSpec, now: DateTime<Utc>) -> Self {
        Self {
            showtime_id: showtime_id.into(),
            seat_number: spec.seat_number.clone(),
            row_label: spec.row_label.clone(),
            category: spec.category.clone(),
            status: SeatStatus::Available,
            holder_id: None,
            lock_id: None,
            locked_until: None,
            booking_id: None,
            booked_by: None,
            booked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// LOCKED with an expiry that has already passed. A LOCKED row without an
    /// expiry is treated as expired so it can never block forever.
    pub fn is_lock_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Locked && self.locked_until.map_or(true, |until| until < now)
    }

    /// Available from a caller's point of view, even if an expired hold has not
    /// been physically reclaimed yet.
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Available || self.is_lock_expired(now)
    }

    /// Held under this exact ledger entry.
    pub fn is_held_by(&self, holder_id: &str, lock_id: Uuid) -> bool {
        self.status == SeatStatus::Locked
            && self.holder_id.as_deref() == Some(holder_id)
            && self.lock_id == Some(lock_id)
    }

    /// Would a lock request from `holder_id` be refused because of this seat?
    pub fn blocks(&self, holder_id: &str, now: DateTime<Utc>) -> bool {
        match self.status {
            SeatStatus::Available => false,
            SeatStatus::Booked | SeatStatus::Maintenance => true,
            SeatStatus::Locked => {
                !self.is_lock_expired(now) && self.holder_id.as_deref() != Some(holder_id)
            }
        }
    }

    /// AVAILABLE -> LOCKED, or a re-lock by the current holder.
    pub fn lock(
        &mut self,
        holder_id: &str,
        lock_id: Uuid,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), SeatError> {
        let relock = self.status == SeatStatus::Locked && self.holder_id.as_deref() == Some(holder_id);
        if self.status != SeatStatus::Available && !relock {
            return Err(self.invalid(SeatStatus::Locked));
        }

        self.status = SeatStatus::Locked;
        self.holder_id = Some(holder_id.to_string());
        self.lock_id = Some(lock_id);
        self.locked_until = Some(until);
        self.updated_at = now;
        Ok(())
    }

    /// LOCKED -> AVAILABLE
    pub fn release(&mut self, now: DateTime<Utc>) -> Result<(), SeatError> {
        if self.status != SeatStatus::Locked {
            return Err(self.invalid(SeatStatus::Available));
        }

        self.status = SeatStatus::Available;
        self.clear_hold();
        self.updated_at = now;
        Ok(())
    }

    /// Lazy reclaim: flips an expired hold back to AVAILABLE. Returns whether
    /// anything changed.
    pub fn reclaim_if_expired(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_lock_expired(now) {
            return false;
        }
        self.status = SeatStatus::Available;
        self.clear_hold();
        self.updated_at = now;
        true
    }

    /// LOCKED -> BOOKED (terminal)
    pub fn book(&mut self, user_id: &str, booking_id: Uuid, now: DateTime<Utc>) -> Result<(), SeatError> {
        if self.status != SeatStatus::Locked {
            return Err(self.invalid(SeatStatus::Booked));
        }

        self.status = SeatStatus::Booked;
        self.clear_hold();
        self.booking_id = Some(booking_id);
        self.booked_by = Some(user_id.to_string());
        self.booked_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// AVAILABLE -> MAINTENANCE
    pub fn enter_maintenance(&mut self, now: DateTime<Utc>) -> Result<(), SeatError> {
        if self.status != SeatStatus::Available {
            return Err(self.invalid(SeatStatus::Maintenance));
        }
        self.status = SeatStatus::Maintenance;
        self.updated_at = now;
        Ok(())
    }

    /// MAINTENANCE -> AVAILABLE
    pub fn leave_maintenance(&mut self, now: DateTime<Utc>) -> Result<(), SeatError> {
        if self.status != SeatStatus::Maintenance {
            return Err(self.invalid(SeatStatus::Available));
        }
        self.status = SeatStatus::Available;
        self.updated_at = now;
        Ok(())
    }

    /// The seat as callers should see it at `now`: expired holds read as AVAILABLE.
    pub fn logical_view(&self, now: DateTime<Utc>) -> Seat {
        let mut view = self.clone();
        if view.is_lock_expired(now) {
            view.status = SeatStatus::Available;
            view.clear_hold();
        }
        view
    }

    pub fn check_invariants(&self) -> Result<(), SeatError> {
        let hold_fields = [
            self.holder_id.is_some(),
            self.lock_id.is_some(),
            self.locked_until.is_some(),
        ];
        let booking_fields = [
            self.booking_id.is_some(),
            self.booked_by.is_some(),
            self.booked_at.is_some(),
        ];
        let any_hold = hold_fields.iter().any(|f| *f);
        let any_booking = booking_fields.iter().any(|f| *f);

        let violation = match self.status {
            SeatStatus::Locked if !hold_fields.iter().all(|f| *f) => Some("LOCKED seat without complete hold"),
            SeatStatus::Locked if any_booking => Some("LOCKED seat carries booking fields"),
            SeatStatus::Booked if any_hold => Some("BOOKED seat carries hold fields"),
            SeatStatus::Booked if !booking_fields.iter().all(|f| *f) => Some("BOOKED seat without complete booking"),
            SeatStatus::Available | SeatStatus::Maintenance if any_hold || any_booking => {
                Some("unheld seat carries hold or booking fields")
            }
            _ => None,
        };

        match violation {
            Some(reason) => Err(SeatError::InvariantViolation {
                seat: self.seat_number.clone(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn clear_hold(&mut self) {
        self.holder_id = None;
        self.lock_id = None;
        self.locked_until = None;
    }

    fn invalid(&self, to: SeatStatus) -> SeatError {
        SeatError::InvalidTransition {
            seat: self.seat_number.clone(),
            from: self.status,
            to,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeatError {
    #[error("Invalid seat transition for {seat}: {from} -> {to}")]
    InvalidTransition {
        seat: String,
        from: SeatStatus,
        to: SeatStatus,
    },

    #[error("Seat {seat} violates state invariant: {reason}")]
    InvariantViolation { seat: String, reason: String },

    #[error("Unknown seat status: {0}")]
    UnknownStatus(String),
}
