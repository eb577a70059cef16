use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How a ledger entry was closed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockResolution {
    Released,
    Confirmed,
    Expired,
}

impl LockResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockResolution::Released => "RELEASED",
            LockResolution::Confirmed => "CONFIRMED",
            LockResolution::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for LockResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown lock resolution: {0}")]
pub struct UnknownResolution(pub String);

impl FromStr for LockResolution {
    type Err = UnknownResolution;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RELEASED" => Ok(LockResolution::Released),
            "CONFIRMED" => Ok(LockResolution::Confirmed),
            "EXPIRED" => Ok(LockResolution::Expired),
            other => Err(UnknownResolution(other.to_string())),
        }
    }
}

/// Durable record of one granted hold. One entry covers every seat of the
/// request; entries are deactivated, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockLedgerEntry {
    pub lock_id: Uuid,
    pub holder_id: String,
    pub showtime_id: String,
    pub seat_numbers: Vec<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub released_at: Option<DateTime<Utc>>,
    pub resolution: Option<LockResolution>,
}

impl LockLedgerEntry {
    /// A fresh, active entry with a new lock id
    pub fn grant(
        holder_id: impl Into<String>,
        showtime_id: impl Into<String>,
        seat_numbers: Vec<String>,
        idempotency_key: Option<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            lock_id: Uuid::new_v4(),
            holder_id: holder_id.into(),
            showtime_id: showtime_id.into(),
            seat_numbers,
            idempotency_key,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            active: true,
            released_at: None,
            resolution: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Does this entry authorize `holder_id` to release or confirm it?
    pub fn authorizes(&self, holder_id: &str) -> bool {
        self.active && self.holder_id == holder_id
    }

    pub fn close(&mut self, resolution: LockResolution, now: DateTime<Utc>) {
        self.active = false;
        self.released_at = Some(now);
        self.resolution = Some(resolution);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_and_close() {
        let now = Utc::now();
        let mut entry = LockLedgerEntry::grant(
            "U1",
            "SH1",
            vec!["A1".to_string(), "A2".to_string()],
            None,
            Duration::seconds(300),
            now,
        );

        assert!(entry.active);
        assert_eq!(entry.expires_at, now + Duration::seconds(300));
        assert!(entry.authorizes("U1"));
        assert!(!entry.authorizes("U2"));
        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + Duration::seconds(301)));

        entry.close(LockResolution::Released, now);
        assert!(!entry.active);
        assert_eq!(entry.released_at, Some(now));
        assert_eq!(entry.resolution, Some(LockResolution::Released));
        assert!(!entry.authorizes("U1"));
    }

    #[test]
    fn test_expiry_saturates_past_calendar_end() {
        let now = Utc::now();
        let ttl = Duration::try_days(100_000_000).unwrap();
        let entry = LockLedgerEntry::grant("U1", "SH1", vec!["A1".into()], None, ttl, now);
        assert_eq!(entry.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!entry.is_expired(now));
    }

    #[test]
    fn test_lock_ids_are_unique() {
        let now = Utc::now();
        let a = LockLedgerEntry::grant("U1", "SH1", vec!["A1".into()], None, Duration::seconds(1), now);
        let b = LockLedgerEntry::grant("U1", "SH1", vec!["A1".into()], None, Duration::seconds(1), now);
        assert_ne!(a.lock_id, b.lock_id);
    }

    #[test]
    fn test_resolution_parsing() {
        assert_eq!("CONFIRMED".parse::<LockResolution>().unwrap(), LockResolution::Confirmed);
        assert!("DONE".parse::<LockResolution>().is_err());
    }
}
