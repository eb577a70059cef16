use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use marquee_core::repository::{InventoryStore, InventoryTransaction, SeatProvisioning, StoreError};
use marquee_core::{LockLedgerEntry, LockResolution, Seat, SeatSpec, SeatStatus};

const SEAT_COLUMNS: &str = "showtime_id, seat_number, row_label, category, status, holder_id, lock_id, \
     locked_until, booking_id, booked_by, booked_at, created_at, updated_at";

const LEDGER_COLUMNS: &str = "lock_id, holder_id, showtime_id, seat_numbers, idempotency_key, \
     created_at, expires_at, is_active, released_at, resolution";

pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SeatRow {
    showtime_id: String,
    seat_number: String,
    row_label: Option<String>,
    category: Option<String>,
    status: String,
    holder_id: Option<String>,
    lock_id: Option<Uuid>,
    locked_until: Option<DateTime<Utc>>,
    booking_id: Option<Uuid>,
    booked_by: Option<String>,
    booked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SeatRow> for Seat {
    type Error = StoreError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<SeatStatus>()
            .map_err(|e| StoreError::Corrupt(format!("seat {}/{}: {}", row.showtime_id, row.seat_number, e)))?;

        Ok(Seat {
            showtime_id: row.showtime_id,
            seat_number: row.seat_number,
            row_label: row.row_label,
            category: row.category,
            status,
            holder_id: row.holder_id,
            lock_id: row.lock_id,
            locked_until: row.locked_until,
            booking_id: row.booking_id,
            booked_by: row.booked_by,
            booked_at: row.booked_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    lock_id: Uuid,
    holder_id: String,
    showtime_id: String,
    seat_numbers: Vec<String>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_active: bool,
    released_at: Option<DateTime<Utc>>,
    resolution: Option<String>,
}

impl TryFrom<LedgerRow> for LockLedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let resolution = row
            .resolution
            .as_deref()
            .map(str::parse::<LockResolution>)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("lock {}: {}", row.lock_id, e)))?;

        Ok(LockLedgerEntry {
            lock_id: row.lock_id,
            holder_id: row.holder_id,
            showtime_id: row.showtime_id,
            seat_numbers: row.seat_numbers,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            expires_at: row.expires_at,
            active: row.is_active,
            released_at: row.released_at,
            resolution,
        })
    }
}

fn into_seats(rows: Vec<SeatRow>) -> Result<Vec<Seat>, StoreError> {
    rows.into_iter().map(Seat::try_from).collect()
}

fn into_entries(rows: Vec<LedgerRow>) -> Result<Vec<LockLedgerEntry>, StoreError> {
    rows.into_iter().map(LockLedgerEntry::try_from).collect()
}

/// Maps driver failures onto the store taxonomy by SQLSTATE.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("40001") => StoreError::Serialization(err.to_string()),
            Some("40P01") => StoreError::Deadlock(err.to_string()),
            Some("55P03") | Some("57014") => StoreError::LockTimeout(err.to_string()),
            Some("23505") => StoreError::UniqueViolation(err.to_string()),
            _ => StoreError::Query(err.to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Unavailable(err.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => StoreError::Corrupt(err.to_string()),
        _ => StoreError::Query(err.to_string()),
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn begin(&self, lock_wait: Duration) -> Result<Box<dyn InventoryTransaction>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // lock_timeout applies to each row lock on its own. statement_timeout
        // caps a multi-row FOR UPDATE as a whole, so one select waits at most
        // `lock_wait` however many seats it covers. SET takes no bind parameters.
        let millis = lock_wait.as_millis().max(1);
        for setting in ["lock_timeout", "statement_timeout"] {
            sqlx::query(&format!("SET LOCAL {} = '{}ms'", setting, millis))
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        Ok(Box::new(PgInventoryTransaction { tx: Some(tx) }))
    }

    async fn showtime_exists(&self, showtime_id: &str) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM showtimes WHERE id = $1)")
            .bind(showtime_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn fetch_seats(&self, showtime_id: &str, seat_numbers: &[String]) -> Result<Vec<Seat>, StoreError> {
        let sql = format!(
            "SELECT {} FROM seats WHERE showtime_id = $1 AND seat_number = ANY($2) \
             ORDER BY seat_number COLLATE \"C\"",
            SEAT_COLUMNS
        );
        let rows = sqlx::query_as::<_, SeatRow>(&sql)
            .bind(showtime_id)
            .bind(seat_numbers.to_vec())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        into_seats(rows)
    }

    async fn list_seats(&self, showtime_id: &str, status: Option<SeatStatus>) -> Result<Vec<Seat>, StoreError> {
        let sql = format!(
            "SELECT {} FROM seats WHERE showtime_id = $1 AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY seat_number COLLATE \"C\"",
            SEAT_COLUMNS
        );
        let rows = sqlx::query_as::<_, SeatRow>(&sql)
            .bind(showtime_id)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        into_seats(rows)
    }

    async fn find_ledger_entry(&self, lock_id: Uuid) -> Result<Option<LockLedgerEntry>, StoreError> {
        let sql = format!("SELECT {} FROM seat_locks WHERE lock_id = $1", LEDGER_COLUMNS);
        let row = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(lock_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(LockLedgerEntry::try_from).transpose()
    }

    async fn expired_ledger_entries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<LockLedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {} FROM seat_locks WHERE is_active AND expires_at < $1 ORDER BY expires_at LIMIT $2",
            LEDGER_COLUMNS
        );
        let rows = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        into_entries(rows)
    }

    async fn active_ledger_entries(&self, showtime_id: &str) -> Result<Vec<LockLedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {} FROM seat_locks WHERE showtime_id = $1 AND is_active ORDER BY created_at",
            LEDGER_COLUMNS
        );
        let rows = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(showtime_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        into_entries(rows)
    }

    async fn ledger_entries_for_holder(&self, holder_id: &str) -> Result<Vec<LockLedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {} FROM seat_locks WHERE holder_id = $1 ORDER BY created_at",
            LEDGER_COLUMNS
        );
        let rows = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(holder_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        into_entries(rows)
    }
}

/// Wraps one Postgres transaction. `SELECT ... FOR UPDATE` gives the row
/// exclusivity; dropping the wrapper rolls the transaction back.
pub struct PgInventoryTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgInventoryTransaction {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx.as_deref_mut().ok_or(StoreError::Closed)
    }
}

#[async_trait]
impl InventoryTransaction for PgInventoryTransaction {
    async fn showtime_exists(&mut self, showtime_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM showtimes WHERE id = $1)")
            .bind(showtime_id)
            .fetch_one(conn)
            .await
            .map_err(map_sqlx_error)
    }

    async fn select_seats_for_update(
        &mut self,
        showtime_id: &str,
        seat_numbers: &[String],
    ) -> Result<Vec<Seat>, StoreError> {
        let conn = self.conn()?;
        // Byte-wise collation keeps the row-lock order identical across transactions
        let sql = format!(
            "SELECT {} FROM seats WHERE showtime_id = $1 AND seat_number = ANY($2) \
             ORDER BY seat_number COLLATE \"C\" FOR UPDATE",
            SEAT_COLUMNS
        );
        let rows = sqlx::query_as::<_, SeatRow>(&sql)
            .bind(showtime_id)
            .bind(seat_numbers.to_vec())
            .fetch_all(conn)
            .await
            .map_err(map_sqlx_error)?;

        into_seats(rows)
    }

    async fn select_ledger_entry_for_update(&mut self, lock_id: Uuid) -> Result<Option<LockLedgerEntry>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM seat_locks WHERE lock_id = $1 FOR UPDATE", LEDGER_COLUMNS);
        let row = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(lock_id)
            .fetch_optional(conn)
            .await
            .map_err(map_sqlx_error)?;

        row.map(LockLedgerEntry::try_from).transpose()
    }

    async fn find_by_idempotency_key(
        &mut self,
        holder_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<LockLedgerEntry>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM seat_locks WHERE holder_id = $1 AND idempotency_key = $2",
            LEDGER_COLUMNS
        );
        let row = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(holder_id)
            .bind(idempotency_key)
            .fetch_optional(conn)
            .await
            .map_err(map_sqlx_error)?;

        row.map(LockLedgerEntry::try_from).transpose()
    }

    async fn insert_ledger_entry(&mut self, entry: &LockLedgerEntry) -> Result<(), StoreError> {
        let conn = self.conn()?;
        sqlx::query(
            r#"
            INSERT INTO seat_locks (lock_id, holder_id, showtime_id, seat_numbers, idempotency_key,
                                    created_at, expires_at, is_active, released_at, resolution)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.lock_id)
        .bind(&entry.holder_id)
        .bind(&entry.showtime_id)
        .bind(entry.seat_numbers.clone())
        .bind(entry.idempotency_key.as_deref())
        .bind(entry.created_at)
        .bind(entry.expires_at)
        .bind(entry.active)
        .bind(entry.released_at)
        .bind(entry.resolution.map(|r| r.as_str()))
        .execute(conn)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn update_ledger_entry(&mut self, entry: &LockLedgerEntry) -> Result<(), StoreError> {
        let conn = self.conn()?;
        sqlx::query("UPDATE seat_locks SET is_active = $2, released_at = $3, resolution = $4 WHERE lock_id = $1")
            .bind(entry.lock_id)
            .bind(entry.active)
            .bind(entry.released_at)
            .bind(entry.resolution.map(|r| r.as_str()))
            .execute(conn)
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn update_seats(&mut self, seats: &[Seat]) -> Result<(), StoreError> {
        let conn = self.conn()?;
        for seat in seats {
            sqlx::query(
                r#"
                UPDATE seats
                SET status = $3, holder_id = $4, lock_id = $5, locked_until = $6,
                    booking_id = $7, booked_by = $8, booked_at = $9, updated_at = $10
                WHERE showtime_id = $1 AND seat_number = $2
                "#,
            )
            .bind(&seat.showtime_id)
            .bind(&seat.seat_number)
            .bind(seat.status.as_str())
            .bind(seat.holder_id.as_deref())
            .bind(seat.lock_id)
            .bind(seat.locked_until)
            .bind(seat.booking_id)
            .bind(seat.booked_by.as_deref())
            .bind(seat.booked_at)
            .bind(seat.updated_at)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        }

        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Closed)?;
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Closed)?;
        tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl SeatProvisioning for PgInventoryStore {
    async fn create_showtime(&self, showtime_id: &str, seats: &[SeatSpec]) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let inserted = sqlx::query("INSERT INTO showtimes (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(showtime_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        if inserted == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(false);
        }

        let now = Utc::now();
        for spec in seats {
            sqlx::query(
                r#"
                INSERT INTO seats (showtime_id, seat_number, row_label, category, status, created_at, updated_at)
                VALUES ($1, $2, $3, $4, 'AVAILABLE', $5, $5)
                "#,
            )
            .bind(showtime_id)
            .bind(&spec.seat_number)
            .bind(spec.row_label.as_deref())
            .bind(spec.category.as_deref())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_unavailable() {
        assert!(matches!(map_sqlx_error(sqlx::Error::PoolTimedOut), StoreError::Unavailable(_)));
        assert!(matches!(map_sqlx_error(sqlx::Error::RowNotFound), StoreError::Query(_)));
    }

    #[test]
    fn test_corrupt_status_is_reported() {
        let now = Utc::now();
        let row = SeatRow {
            showtime_id: "SH1".to_string(),
            seat_number: "A1".to_string(),
            row_label: None,
            category: None,
            status: "RESERVED".to_string(),
            holder_id: None,
            lock_id: None,
            locked_until: None,
            booking_id: None,
            booked_by: None,
            booked_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(Seat::try_from(row), Err(StoreError::Corrupt(_))));
    }
}
