//! Runs the Postgres store against a live database.
//!
//! Ignored by default. Point `DATABASE_URL` at a scratch database and run:
//! ```bash
//! DATABASE_URL=postgres://localhost/marquee_test cargo test -p marquee-store --test postgres_inventory -- --ignored
//! ```

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use uuid::Uuid;

use marquee_core::{InventoryStore, LockLedgerEntry, SeatProvisioning, SeatSpec, SeatStatus, StoreError};
use marquee_store::app_config::{DatabaseConfig, StoreBackend};
use marquee_store::{DbClient, PgInventoryStore};

const WAIT: Duration = Duration::from_millis(200);

async fn store_with(seats: &[&str]) -> (PgInventoryStore, String) {
    let cfg = DatabaseConfig {
        backend: StoreBackend::Postgres,
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
        max_connections: 5,
        acquire_timeout_seconds: 3,
        run_migrations: true,
    };
    let db = DbClient::new(&cfg).await.expect("connect");
    db.migrate().await.expect("migrate");

    let store = PgInventoryStore::new(db.pool.clone());
    let showtime_id = format!("SH-{}", Uuid::new_v4());
    let specs: Vec<SeatSpec> = seats.iter().map(|s| SeatSpec::new(*s)).collect();
    assert!(store.create_showtime(&showtime_id, &specs).await.unwrap());
    (store, showtime_id)
}

fn numbers(seats: &[&str]) -> Vec<String> {
    seats.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
#[ignore]
async fn test_select_for_update_orders_bytewise_and_blocks() {
    let (store, showtime) = store_with(&["B1", "A10", "A2"]).await;

    let mut first = store.begin(WAIT).await.unwrap();
    let seats = first
        .select_seats_for_update(&showtime, &numbers(&["B1", "A2", "Z9", "A10"]))
        .await
        .unwrap();
    let got: Vec<_> = seats.iter().map(|s| s.seat_number.as_str()).collect();
    assert_eq!(got, vec!["A10", "A2", "B1"]);

    let mut second = store.begin(WAIT).await.unwrap();
    let err = second
        .select_seats_for_update(&showtime, &numbers(&["A2"]))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::LockTimeout(_)), "got {:?}", err);

    first.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_hold_commits_with_ledger_entry() {
    let (store, showtime) = store_with(&["A1", "A2"]).await;
    let now = Utc::now();
    let entry = LockLedgerEntry::grant("U1", &showtime, numbers(&["A1", "A2"]), None, ChronoDuration::seconds(60), now);

    let mut tx = store.begin(WAIT).await.unwrap();
    let mut seats = tx.select_seats_for_update(&showtime, &entry.seat_numbers).await.unwrap();
    tx.insert_ledger_entry(&entry).await.unwrap();
    for seat in seats.iter_mut() {
        seat.lock("U1", entry.lock_id, entry.expires_at, now).unwrap();
    }
    tx.update_seats(&seats).await.unwrap();
    tx.commit().await.unwrap();

    let locked = store.list_seats(&showtime, Some(SeatStatus::Locked)).await.unwrap();
    assert_eq!(locked.len(), 2);
    assert!(locked.iter().all(|s| s.lock_id == Some(entry.lock_id)));

    let stored = store.find_ledger_entry(entry.lock_id).await.unwrap().unwrap();
    assert!(stored.active);
    assert_eq!(stored.seat_numbers, entry.seat_numbers);
    assert_eq!(store.active_ledger_entries(&showtime).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore]
async fn test_idempotency_index_rejects_second_entry() {
    let (store, showtime) = store_with(&["A1"]).await;
    let holder = format!("U-{}", Uuid::new_v4());
    let entry = || {
        LockLedgerEntry::grant(
            holder.as_str(),
            showtime.as_str(),
            numbers(&["A1"]),
            Some("cart-1".to_string()),
            ChronoDuration::seconds(60),
            Utc::now(),
        )
    };

    let mut tx = store.begin(WAIT).await.unwrap();
    tx.insert_ledger_entry(&entry()).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin(WAIT).await.unwrap();
    assert!(tx.find_by_idempotency_key(&holder, "cart-1").await.unwrap().is_some());
    let err = tx.insert_ledger_entry(&entry()).await.unwrap_err();
    assert!(matches!(err, StoreError::UniqueViolation(_)), "got {:?}", err);
}

#[tokio::test]
#[ignore]
async fn test_check_constraint_rejects_bare_lock() {
    let (store, showtime) = store_with(&["A1"]).await;

    let mut tx = store.begin(WAIT).await.unwrap();
    let mut seats = tx.select_seats_for_update(&showtime, &numbers(&["A1"])).await.unwrap();
    // LOCKED without holder, lock id or expiry
    seats[0].status = SeatStatus::Locked;
    let err = tx.update_seats(&seats).await.unwrap_err();
    assert!(matches!(err, StoreError::Query(_)), "got {:?}", err);
}
