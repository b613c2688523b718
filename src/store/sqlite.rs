use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::OfflineStore;
use crate::database::Database;
use crate::error::{StoreError, StoreResult};
use crate::models::{now_millis, ChangeType, PendingChange, PerformanceId, Reservation, Seat, SeatStatus};

// Строки таблиц как они лежат в SQLite
#[derive(sqlx::FromRow)]
struct SeatRow {
    seat_row: String,
    seat_column: i64,
    status: String,
    name: Option<String>,
    extra: String,
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    performance_id: String,
    seat_row: String,
    seat_column: i64,
    holder: Option<String>,
    timestamp: i64,
}

#[derive(sqlx::FromRow)]
struct ChangeRow {
    id: i64,
    change_key: String,
    change_type: String,
    performance_id: String,
    data: String,
    timestamp: i64,
    synced: bool,
    retry_count: i64,
    abandoned: bool,
    last_error: Option<String>,
}

const CHANGE_COLUMNS: &str = "id, change_key, type AS change_type, performance_id, data, timestamp, \
                              synced, retry_count, abandoned, last_error";

fn corrupt(e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

fn column(value: i64) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| corrupt(format!("seat column {} out of range", value)))
}

impl TryFrom<SeatRow> for Seat {
    type Error = StoreError;

    fn try_from(row: SeatRow) -> StoreResult<Self> {
        let status: SeatStatus = row.status.parse().map_err(corrupt)?;
        let extensions: BTreeMap<String, Value> = serde_json::from_str(&row.extra)?;
        Ok(Seat {
            row: row.seat_row,
            column: column(row.seat_column)?,
            status,
            name: row.name,
            extensions,
        })
    }
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> StoreResult<Self> {
        Ok(Reservation {
            performance_id: row.performance_id.parse().map_err(corrupt)?,
            row: row.seat_row,
            column: column(row.seat_column)?,
            holder: row.holder,
            timestamp: row.timestamp,
        })
    }
}

impl TryFrom<ChangeRow> for PendingChange {
    type Error = StoreError;

    fn try_from(row: ChangeRow) -> StoreResult<Self> {
        Ok(PendingChange {
            id: row.id,
            change_id: Uuid::parse_str(&row.change_key).map_err(corrupt)?,
            change_type: row.change_type.parse().map_err(corrupt)?,
            performance_id: row.performance_id.parse().map_err(corrupt)?,
            data: serde_json::from_str(&row.data)?,
            timestamp: row.timestamp,
            synced: row.synced,
            retry_count: u32::try_from(row.retry_count)
                .map_err(|_| corrupt(format!("retry count {} out of range", row.retry_count)))?,
            abandoned: row.abandoned,
            last_error: row.last_error,
        })
    }
}

fn record_key(performance_id: &PerformanceId, row: &str, column: u32) -> String {
    format!("{}_{}_{}", performance_id, row, column)
}

/// Хранилище поверх SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Готовое к работе хранилище в памяти.
    pub async fn in_memory() -> StoreResult<Self> {
        let store = Self::new(Database::new("sqlite::memory:")?);
        store.init().await?;
        Ok(store)
    }

    async fn changes_where(&self, condition: &str) -> StoreResult<Vec<PendingChange>> {
        let sql = format!("SELECT {} FROM changes WHERE {} ORDER BY id ASC", CHANGE_COLUMNS, condition);
        let rows: Vec<ChangeRow> = sqlx::query_as(&sql).fetch_all(&self.db.pool).await?;
        rows.into_iter().map(PendingChange::try_from).collect()
    }
}

#[async_trait]
impl OfflineStore for SqliteStore {
    async fn init(&self) -> StoreResult<()> {
        self.db.run_migrations().await?;
        sqlx::query("SELECT 1").execute(&self.db.pool).await?;
        info!("Local store ready");
        Ok(())
    }

    async fn save_seats(&self, performance_id: &PerformanceId, seats: &[Seat]) -> StoreResult<()> {
        let pid = performance_id.to_string();
        let now = now_millis();

        let mut tx = self.db.pool.begin().await?;
        sqlx::query("DELETE FROM seats WHERE performance_id = ?")
            .bind(&pid)
            .execute(&mut *tx)
            .await?;

        for seat in seats {
            sqlx::query(
                "INSERT OR REPLACE INTO seats (id, performance_id, seat_row, seat_column, status, name, extra, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record_key(performance_id, &seat.row, seat.column))
            .bind(&pid)
            .bind(&seat.row)
            .bind(i64::from(seat.column))
            .bind(seat.status.as_str())
            .bind(&seat.name)
            .bind(serde_json::to_string(&seat.extensions)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Saved {} seats for {}", seats.len(), performance_id);
        Ok(())
    }

    async fn get_seats(&self, performance_id: &PerformanceId) -> StoreResult<Vec<Seat>> {
        let rows: Vec<SeatRow> = sqlx::query_as(
            "SELECT seat_row, seat_column, status, name, extra
             FROM seats
             WHERE performance_id = ?
             ORDER BY seat_row, seat_column",
        )
        .bind(performance_id.to_string())
        .fetch_all(&self.db.pool)
        .await?;

        rows.into_iter().map(Seat::try_from).collect()
    }

    async fn upsert_seat(&self, performance_id: &PerformanceId, seat: &Seat) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO seats (id, performance_id, seat_row, seat_column, status, name, extra, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                name = excluded.name,
                extra = excluded.extra,
                timestamp = excluded.timestamp",
        )
        .bind(record_key(performance_id, &seat.row, seat.column))
        .bind(performance_id.to_string())
        .bind(&seat.row)
        .bind(i64::from(seat.column))
        .bind(seat.status.as_str())
        .bind(&seat.name)
        .bind(serde_json::to_string(&seat.extensions)?)
        .bind(now_millis())
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn save_reservation(&self, reservation: &Reservation) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO reservations (id, performance_id, seat_row, seat_column, holder, timestamp)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                holder = excluded.holder,
                timestamp = excluded.timestamp",
        )
        .bind(record_key(&reservation.performance_id, &reservation.row, reservation.column))
        .bind(reservation.performance_id.to_string())
        .bind(&reservation.row)
        .bind(i64::from(reservation.column))
        .bind(&reservation.holder)
        .bind(reservation.timestamp)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn replace_reservations(&self, performance_id: &PerformanceId, reservations: &[Reservation]) -> StoreResult<()> {
        let mut tx = self.db.pool.begin().await?;
        sqlx::query("DELETE FROM reservations WHERE performance_id = ?")
            .bind(performance_id.to_string())
            .execute(&mut *tx)
            .await?;

        for reservation in reservations {
            sqlx::query(
                "INSERT OR REPLACE INTO reservations (id, performance_id, seat_row, seat_column, holder, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(record_key(performance_id, &reservation.row, reservation.column))
            .bind(performance_id.to_string())
            .bind(&reservation.row)
            .bind(i64::from(reservation.column))
            .bind(&reservation.holder)
            .bind(reservation.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_reservations(&self, performance_id: &PerformanceId) -> StoreResult<Vec<Reservation>> {
        let rows: Vec<ReservationRow> = sqlx::query_as(
            "SELECT performance_id, seat_row, seat_column, holder, timestamp
             FROM reservations
             WHERE performance_id = ?
             ORDER BY seat_row, seat_column",
        )
        .bind(performance_id.to_string())
        .fetch_all(&self.db.pool)
        .await?;

        rows.into_iter().map(Reservation::try_from).collect()
    }

    async fn record_change(
        &self,
        change_type: ChangeType,
        performance_id: &PerformanceId,
        data: Value,
    ) -> StoreResult<PendingChange> {
        let change_id = Uuid::new_v4();
        let timestamp = now_millis();

        let result = sqlx::query(
            "INSERT INTO changes (change_key, type, performance_id, data, timestamp, synced, retry_count, abandoned)
             VALUES (?, ?, ?, ?, ?, 0, 0, 0)",
        )
        .bind(change_id.to_string())
        .bind(change_type.as_str())
        .bind(performance_id.to_string())
        .bind(serde_json::to_string(&data)?)
        .bind(timestamp)
        .execute(&self.db.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("Recorded {} change #{} for {}", change_type, id, performance_id);

        Ok(PendingChange {
            id,
            change_id,
            change_type,
            performance_id: performance_id.clone(),
            data,
            timestamp,
            synced: false,
            retry_count: 0,
            abandoned: false,
            last_error: None,
        })
    }

    async fn get_unsynced_changes(&self) -> StoreResult<Vec<PendingChange>> {
        self.changes_where("synced = 0").await
    }

    async fn mark_changes_as_synced(&self, ids: &[i64]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut flipped = 0;
        let mut tx = self.db.pool.begin().await?;
        for id in ids {
            flipped += sqlx::query("UPDATE changes SET synced = 1 WHERE id = ? AND synced = 0")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(flipped)
    }

    async fn record_retry(&self, id: i64, retry_count: u32, error: &str) -> StoreResult<()> {
        sqlx::query("UPDATE changes SET retry_count = ?, last_error = ? WHERE id = ?")
            .bind(i64::from(retry_count))
            .bind(error)
            .bind(id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    async fn abandon_change(&self, id: i64, reason: &str) -> StoreResult<()> {
        sqlx::query("UPDATE changes SET abandoned = 1, last_error = ? WHERE id = ? AND synced = 0")
            .bind(reason)
            .bind(id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    async fn get_abandoned_changes(&self) -> StoreResult<Vec<PendingChange>> {
        self.changes_where("synced = 0 AND abandoned = 1").await
    }

    async fn save_setting(&self, key: &str, value: &Value) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO settings (key, value, timestamp) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, timestamp = excluded.timestamp",
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(now_millis())
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> StoreResult<Option<Value>> {
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db.pool)
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut tx = self.db.pool.begin().await?;
        for table in ["seats", "reservations", "changes", "settings"] {
            sqlx::query(&format!("DELETE FROM {}", table)).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!("Local store cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn pid() -> PerformanceId {
        PerformanceId::new("G", "1", "A")
    }

    fn seat(row: &str, column: u32, status: SeatStatus) -> Seat {
        Seat::new(row, column, status)
    }

    #[tokio::test]
    async fn seats_round_trip_without_internal_fields() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut named = seat("A", 2, SeatStatus::Reserved).with_name("Kato");
        named.extensions.insert("columnC".into(), json!("vip"));
        let seats = vec![seat("A", 1, SeatStatus::Available), named];

        store.save_seats(&pid(), &seats).await.unwrap();
        assert_eq!(store.get_seats(&pid()).await.unwrap(), seats);
    }

    #[tokio::test]
    async fn saving_replaces_and_empty_list_clears() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .save_seats(&pid(), &[seat("A", 1, SeatStatus::Available), seat("A", 2, SeatStatus::Available)])
            .await
            .unwrap();
        store.save_seats(&pid(), &[seat("B", 1, SeatStatus::CheckedIn)]).await.unwrap();

        let seats = store.get_seats(&pid()).await.unwrap();
        assert_eq!(seats.len(), 1);
        assert_eq!(seats[0].id(), "B1");

        store.save_seats(&pid(), &[]).await.unwrap();
        assert!(store.get_seats(&pid()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn performances_do_not_share_state() {
        let store = SqliteStore::in_memory().await.unwrap();
        let other = PerformanceId::new("G", "1", "B");

        store.save_seats(&pid(), &[seat("A", 1, SeatStatus::Reserved)]).await.unwrap();
        store.save_seats(&other, &[seat("A", 1, SeatStatus::Available)]).await.unwrap();
        store.save_seats(&pid(), &[]).await.unwrap();

        assert!(store.get_seats(&pid()).await.unwrap().is_empty());
        assert_eq!(store.get_seats(&other).await.unwrap()[0].status, SeatStatus::Available);

        store
            .save_reservation(&Reservation::new(pid(), "A1", Some("Ueda".into())).unwrap())
            .await
            .unwrap();
        assert_eq!(store.get_reservations(&pid()).await.unwrap().len(), 1);
        assert!(store.get_reservations(&other).await.unwrap().is_empty());

        let replacement = vec![
            Reservation::new(other.clone(), "C1", None).unwrap(),
            Reservation::new(other.clone(), "C2", Some("Mita".into())).unwrap(),
        ];
        store.replace_reservations(&other, &replacement).await.unwrap();
        store.replace_reservations(&pid(), &[]).await.unwrap();
        assert!(store.get_reservations(&pid()).await.unwrap().is_empty());
        assert_eq!(store.get_reservations(&other).await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn upsert_seat_overwrites_single_record() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.save_seats(&pid(), &[seat("A", 1, SeatStatus::Available)]).await.unwrap();
        store.upsert_seat(&pid(), &seat("A", 1, SeatStatus::Reserved)).await.unwrap();

        let seats = store.get_seats(&pid()).await.unwrap();
        assert_eq!(seats.len(), 1);
        assert_eq!(seats[0].status, SeatStatus::Reserved);
    }

    #[tokio::test]
    async fn unsynced_changes_come_back_oldest_first() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = store.record_change(ChangeType::Reservation, &pid(), json!({"n": 1})).await.unwrap();
        let second = store.record_change(ChangeType::Checkin, &pid(), json!({"n": 2})).await.unwrap();
        assert_ne!(first.change_id, second.change_id);

        let pending = store.get_unsynced_changes().await.unwrap();
        assert_eq!(pending.iter().map(|c| c.id).collect::<Vec<_>>(), vec![first.id, second.id]);
        assert_eq!(pending[1].change_type, ChangeType::Checkin);
        assert_eq!(pending[1].data, json!({"n": 2}));

        assert_eq!(store.mark_changes_as_synced(&[first.id]).await.unwrap(), 1);
        let pending = store.get_unsynced_changes().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
    }

    #[tokio::test]
    async fn mark_synced_is_idempotent_and_ignores_missing_ids() {
        let store = SqliteStore::in_memory().await.unwrap();
        let change = store.record_change(ChangeType::Reservation, &pid(), json!({})).await.unwrap();

        assert_eq!(store.mark_changes_as_synced(&[change.id, 9999]).await.unwrap(), 1);
        assert_eq!(store.mark_changes_as_synced(&[change.id, 9999]).await.unwrap(), 0);
        assert!(store.get_unsynced_changes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retries_and_abandonment_are_persisted() {
        let store = SqliteStore::in_memory().await.unwrap();
        let change = store.record_change(ChangeType::AdminEdit, &pid(), json!({})).await.unwrap();

        store.record_retry(change.id, 2, "connection refused").await.unwrap();
        let pending = store.get_unsynced_changes().await.unwrap();
        assert_eq!(pending[0].retry_count, 2);
        assert_eq!(pending[0].last_error.as_deref(), Some("connection refused"));

        store.abandon_change(change.id, "gave up").await.unwrap();
        let abandoned = store.get_abandoned_changes().await.unwrap();
        assert_eq!(abandoned.len(), 1);
        assert!(abandoned[0].abandoned);
        assert!(!abandoned[0].synced);
    }

    #[tokio::test]
    async fn corrupt_retry_count_is_reported() {
        let store = SqliteStore::in_memory().await.unwrap();
        let change = store.record_change(ChangeType::Checkin, &pid(), json!({})).await.unwrap();
        sqlx::query("UPDATE changes SET retry_count = -1 WHERE id = ?")
            .bind(change.id)
            .execute(&store.db.pool)
            .await
            .unwrap();

        match store.get_unsynced_changes().await {
            Err(StoreError::Corrupt(message)) => assert!(message.contains("retry count -1")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn settings_overwrite_and_clear_empties_everything() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.get_setting("lastSyncTime").await.unwrap().is_none());

        store.save_setting("lastSyncTime", &json!(1)).await.unwrap();
        store.save_setting("lastSyncTime", &json!(2)).await.unwrap();
        assert_eq!(store.get_setting("lastSyncTime").await.unwrap(), Some(json!(2)));

        store.save_seats(&pid(), &[seat("A", 1, SeatStatus::Available)]).await.unwrap();
        store.record_change(ChangeType::Walkin, &pid(), json!({"count": 1})).await.unwrap();
        store.clear().await.unwrap();

        assert!(store.get_seats(&pid()).await.unwrap().is_empty());
        assert!(store.get_unsynced_changes().await.unwrap().is_empty());
        assert!(store.get_setting("lastSyncTime").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn init_can_run_twice() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.init().await.unwrap();
    }

    fn status_from(index: usize) -> SeatStatus {
        [
            SeatStatus::Available,
            SeatStatus::Reserved,
            SeatStatus::ToBeCheckedIn,
            SeatStatus::CheckedIn,
            SeatStatus::Unavailable,
        ][index % 5]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn any_seat_set_round_trips(
            layout in prop::collection::btree_map((0u8..5, 1u32..=12), 0usize..5, 1..30)
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let seats: Vec<Seat> = layout
                .iter()
                .map(|(&(row, column), &status)| seat(&((b'A' + row) as char).to_string(), column, status_from(status)))
                .collect();

            let stored = rt.block_on(async {
                let store = SqliteStore::in_memory().await.unwrap();
                store.save_seats(&pid(), &seats).await.unwrap();
                store.get_seats(&pid()).await.unwrap()
            });

            // ORDER BY seat_row, seat_column совпадает с порядком ключей BTreeMap
            let mut stored_sorted = stored.clone();
            stored_sorted.sort_by(|a, b| (a.row.clone(), a.column).cmp(&(b.row.clone(), b.column)));
            prop_assert_eq!(stored_sorted, seats);
        }

        #[test]
        fn marking_twice_equals_marking_once(total in 1usize..8, picks in prop::collection::vec(0usize..8, 0..8)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (once, twice) = rt.block_on(async {
                let mut states = Vec::new();
                for repeats in [1, 2] {
                    let store = SqliteStore::in_memory().await.unwrap();
                    let mut ids = Vec::new();
                    for n in 0..total {
                        ids.push(store.record_change(ChangeType::Reservation, &pid(), json!({"n": n})).await.unwrap().id);
                    }
                    let chosen: Vec<i64> = picks.iter().filter_map(|&p| ids.get(p).copied()).collect();
                    for _ in 0..repeats {
                        store.mark_changes_as_synced(&chosen).await.unwrap();
                    }
                    let left: Vec<i64> = store.get_unsynced_changes().await.unwrap().iter().map(|c| c.id).collect();
                    states.push(left);
                }
                (states[0].clone(), states[1].clone())
            });
            prop_assert_eq!(once, twice);
        }
    }
}
