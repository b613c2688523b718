//! Локальное хранилище: места, бронирования, журнал изменений, настройки.
//!
//! Всё, кроме настроек и журнала, шардировано по [`PerformanceId`].
//! Любая операция может вернуть [`StoreError`]; вызывающий код трактует это
//! как "иди напрямую на бэкенд", а не как потерю данных.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreResult;
use crate::models::{ChangeType, PendingChange, PerformanceId, Reservation, Seat};

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Время последней успешной синхронизации (мс).
pub const LAST_SYNC_TIME: &str = "lastSyncTime";
/// Список спектаклей, для которых есть локальный снимок.
pub const CACHED_PERFORMANCES: &str = "cachedPerformances";

#[async_trait]
pub trait OfflineStore: Send + Sync {
    /// Проверка хранилища: открыть, применить миграции, выполнить запрос.
    /// Можно вызывать повторно.
    async fn init(&self) -> StoreResult<()>;

    /// Атомарно заменяет набор мест спектакля. Пустой список очищает его.
    async fn save_seats(&self, performance_id: &PerformanceId, seats: &[Seat]) -> StoreResult<()>;

    async fn get_seats(&self, performance_id: &PerformanceId) -> StoreResult<Vec<Seat>>;

    async fn upsert_seat(&self, performance_id: &PerformanceId, seat: &Seat) -> StoreResult<()>;

    async fn save_reservation(&self, reservation: &Reservation) -> StoreResult<()>;

    /// Заменяет все бронирования спектакля.
    async fn replace_reservations(&self, performance_id: &PerformanceId, reservations: &[Reservation]) -> StoreResult<()>;

    async fn get_reservations(&self, performance_id: &PerformanceId) -> StoreResult<Vec<Reservation>>;

    async fn record_change(
        &self,
        change_type: ChangeType,
        performance_id: &PerformanceId,
        data: Value,
    ) -> StoreResult<PendingChange>;

    /// Все записи с `synced = false`, от старых к новым.
    async fn get_unsynced_changes(&self) -> StoreResult<Vec<PendingChange>>;

    /// Идемпотентно. Отсутствующие id ошибкой не считаются.
    /// Возвращает число записей, перешедших в `synced`.
    async fn mark_changes_as_synced(&self, ids: &[i64]) -> StoreResult<u64>;

    async fn record_retry(&self, id: i64, retry_count: u32, error: &str) -> StoreResult<()>;

    async fn abandon_change(&self, id: i64, reason: &str) -> StoreResult<()>;

    async fn get_abandoned_changes(&self) -> StoreResult<Vec<PendingChange>>;

    async fn save_setting(&self, key: &str, value: &Value) -> StoreResult<()>;

    async fn get_setting(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Полный сброс всех четырёх таблиц.
    async fn clear(&self) -> StoreResult<()>;
}
