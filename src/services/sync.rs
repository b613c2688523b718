//! Очередь изменений и синхронизация с бэкендом.
//!
//! Запись: мутация сначала ложится в локальное хранилище и журнал изменений,
//! затем при наличии сети сразу доставляется. Недоставленное разбирает
//! периодический проход (`sweep`) строго в порядке записи, с ограниченным
//! числом повторов.
//!
//! Чтение: отдельный периодический `sync_data` забирает карту мест и
//! бронирования текущего спектакля и целиком заменяет локальный снимок.
//! У прохода и у чтения свои флаги занятости, повторный запуск - no-op.
//!
//! Изменение в доставке помечается как занятое. Пока его отправляет
//! `submit`, проход его пропускает, и наоборот.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{Failure, StoreError};
use crate::gateway::{Gateway, RpcResult};
use crate::models::{
    now_millis, AdminEditRequest, ChangeAction, MutationReply, PendingChange, PerformanceId, Reservation, Seat,
    SeatSnapshot, Source,
};
use crate::services::notifier::Notifier;
use crate::store::{OfflineStore, CACHED_PERFORMANCES, LAST_SYNC_TIME};

#[derive(Debug, Error)]
pub enum SyncError {
    /// Локальный путь не работает, вызывающий уходит напрямую на бэкенд.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Терминальная ошибка операции, повторять нельзя.
    #[error(transparent)]
    Remote(Failure),
}

impl From<SyncError> for Failure {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Store(e) => e.into(),
            SyncError::Remote(failure) => failure,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    /// Проход не запускался: нет сети или уже идёт другой.
    pub skipped: bool,
    pub delivered: usize,
    pub abandoned: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub last_sync: Option<i64>,
    pub unsynced: usize,
    pub abandoned: usize,
    pub performance_id: Option<PerformanceId>,
    pub sweeping: bool,
    pub pulling: bool,
}

// Флаг занятости, снимается при drop
struct Busy<'a>(&'a AtomicBool);

impl<'a> Busy<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Busy(flag))
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// Изменение в доставке, снимается при drop
struct Claim<'a> {
    in_flight: &'a Mutex<HashSet<i64>>,
    id: i64,
}

impl<'a> Claim<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<i64>>, id: i64) -> Option<Self> {
        let mut ids = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        ids.insert(id).then(|| Claim { in_flight, id })
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut ids = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        ids.remove(&self.id);
    }
}

pub struct Synchronizer {
    store: Arc<dyn OfflineStore>,
    gateway: Arc<Gateway>,
    notifier: Notifier,
    config: SyncConfig,
    online: AtomicBool,
    sweeping: AtomicBool,
    pulling: AtomicBool,
    in_flight: Mutex<HashSet<i64>>,
    performance: RwLock<Option<PerformanceId>>,
    last_sync: AtomicI64,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn OfflineStore>,
        gateway: Arc<Gateway>,
        notifier: Notifier,
        config: SyncConfig,
    ) -> Self {
        let performance = config.performance_id.clone();
        Self {
            store,
            gateway,
            notifier,
            config,
            online: AtomicBool::new(true),
            sweeping: AtomicBool::new(false),
            pulling: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
            performance: RwLock::new(performance),
            last_sync: AtomicI64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn OfflineStore> {
        &self.store
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Подсказка о связи. Переход в онлайн запускает проход по очереди.
    pub async fn set_online(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::AcqRel);
        if online == was_online {
            return;
        }
        if online {
            self.notifier.info("Back online", "Pending changes are being synchronized.");
            if let Err(e) = self.sweep().await {
                warn!("Sweep after reconnect failed: {}", e);
            }
        } else {
            self.notifier.info("Offline", "Working from local data.");
        }
    }

    pub fn set_performance_id(&self, performance_id: PerformanceId) {
        info!("Current performance set to {}", performance_id);
        *self.performance.write().unwrap_or_else(|e| e.into_inner()) = Some(performance_id);
    }

    pub fn performance_id(&self) -> Option<PerformanceId> {
        self.performance.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Записывает мутацию и, если есть сеть, сразу доставляет её.
    pub async fn submit(&self, performance_id: &PerformanceId, action: ChangeAction) -> Result<MutationReply, SyncError> {
        if let ChangeAction::Reserve(request) = &action {
            for seat_id in &request.seat_ids {
                let reservation = Reservation::new(performance_id.clone(), seat_id, request.holder.clone())
                    .map_err(SyncError::Remote)?;
                self.store.save_reservation(&reservation).await?;
            }
        }
        if let ChangeAction::AdminEdit(edit) = &action {
            self.apply_edit(performance_id, edit).await?;
        }

        let data = action.to_data().map_err(StoreError::from)?;
        let change = self.store.record_change(action.change_type(), performance_id, data).await?;

        if !self.is_online() {
            debug!("Offline, {} change #{} queued", change.change_type, change.id);
            return Ok(MutationReply::queued(change.change_id, action.seat_ids()));
        }
        let Some(_claim) = Claim::acquire(&self.in_flight, change.id) else {
            debug!("{} change #{} already picked up by a sweep", change.change_type, change.id);
            return Ok(MutationReply::queued(change.change_id, action.seat_ids()));
        };

        let result = self.deliver(performance_id, &action).await;
        match result.outcome {
            Ok(payload) => {
                self.confirm(&change).await;
                Ok(MutationReply::from_payload(Source::Server, &payload, action.seat_ids()).with_change_id(change.change_id))
            }
            Err(failure) if failure.is_retryable() => {
                warn!("{} change #{} kept for the next sweep: {}", change.change_type, change.id, failure);
                self.online.store(false, Ordering::Release);
                Ok(MutationReply::queued(change.change_id, action.seat_ids()))
            }
            Err(failure) => {
                self.reject(&change, &failure).await;
                Err(SyncError::Remote(failure))
            }
        }
    }

    // Правка колонок сразу видна в зеркале; отказ бэкенда откатит её вместе со снимком
    async fn apply_edit(&self, performance_id: &PerformanceId, edit: &AdminEditRequest) -> Result<(), StoreError> {
        let seats = self.store.get_seats(performance_id).await?;
        let Some(mut seat) = seats.into_iter().find(|seat| seat.id() == edit.seat_id) else {
            return Ok(());
        };
        for (column, value) in [("columnC", &edit.column_c), ("columnD", &edit.column_d), ("columnE", &edit.column_e)] {
            if let Some(value) = value {
                seat.extensions.insert(column.to_string(), json!(value));
            }
        }
        self.store.upsert_seat(performance_id, &seat).await
    }

    async fn deliver(&self, performance_id: &PerformanceId, action: &ChangeAction) -> RpcResult {
        self.gateway.apply(performance_id, action).await
    }

    async fn confirm(&self, change: &PendingChange) {
        // Доставлено; если отметка не легла, следующий проход отправит повторно
        if let Err(e) = self.store.mark_changes_as_synced(&[change.id]).await {
            error!("Change #{} delivered but not marked as synced: {}", change.id, e);
        }
    }

    // Отказ бэкенда: изменение снимается, локальный снимок откатывается
    async fn reject(&self, change: &PendingChange, failure: &Failure) {
        if let Err(e) = self.store.abandon_change(change.id, &failure.message).await {
            warn!("Could not abandon change #{}: {}", change.id, e);
        }
        self.gateway.report_failure(change.change_type.as_str(), failure);
        if let Err(e) = self.pull_performance(&change.performance_id).await {
            warn!("Rollback refresh for {} failed: {}", change.performance_id, e);
        }
    }

    /// Доставляет накопленные изменения по порядку записи.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        if !self.is_online() {
            debug!("Offline, sweep skipped");
            return Ok(SweepReport { skipped: true, ..Default::default() });
        }
        let Some(_busy) = Busy::acquire(&self.sweeping) else {
            debug!("Sweep already running");
            return Ok(SweepReport { skipped: true, ..Default::default() });
        };

        let mut queue: VecDeque<PendingChange> = self
            .store
            .get_unsynced_changes()
            .await?
            .into_iter()
            .filter(|c| !c.abandoned)
            .collect();
        if queue.is_empty() {
            return Ok(SweepReport::default());
        }
        info!("Sweeping {} pending changes", queue.len());

        let mut report = SweepReport::default();
        while let Some(mut change) = queue.pop_front() {
            let Some(_claim) = Claim::acquire(&self.in_flight, change.id) else {
                debug!("{} change #{} is being delivered already", change.change_type, change.id);
                continue;
            };
            let action = match change.action() {
                Ok(action) => action,
                Err(failure) => {
                    self.give_up(&change, &failure).await?;
                    report.abandoned += 1;
                    continue;
                }
            };

            let failure = match self.deliver(&change.performance_id, &action).await.outcome {
                Ok(_) => {
                    self.store.mark_changes_as_synced(&[change.id]).await?;
                    report.delivered += 1;
                    continue;
                }
                Err(failure) => failure,
            };

            if !failure.is_retryable() {
                self.reject(&change, &failure).await;
                report.abandoned += 1;
                continue;
            }

            change.retry_count += 1;
            if change.retry_count >= self.config.max_retries {
                let exhausted = Failure::new(
                    failure.kind,
                    format!("gave up after {} attempts: {}", change.retry_count, failure.message),
                );
                self.give_up(&change, &exhausted).await?;
                report.abandoned += 1;
                continue;
            }

            self.store.record_retry(change.id, change.retry_count, &failure.message).await?;
            tokio::time::sleep(self.config.retry_delay() * change.retry_count).await;
            queue.push_back(change);
        }

        info!("Sweep done: {} delivered, {} abandoned", report.delivered, report.abandoned);
        Ok(report)
    }

    async fn give_up(&self, change: &PendingChange, failure: &Failure) -> Result<(), StoreError> {
        error!("Abandoning {} change #{}: {}", change.change_type, change.id, failure.message);
        self.store.abandon_change(change.id, &failure.message).await?;
        self.gateway.report_failure("sync_changes", failure);
        Ok(())
    }

    /// Забирает с бэкенда места и бронирования и заменяет локальный снимок.
    pub async fn pull_performance(&self, performance_id: &PerformanceId) -> Result<SeatSnapshot, SyncError> {
        let seat_data = self
            .gateway
            .get_seat_data(performance_id, true, true)
            .await
            .into_result()
            .map_err(SyncError::Remote)?;
        let seats = Seat::from_payload(&seat_data).map_err(SyncError::Remote)?;
        self.store.save_seats(performance_id, &seats).await?;

        match self.gateway.get_reservations(performance_id).await.into_result() {
            Ok(payload) => {
                let reservations = reservation_list(performance_id, &payload);
                self.store.replace_reservations(performance_id, &reservations).await?;
            }
            Err(failure) => warn!("Reservations for {} not refreshed: {}", performance_id, failure),
        }

        let now = now_millis();
        self.store.save_setting(LAST_SYNC_TIME, &json!(now)).await?;
        self.remember_performance(performance_id).await?;
        self.last_sync.store(now, Ordering::Release);

        debug!("Pulled {} seats for {}", seats.len(), performance_id);
        let mut snapshot = SeatSnapshot::new(performance_id.clone(), seats, Source::Server);
        snapshot.pending_seat_ids = self.pending_seat_ids(performance_id).await?;
        snapshot.last_sync = Some(now);
        Ok(snapshot)
    }

    async fn remember_performance(&self, performance_id: &PerformanceId) -> Result<(), StoreError> {
        let mut cached: BTreeSet<String> = match self.store.get_setting(CACHED_PERFORMANCES).await? {
            Some(value) => serde_json::from_value(value)?,
            None => BTreeSet::new(),
        };
        if cached.insert(performance_id.to_string()) {
            self.store.save_setting(CACHED_PERFORMANCES, &json!(cached)).await?;
        }
        Ok(())
    }

    /// Периодическое чтение для текущего спектакля.
    pub async fn sync_data(&self) -> Result<Option<SeatSnapshot>, SyncError> {
        let Some(performance_id) = self.performance_id() else {
            return Ok(None);
        };
        if !self.is_online() {
            return Ok(None);
        }
        let Some(_busy) = Busy::acquire(&self.pulling) else {
            debug!("Data sync already running");
            return Ok(None);
        };
        self.pull_performance(&performance_id).await.map(Some)
    }

    /// Снимок из локального зеркала, с отметками о недоставленных изменениях.
    pub async fn offline_snapshot(&self, performance_id: &PerformanceId) -> Result<SeatSnapshot, StoreError> {
        let seats = self.store.get_seats(performance_id).await?;
        let mut snapshot = SeatSnapshot::new(performance_id.clone(), seats, Source::Local);
        snapshot.pending_seat_ids = self.pending_seat_ids(performance_id).await?;
        snapshot.last_sync = self.store.get_setting(LAST_SYNC_TIME).await?.and_then(|v| v.as_i64());
        Ok(snapshot)
    }

    async fn pending_seat_ids(&self, performance_id: &PerformanceId) -> Result<Vec<String>, StoreError> {
        let mut ids = BTreeSet::new();
        for change in self.store.get_unsynced_changes().await? {
            if change.abandoned || &change.performance_id != performance_id {
                continue;
            }
            if let Ok(action) = change.action() {
                ids.extend(action.seat_ids());
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Локальный путь чтения: бэкенд с записью в зеркало, при отказе сети - зеркало.
    pub async fn get_seats(&self, performance_id: &PerformanceId) -> Result<SeatSnapshot, SyncError> {
        let remote_failure = if self.is_online() {
            match self.pull_performance(performance_id).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(SyncError::Remote(failure)) => {
                    warn!("Seat data for {} unavailable, using local mirror: {}", performance_id, failure);
                    Some(failure)
                }
                Err(store) => return Err(store),
            }
        } else {
            None
        };

        let snapshot = self.offline_snapshot(performance_id).await?;
        match remote_failure {
            Some(failure) if snapshot.seats.is_empty() => {
                self.gateway.report_failure("get_seats_data", &failure);
                Err(SyncError::Remote(failure))
            }
            _ => Ok(snapshot),
        }
    }

    pub async fn get_reservations(&self, performance_id: &PerformanceId) -> Result<Vec<Reservation>, SyncError> {
        if self.is_online() {
            match self.gateway.get_reservations(performance_id).await.into_result() {
                Ok(payload) => {
                    let reservations = reservation_list(performance_id, &payload);
                    self.store.replace_reservations(performance_id, &reservations).await?;
                    return Ok(reservations);
                }
                Err(failure) if !failure.is_retryable() => {
                    self.gateway.report_failure("get_reservations_data", &failure);
                    return Err(SyncError::Remote(failure));
                }
                Err(failure) => warn!("Reservations for {} unavailable, using local mirror: {}", performance_id, failure),
            }
        }
        Ok(self.store.get_reservations(performance_id).await?)
    }

    /// Снимок для фоновой предзагрузки: локальный, а если его нет - с бэкенда.
    pub async fn preload_performance(&self, performance_id: &PerformanceId) -> Result<SeatSnapshot, SyncError> {
        let local = self.offline_snapshot(performance_id).await?;
        if !local.seats.is_empty() {
            return Ok(local);
        }
        self.pull_performance(performance_id).await
    }

    pub async fn status(&self) -> Result<SyncStatus, StoreError> {
        let unsynced = self.store.get_unsynced_changes().await?;
        let abandoned = unsynced.iter().filter(|c| c.abandoned).count();
        let last_sync = match self.last_sync.load(Ordering::Acquire) {
            0 => self.store.get_setting(LAST_SYNC_TIME).await?.and_then(|v| v.as_i64()),
            ts => Some(ts),
        };
        Ok(SyncStatus {
            online: self.is_online(),
            last_sync,
            unsynced: unsynced.len() - abandoned,
            abandoned,
            performance_id: self.performance_id(),
            sweeping: self.sweeping.load(Ordering::Acquire),
            pulling: self.pulling.load(Ordering::Acquire),
        })
    }

    /// Проход по очереди и обновление снимка. Ошибки только логируются.
    pub async fn run_background_sync(&self) {
        match self.sweep().await {
            Ok(report) if report.delivered + report.abandoned > 0 => {
                debug!("Background sweep: {:?}", report)
            }
            Ok(_) => {}
            Err(e) => warn!("Background sweep failed: {}", e),
        }
        if let Err(e) = self.sync_data().await {
            warn!("Background data sync failed: {}", e);
        }
    }

    /// Периодическая синхронизация. В офлайне проверяет доступность бэкенда.
    pub fn spawn_periodic(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.interval();
        info!("Periodic sync every {:?}", interval);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !self.is_online() {
                    if self.gateway.probe().await {
                        self.set_online(true).await;
                    } else {
                        continue;
                    }
                }
                self.run_background_sync().await;
            }
        })
    }
}

fn reservation_list(performance_id: &PerformanceId, payload: &Map<String, Value>) -> Vec<Reservation> {
    payload
        .get("data")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|row| match Reservation::from_remote(performance_id, row) {
            Ok(reservation) => Some(reservation),
            Err(e) => {
                warn!("Skipping malformed reservation: {}", e.message);
                None
            }
        })
        .collect()
}
