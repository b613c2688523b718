//! Выбор пути для каждой операции: локальное хранилище с очередью или
//! прямой вызов бэкенда.
//!
//! Два состояния, по образцу автоматического выключателя:
//! - **Capable**: операция идёт через [`Synchronizer`]. Ошибка хранилища
//!   увеличивает счётчик подряд идущих сбоев, а сама операция уходит на
//!   прямой путь. Успех локального пути обнуляет счётчик.
//! - **Fallback**: всё идёт напрямую на бэкенд с ограниченным числом
//!   повторов и линейной задержкой. Вернуться можно только через
//!   [`FallbackManager::retry_offline_functionality`].

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::notifier::Notifier;
use super::sync::{SyncError, Synchronizer};
use crate::config::FallbackConfig;
use crate::error::{Failure, StoreError};
use crate::gateway::{Gateway, RpcResult};
use crate::models::{
    AdminEditRequest, ChangeAction, CheckInRequest, MutationReply, PerformanceId, Reservation, ReserveRequest, Seat,
    SeatSnapshot, Session, Source, WalkInRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Локальное хранилище работает.
    Capable,
    /// Хранилище обходится, все вызовы идут на бэкенд.
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct FallbackStats {
    pub mode: OperatingMode,
    pub offline_available: bool,
    pub fallback_mode: bool,
    pub offline_error_count: u32,
    pub max_offline_errors: u32,
    pub online: bool,
}

// Прямой вызов бэкенда, который можно повторить
enum DirectCall<'a> {
    SeatData(&'a PerformanceId, Session),
    Reservations(&'a PerformanceId),
    Change(&'a PerformanceId, &'a ChangeAction),
}

pub struct FallbackManager {
    sync: Arc<Synchronizer>,
    gateway: Arc<Gateway>,
    notifier: Notifier,
    config: FallbackConfig,
    mode: RwLock<OperatingMode>,
    offline_available: AtomicBool,
    error_count: AtomicU32,
}

impl FallbackManager {
    /// До первой проверки хранилища менеджер работает напрямую.
    pub fn new(sync: Arc<Synchronizer>, gateway: Arc<Gateway>, notifier: Notifier, config: FallbackConfig) -> Self {
        Self {
            sync,
            gateway,
            notifier,
            config,
            mode: RwLock::new(OperatingMode::Fallback),
            offline_available: AtomicBool::new(false),
            error_count: AtomicU32::new(0),
        }
    }

    pub fn mode(&self) -> OperatingMode {
        *self.mode.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_mode(&self, mode: OperatingMode) {
        *self.mode.write().unwrap_or_else(|e| e.into_inner()) = mode;
    }

    /// Проверка локального хранилища. Определяет режим работы.
    pub async fn check_offline_availability(&self) -> bool {
        match self.sync.store().init().await {
            Ok(()) => {
                self.offline_available.store(true, Ordering::Release);
                self.error_count.store(0, Ordering::Release);
                self.set_mode(OperatingMode::Capable);
                info!("Offline functionality available");
                true
            }
            Err(e) => {
                warn!("Offline functionality unavailable: {}", e);
                self.offline_available.store(false, Ordering::Release);
                self.set_mode(OperatingMode::Fallback);
                false
            }
        }
    }

    pub async fn retry_offline_functionality(&self) -> bool {
        info!("Retrying offline functionality");
        self.error_count.store(0, Ordering::Release);
        self.check_offline_availability().await
    }

    pub fn enable_fallback_mode(&self) {
        self.set_mode(OperatingMode::Fallback);
        info!("Fallback mode enabled manually");
    }

    /// Сбрасывает счётчик без повторной проверки хранилища.
    pub fn disable_fallback_mode(&self) {
        self.error_count.store(0, Ordering::Release);
        self.set_mode(OperatingMode::Capable);
        info!("Fallback mode disabled manually");
    }

    pub fn is_offline_available(&self) -> bool {
        self.offline_available.load(Ordering::Acquire)
    }

    pub fn is_fallback_mode(&self) -> bool {
        self.mode() == OperatingMode::Fallback
    }

    pub fn is_online(&self) -> bool {
        self.sync.is_online()
    }

    pub fn is_offline(&self) -> bool {
        !self.is_online()
    }

    pub fn stats(&self) -> FallbackStats {
        let mode = self.mode();
        FallbackStats {
            mode,
            offline_available: self.is_offline_available(),
            fallback_mode: mode == OperatingMode::Fallback,
            offline_error_count: self.error_count.load(Ordering::Acquire),
            max_offline_errors: self.config.max_offline_errors,
            online: self.is_online(),
        }
    }

    pub fn set_performance_id(&self, performance_id: PerformanceId) {
        self.sync.set_performance_id(performance_id);
    }

    fn uses_local_path(&self) -> bool {
        self.is_offline_available() && !self.is_fallback_mode()
    }

    fn local_success(&self) {
        self.error_count.store(0, Ordering::Release);
    }

    fn local_failure(&self, operation: &str, e: &StoreError) {
        let count = self.error_count.fetch_add(1, Ordering::AcqRel) + 1;
        warn!(
            "Local path for {} failed ({}/{}): {}",
            operation, count, self.config.max_offline_errors, e
        );
        if count >= self.config.max_offline_errors && !self.is_fallback_mode() {
            self.set_mode(OperatingMode::Fallback);
            error!("Switching to fallback mode after {} local store failures", count);
            self.notifier.info(
                "Fallback mode",
                "Local storage keeps failing, operations now go straight to the server.",
            );
        }
    }

    // Результат локального пути: Some - ответ для вызывающего, None - идти напрямую
    fn settle<T>(&self, operation: &str, result: Result<T, SyncError>) -> Option<Result<T, Failure>> {
        match result {
            Ok(value) => {
                self.local_success();
                Some(Ok(value))
            }
            Err(SyncError::Remote(failure)) => {
                self.local_success();
                Some(Err(failure))
            }
            Err(SyncError::Store(e)) => {
                self.local_failure(operation, &e);
                None
            }
        }
    }

    async fn dispatch(&self, call: &DirectCall<'_>) -> RpcResult {
        match call {
            DirectCall::SeatData(pid, session) => {
                self.gateway
                    .get_seat_data(pid, session.is_admin(), session.is_super_admin())
                    .await
            }
            DirectCall::Reservations(pid) => self.gateway.get_reservations(pid).await,
            DirectCall::Change(pid, action) => self.gateway.apply(pid, action).await,
        }
    }

    /// Прямой вызов с повторами. Отказ бэкенда не повторяется.
    async fn direct(&self, operation: &str, call: DirectCall<'_>) -> Result<Map<String, Value>, Failure> {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("Direct {} attempt {}/{}", operation, attempt, max_attempts);
            let failure = match self.dispatch(&call).await.into_result() {
                Ok(payload) => return Ok(payload),
                Err(failure) => failure,
            };

            if !failure.is_retryable() {
                self.gateway.report_failure(operation, &failure);
                return Err(failure);
            }
            if attempt >= max_attempts {
                let failure = Failure::new(
                    failure.kind,
                    format!("{} failed after {} attempts: {}", operation, attempt, failure.message),
                );
                self.gateway.report_failure(operation, &failure);
                return Err(failure);
            }

            warn!("Direct {} failed (attempt {}): {}", operation, attempt, failure);
            tokio::time::sleep(self.config.retry_delay() * attempt).await;
        }
    }

    /// Зеркало хранит полные данные, поэтому снимок режется по сессии на
    /// любом пути.
    pub async fn get_seats_data(&self, session: Session, performance_id: &PerformanceId) -> Result<SeatSnapshot, Failure> {
        if self.uses_local_path() {
            let local = self.sync.get_seats(performance_id).await;
            if let Some(result) = self.settle("get_seats_data", local) {
                return result.map(|snapshot| snapshot.visible_to(session));
            }
        }

        let payload = self
            .direct("get_seats_data", DirectCall::SeatData(performance_id, session))
            .await?;
        let seats = Seat::from_payload(&payload)?;
        Ok(SeatSnapshot::new(performance_id.clone(), seats, Source::ServerFallback).visible_to(session))
    }

    pub async fn get_reservations_data(&self, performance_id: &PerformanceId) -> Result<Vec<Reservation>, Failure> {
        if self.uses_local_path() {
            let local = self.sync.get_reservations(performance_id).await;
            if let Some(result) = self.settle("get_reservations_data", local) {
                return result;
            }
        }

        let payload = self
            .direct("get_reservations_data", DirectCall::Reservations(performance_id))
            .await?;
        Ok(payload
            .get("data")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|row| Reservation::from_remote(performance_id, row).ok())
            .collect())
    }

    pub async fn reserve_seats(
        &self,
        _session: Session,
        performance_id: &PerformanceId,
        request: ReserveRequest,
    ) -> Result<MutationReply, Failure> {
        request.validate()?;
        self.mutate("reserve_seats", performance_id, ChangeAction::Reserve(request))
            .await
    }

    pub async fn check_in_seats(
        &self,
        session: Session,
        performance_id: &PerformanceId,
        request: CheckInRequest,
    ) -> Result<MutationReply, Failure> {
        session.can_check_in()?;
        request.validate()?;
        self.mutate("check_in_seats", performance_id, ChangeAction::CheckIn(request))
            .await
    }

    pub async fn admin_edit_seat(
        &self,
        session: Session,
        performance_id: &PerformanceId,
        request: AdminEditRequest,
    ) -> Result<MutationReply, Failure> {
        session.can_edit_seats()?;
        request.validate()?;
        self.mutate("admin_edit_seat", performance_id, ChangeAction::AdminEdit(request))
            .await
    }

    /// Места выбирает бэкенд, поэтому выдача всегда идёт напрямую.
    pub async fn issue_walk_in(
        &self,
        session: Session,
        performance_id: &PerformanceId,
        request: WalkInRequest,
    ) -> Result<MutationReply, Failure> {
        session.can_issue_walk_in()?;
        request.validate()?;
        let action = ChangeAction::WalkIn(request);
        let payload = self
            .direct("issue_walk_in", DirectCall::Change(performance_id, &action))
            .await?;
        let reply = MutationReply::from_payload(Source::Server, &payload, Vec::new());
        info!("Walk-in issued for {}: {}", performance_id, reply.display());
        Ok(reply)
    }

    async fn mutate(
        &self,
        operation: &str,
        performance_id: &PerformanceId,
        action: ChangeAction,
    ) -> Result<MutationReply, Failure> {
        if self.uses_local_path() {
            let local = self.sync.submit(performance_id, action.clone()).await;
            if let Some(result) = self.settle(operation, local) {
                return result;
            }
        }

        let payload = self
            .direct(operation, DirectCall::Change(performance_id, &action))
            .await?;
        Ok(MutationReply::from_payload(Source::ServerFallback, &payload, action.seat_ids()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, SyncConfig};
    use crate::error::{ErrorKind, StoreResult};
    use crate::models::{ChangeType, Mode, PendingChange, SeatStatus};
    use crate::store::{OfflineStore, SqliteStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // Хранилище, которое можно "сломать" на лету
    struct FlakyStore {
        inner: SqliteStore,
        broken: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> StoreResult<()> {
            if self.broken.load(Ordering::Acquire) {
                Err(StoreError::Unavailable("quota exceeded".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl OfflineStore for FlakyStore {
        async fn init(&self) -> StoreResult<()> {
            self.check()?;
            self.inner.init().await
        }
        async fn save_seats(&self, pid: &PerformanceId, seats: &[Seat]) -> StoreResult<()> {
            self.check()?;
            self.inner.save_seats(pid, seats).await
        }
        async fn get_seats(&self, pid: &PerformanceId) -> StoreResult<Vec<Seat>> {
            self.check()?;
            self.inner.get_seats(pid).await
        }
        async fn upsert_seat(&self, pid: &PerformanceId, seat: &Seat) -> StoreResult<()> {
            self.check()?;
            self.inner.upsert_seat(pid, seat).await
        }
        async fn save_reservation(&self, reservation: &Reservation) -> StoreResult<()> {
            self.check()?;
            self.inner.save_reservation(reservation).await
        }
        async fn replace_reservations(&self, pid: &PerformanceId, reservations: &[Reservation]) -> StoreResult<()> {
            self.check()?;
            self.inner.replace_reservations(pid, reservations).await
        }
        async fn get_reservations(&self, pid: &PerformanceId) -> StoreResult<Vec<Reservation>> {
            self.check()?;
            self.inner.get_reservations(pid).await
        }
        async fn record_change(&self, t: ChangeType, pid: &PerformanceId, data: Value) -> StoreResult<PendingChange> {
            self.check()?;
            self.inner.record_change(t, pid, data).await
        }
        async fn get_unsynced_changes(&self) -> StoreResult<Vec<PendingChange>> {
            self.check()?;
            self.inner.get_unsynced_changes().await
        }
        async fn mark_changes_as_synced(&self, ids: &[i64]) -> StoreResult<u64> {
            self.check()?;
            self.inner.mark_changes_as_synced(ids).await
        }
        async fn record_retry(&self, id: i64, count: u32, error: &str) -> StoreResult<()> {
            self.check()?;
            self.inner.record_retry(id, count, error).await
        }
        async fn abandon_change(&self, id: i64, reason: &str) -> StoreResult<()> {
            self.check()?;
            self.inner.abandon_change(id, reason).await
        }
        async fn get_abandoned_changes(&self) -> StoreResult<Vec<PendingChange>> {
            self.check()?;
            self.inner.get_abandoned_changes().await
        }
        async fn save_setting(&self, key: &str, value: &Value) -> StoreResult<()> {
            self.check()?;
            self.inner.save_setting(key, value).await
        }
        async fn get_setting(&self, key: &str) -> StoreResult<Option<Value>> {
            self.check()?;
            self.inner.get_setting(key).await
        }
        async fn clear(&self) -> StoreResult<()> {
            self.check()?;
            self.inner.clear().await
        }
    }

    fn pid() -> PerformanceId {
        PerformanceId::new("G", "1", "A")
    }

    async fn manager(endpoints: Vec<String>, max_retries: u32) -> (Arc<FlakyStore>, FallbackManager) {
        let store = Arc::new(FlakyStore {
            inner: SqliteStore::in_memory().await.unwrap(),
            broken: AtomicBool::new(false),
        });
        let notifier = Notifier::default();
        let gateway = Arc::new(Gateway::new(&GatewayConfig { endpoints, timeout_ms: 1000 }, notifier.clone()).unwrap());
        let sync = Arc::new(Synchronizer::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            SyncConfig {
                interval_secs: 30,
                max_retries: 3,
                retry_delay_ms: 5,
                performance_id: Some(pid()),
            },
        ));
        let config = FallbackConfig {
            max_offline_errors: 3,
            max_retries,
            retry_delay_ms: 5,
        };
        let manager = FallbackManager::new(sync, gateway, notifier, config);
        assert!(manager.check_offline_availability().await);
        (store, manager)
    }

    async fn mount(server: &MockServer, func: &str, body: Value) {
        Mock::given(method("GET"))
            .and(query_param("func", func))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    fn reserve(seat: &str) -> ReserveRequest {
        ReserveRequest { seat_ids: vec![seat.to_string()], holder: None }
    }

    #[tokio::test]
    async fn repeated_store_failures_switch_to_fallback_and_retry_restores() {
        let server = MockServer::start().await;
        mount(&server, "reserveSeats", json!({"success": true})).await;
        let (store, manager) = manager(vec![format!("{}/exec", server.uri())], 3).await;
        let session = Session::default();

        store.broken.store(true, Ordering::Release);
        for n in 1..=3u32 {
            assert!(!manager.is_fallback_mode());
            let reply = manager.reserve_seats(session, &pid(), reserve("A1")).await.unwrap();
            // Сбой хранилища не роняет операцию, она уходит напрямую
            assert_eq!(reply.source, Source::ServerFallback);
            assert_eq!(manager.stats().offline_error_count, n);
        }
        assert!(manager.is_fallback_mode());

        // Пока хранилище сломано, повторная проверка не помогает
        assert!(!manager.retry_offline_functionality().await);
        assert!(manager.is_fallback_mode());

        store.broken.store(false, Ordering::Release);
        assert!(manager.retry_offline_functionality().await);
        assert!(!manager.is_fallback_mode());
        assert_eq!(manager.stats().offline_error_count, 0);
    }

    #[tokio::test]
    async fn local_success_resets_consecutive_counter() {
        let server = MockServer::start().await;
        mount(&server, "reserveSeats", json!({"success": true})).await;
        let (store, manager) = manager(vec![format!("{}/exec", server.uri())], 3).await;
        let session = Session::default();

        store.broken.store(true, Ordering::Release);
        manager.reserve_seats(session, &pid(), reserve("A1")).await.unwrap();
        manager.reserve_seats(session, &pid(), reserve("A2")).await.unwrap();
        store.broken.store(false, Ordering::Release);
        let reply = manager.reserve_seats(session, &pid(), reserve("A3")).await.unwrap();
        assert_eq!(reply.source, Source::Server);
        assert_eq!(manager.stats().offline_error_count, 0);
        assert!(!manager.is_fallback_mode());
    }

    #[tokio::test]
    async fn walk_in_goes_direct_and_queues_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("func", "assignWalkInSeats"))
            .and(query_param("params", r#"["G","1","A",3]"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "seatIds": ["E1", "E2", "E3"]})))
            .expect(1)
            .mount(&server)
            .await;
        let (store, manager) = manager(vec![format!("{}/exec", server.uri())], 3).await;

        let reply = manager
            .issue_walk_in(Session::new(Mode::Walkin), &pid(), WalkInRequest { count: 3 })
            .await
            .unwrap();
        assert_eq!(reply.display(), "E1 / E2 / E3");
        assert!(store.get_unsynced_changes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn permission_and_validation_are_checked_before_any_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(0)
            .mount(&server)
            .await;
        let (store, manager) = manager(vec![format!("{}/exec", server.uri())], 3).await;

        let denied = manager
            .check_in_seats(Session::default(), &pid(), CheckInRequest { seat_ids: vec!["A1".into()] })
            .await
            .unwrap_err();
        assert_eq!(denied.kind, ErrorKind::Permission);

        let edit = AdminEditRequest { seat_id: "A1".into(), column_c: None, column_d: None, column_e: None };
        let denied = manager
            .admin_edit_seat(Session::new(Mode::Admin), &pid(), edit)
            .await
            .unwrap_err();
        assert_eq!(denied.kind, ErrorKind::Permission);

        let invalid = manager
            .issue_walk_in(Session::new(Mode::Admin), &pid(), WalkInRequest { count: 9 })
            .await
            .unwrap_err();
        assert_eq!(invalid.kind, ErrorKind::Validation);
        assert!(store.get_unsynced_changes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn direct_path_retries_then_fails_terminally() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("func", "getSeatData"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;
        mount(&server, "reportError", json!({"success": true})).await;
        let (_store, manager) = manager(vec![format!("{}/exec", server.uri())], 3).await;
        manager.enable_fallback_mode();

        let mut notices = manager.notifier.subscribe();

        let failure = manager
            .get_seats_data(Session::new(Mode::Admin), &pid())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Transport);
        assert!(failure.message.contains("3 attempts"));

        // Один отчёт на операцию, а не на каждую попытку
        let mut count = 0;
        while notices.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 1);
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let reports = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.query().is_some_and(|q| q.contains("func=reportError")))
            .count();
        assert_eq!(reports, 1);
    }

    #[tokio::test]
    async fn session_sees_the_same_fields_on_both_paths() {
        let server = MockServer::start().await;
        mount(
            &server,
            "getSeatData",
            json!({"success": true, "seatMap": {
                "A1": {"id": "A1", "status": "reserved", "name": "Secret Holder", "columnC": "paid"}
            }}),
        )
        .await;
        mount(&server, "getReservations", json!({"success": true, "data": []})).await;
        let (_store, manager) = manager(vec![format!("{}/exec", server.uri())], 3).await;

        let local = manager.get_seats_data(Session::default(), &pid()).await.unwrap();
        assert_eq!(local.source, Source::Server);
        manager.enable_fallback_mode();
        let direct = manager.get_seats_data(Session::default(), &pid()).await.unwrap();
        assert_eq!(direct.source, Source::ServerFallback);

        for snapshot in [&local, &direct] {
            let seat = snapshot.seat("A1").unwrap();
            assert_eq!(seat.status, SeatStatus::Reserved);
            assert_eq!(seat.name, None);
            assert!(seat.extensions.is_empty());
        }

        let admin = manager.get_seats_data(Session::new(Mode::Admin), &pid()).await.unwrap();
        assert_eq!(admin.seat("A1").unwrap().name.as_deref(), Some("Secret Holder"));
        assert!(admin.seat("A1").unwrap().extensions.is_empty());

        manager.disable_fallback_mode();
        let superadmin = manager.get_seats_data(Session::new(Mode::SuperAdmin), &pid()).await.unwrap();
        assert_eq!(superadmin.source, Source::Server);
        assert_eq!(superadmin.seat("A1").unwrap().extensions.get("columnC"), Some(&json!("paid")));
    }

    #[tokio::test]
    async fn direct_read_without_seat_map_is_an_error() {
        let server = MockServer::start().await;
        mount(&server, "getSeatData", json!({"success": true})).await;
        mount(&server, "reportError", json!({"success": true})).await;
        let (_store, manager) = manager(vec![format!("{}/exec", server.uri())], 1).await;
        manager.enable_fallback_mode();

        let failure = manager.get_seats_data(Session::default(), &pid()).await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Transport);
    }

    #[tokio::test]
    async fn direct_path_recovers_on_a_later_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("func", "getSeatData"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount(
            &server,
            "getSeatData",
            json!({"success": true, "seatMap": {"E1": {"id": "E1", "status": "available"}}}),
        )
        .await;
        mount(&server, "reportError", json!({"success": true})).await;
        let (_store, manager) = manager(vec![format!("{}/exec", server.uri())], 3).await;
        manager.enable_fallback_mode();

        let snapshot = manager.get_seats_data(Session::default(), &pid()).await.unwrap();
        assert_eq!(snapshot.source, Source::ServerFallback);
        assert_eq!(snapshot.seats.len(), 1);
    }

    #[tokio::test]
    async fn application_rejection_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("func", "checkInMultipleSeats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false, "error": "not reserved"})))
            .expect(1)
            .mount(&server)
            .await;
        let (_store, manager) = manager(vec![format!("{}/exec", server.uri())], 3).await;
        manager.enable_fallback_mode();

        let failure = manager
            .check_in_seats(
                Session::new(Mode::SuperAdmin),
                &pid(),
                CheckInRequest { seat_ids: vec!["A1".into(), "A2".into()] },
            )
            .await
            .unwrap_err();
        assert_eq!(failure, Failure::application("not reserved"));
    }
}
