use serde_json::{json, Value};

use super::{Gateway, RpcResult};
use crate::models::{ChangeAction, PerformanceId};

fn with_performance(performance_id: &PerformanceId, rest: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut params = performance_id.rpc_params();
    params.extend(rest);
    params
}

// Типизированные обёртки над функциями бэкенда
impl Gateway {
    pub async fn get_seat_data(&self, performance_id: &PerformanceId, is_admin: bool, is_super_admin: bool) -> RpcResult {
        self.call(
            "getSeatData",
            with_performance(performance_id, [json!(is_admin), json!(is_super_admin)]),
        )
        .await
    }

    pub async fn get_reservations(&self, performance_id: &PerformanceId) -> RpcResult {
        self.call("getReservations", performance_id.rpc_params()).await
    }

    pub async fn reserve_seats(&self, performance_id: &PerformanceId, seat_ids: &[String]) -> RpcResult {
        self.call("reserveSeats", with_performance(performance_id, [json!(seat_ids)]))
            .await
    }

    pub async fn check_in_seat(&self, performance_id: &PerformanceId, seat_id: &str) -> RpcResult {
        self.call("checkInSeat", with_performance(performance_id, [json!(seat_id)]))
            .await
    }

    pub async fn check_in_multiple_seats(&self, performance_id: &PerformanceId, seat_ids: &[String]) -> RpcResult {
        self.call("checkInMultipleSeats", with_performance(performance_id, [json!(seat_ids)]))
            .await
    }

    /// Одно место для одиночного посетителя или блок мест для группы.
    pub async fn check_in(&self, performance_id: &PerformanceId, seat_ids: &[String]) -> RpcResult {
        match seat_ids {
            [single] => self.check_in_seat(performance_id, single).await,
            _ => self.check_in_multiple_seats(performance_id, seat_ids).await,
        }
    }

    pub async fn assign_walk_in_seat(&self, performance_id: &PerformanceId) -> RpcResult {
        self.call("assignWalkInSeat", performance_id.rpc_params()).await
    }

    pub async fn assign_walk_in_seats(&self, performance_id: &PerformanceId, count: u32) -> RpcResult {
        self.call("assignWalkInSeats", with_performance(performance_id, [json!(count)]))
            .await
    }

    pub async fn update_seat_data(
        &self,
        performance_id: &PerformanceId,
        seat_id: &str,
        column_c: Option<&str>,
        column_d: Option<&str>,
        column_e: Option<&str>,
    ) -> RpcResult {
        self.call(
            "updateSeatData",
            with_performance(
                performance_id,
                [json!(seat_id), json!(column_c), json!(column_d), json!(column_e)],
            ),
        )
        .await
    }

    /// Отправляет локальную мутацию соответствующей функцией бэкенда.
    pub async fn apply(&self, performance_id: &PerformanceId, action: &ChangeAction) -> RpcResult {
        match action {
            ChangeAction::Reserve(r) => self.reserve_seats(performance_id, &r.seat_ids).await,
            ChangeAction::CheckIn(r) => self.check_in(performance_id, &r.seat_ids).await,
            ChangeAction::WalkIn(r) if r.count == 1 => self.assign_walk_in_seat(performance_id).await,
            ChangeAction::WalkIn(r) => self.assign_walk_in_seats(performance_id, r.count).await,
            ChangeAction::AdminEdit(r) => {
                self.update_seat_data(
                    performance_id,
                    &r.seat_id,
                    r.column_c.as_deref(),
                    r.column_d.as_deref(),
                    r.column_e.as_deref(),
                )
                .await
            }
        }
    }

    pub async fn get_all_timeslots_for_group(&self, group: &str) -> RpcResult {
        self.call("getAllTimeslotsForGroup", vec![json!(group)]).await
    }

    pub async fn test_api(&self) -> RpcResult {
        self.call("testApi", Vec::new()).await
    }

    /// Бэкенд доступен, если хоть что-то ответил, даже отказом.
    pub async fn probe(&self) -> bool {
        match self.test_api().await.outcome {
            Ok(_) => true,
            Err(failure) => !failure.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::services::notifier::Notifier;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn wrappers_prefix_performance_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("func", "assignWalkInSeats"))
            .and(query_param("params", r#"["G","1","A",3]"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "seatIds": ["E1", "E2", "E3"]})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("func", "checkInSeat"))
            .and(query_param("params", r#"["G","1","A","B4"]"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let config = GatewayConfig { endpoints: vec![format!("{}/exec", server.uri())], timeout_ms: 2000 };
        let gw = Gateway::new(&config, Notifier::default()).unwrap();
        let pid = PerformanceId::new("G", "1", "A");

        let walk_in = gw.assign_walk_in_seats(&pid, 3).await.into_result().unwrap();
        assert_eq!(walk_in["seatIds"], json!(["E1", "E2", "E3"]));
        assert!(gw.check_in(&pid, &["B4".to_string()]).await.is_success());
    }

    #[tokio::test]
    async fn probe_treats_refusal_as_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false, "error": "maintenance"})))
            .mount(&server)
            .await;

        let up = GatewayConfig { endpoints: vec![format!("{}/exec", server.uri())], timeout_ms: 2000 };
        assert!(Gateway::new(&up, Notifier::default()).unwrap().probe().await);

        let down = GatewayConfig { endpoints: vec!["http://127.0.0.1:1/exec".into()], timeout_ms: 500 };
        assert!(!Gateway::new(&down, Notifier::default()).unwrap().probe().await);
    }
}
