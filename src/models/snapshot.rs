use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::performance::PerformanceId;
use super::seat::{Seat, SeatStatus};
use super::session::Session;

/// Откуда получен ответ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Бэкенд через локальный путь.
    Server,
    /// Бэкенд напрямую, в обход локального хранилища.
    ServerFallback,
    /// Локальное зеркало.
    Local,
    /// Сохранено локально, доставка отложена.
    Offline,
}

/// Снимок мест спектакля, как его видит UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatSnapshot {
    pub performance_id: PerformanceId,
    pub seats: Vec<Seat>,
    pub source: Source,
    /// Места, затронутые недоставленными изменениями. Статус им не подменяется.
    #[serde(default)]
    pub pending_seat_ids: Vec<String>,
    pub last_sync: Option<i64>,
}

impl SeatSnapshot {
    pub fn new(performance_id: PerformanceId, seats: Vec<Seat>, source: Source) -> Self {
        Self {
            performance_id,
            seats,
            source,
            pending_seat_ids: Vec::new(),
            last_sync: None,
        }
    }

    pub fn seat(&self, id: &str) -> Option<&Seat> {
        self.seats.iter().find(|s| s.id() == id)
    }

    /// Места, которых нет в снимке, считаются недоступными.
    pub fn status_of(&self, id: &str) -> SeatStatus {
        self.seat(id).map(|s| s.status).unwrap_or(SeatStatus::Unavailable)
    }

    /// Снимок в том виде, в каком его можно показать оператору в этом режиме.
    pub fn visible_to(mut self, session: Session) -> Self {
        for seat in &mut self.seats {
            seat.redact_for(session);
        }
        self
    }
}

/// Результат мутирующей операции.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationReply {
    pub source: Source,
    /// `true`, если изменение записано, но ещё не доставлено.
    pub offline: bool,
    pub change_id: Option<Uuid>,
    pub seat_ids: Vec<String>,
    pub message: String,
}

impl MutationReply {
    pub fn delivered(source: Source, seat_ids: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            source,
            offline: false,
            change_id: None,
            seat_ids,
            message: message.into(),
        }
    }

    /// Ответ бэкенда: места берутся из `seatIds`/`seatId`, иначе из запроса.
    pub fn from_payload(source: Source, payload: &Map<String, Value>, requested: Vec<String>) -> Self {
        let seat_ids = match (payload.get("seatIds"), payload.get("seatId")) {
            (Some(Value::Array(ids)), _) => ids.iter().filter_map(Value::as_str).map(str::to_string).collect(),
            (_, Some(Value::String(id))) => vec![id.clone()],
            _ => requested,
        };
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Done")
            .to_string();
        Self::delivered(source, seat_ids, message)
    }

    pub fn queued(change_id: Uuid, seat_ids: Vec<String>) -> Self {
        Self {
            source: Source::Offline,
            offline: true,
            change_id: Some(change_id),
            seat_ids,
            message: "Saved offline, will sync when the connection returns".to_string(),
        }
    }

    pub fn with_change_id(mut self, change_id: Uuid) -> Self {
        self.change_id = Some(change_id);
        self
    }

    /// Строка для показа оператору: `E1 / E2 / E3`.
    pub fn display(&self) -> String {
        self.seat_ids.join(" / ")
    }
}
