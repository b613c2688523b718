use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::performance::PerformanceId;
use super::requests::{AdminEditRequest, CheckInRequest, ReserveRequest, WalkInRequest};
use crate::error::Failure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Reservation,
    Checkin,
    Walkin,
    AdminEdit,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Reservation => "reservation",
            ChangeType::Checkin => "checkin",
            ChangeType::Walkin => "walkin",
            ChangeType::AdminEdit => "admin_edit",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = Failure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reservation" => Ok(ChangeType::Reservation),
            "checkin" => Ok(ChangeType::Checkin),
            "walkin" => Ok(ChangeType::Walkin),
            "admin_edit" => Ok(ChangeType::AdminEdit),
            other => Err(Failure::validation(format!("unknown change type '{}'", other))),
        }
    }
}

/// Локальная мутация, ожидающая доставки на бэкенд.
///
/// `synced` переходит из `false` в `true` ровно один раз, после
/// подтверждения от бэкенда. Сопоставление идёт только по `id`/`change_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: i64,
    pub change_id: Uuid,
    pub change_type: ChangeType,
    pub performance_id: PerformanceId,
    pub data: Value,
    pub timestamp: i64,
    pub synced: bool,
    pub retry_count: u32,
    pub abandoned: bool,
    pub last_error: Option<String>,
}

impl PendingChange {
    /// Типизированное действие из сохранённого payload.
    pub fn action(&self) -> Result<ChangeAction, Failure> {
        ChangeAction::from_parts(self.change_type, &self.data)
    }
}

/// Мутация с типизированным payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeAction {
    Reserve(ReserveRequest),
    CheckIn(CheckInRequest),
    WalkIn(WalkInRequest),
    AdminEdit(AdminEditRequest),
}

impl ChangeAction {
    pub fn change_type(&self) -> ChangeType {
        match self {
            ChangeAction::Reserve(_) => ChangeType::Reservation,
            ChangeAction::CheckIn(_) => ChangeType::Checkin,
            ChangeAction::WalkIn(_) => ChangeType::Walkin,
            ChangeAction::AdminEdit(_) => ChangeType::AdminEdit,
        }
    }

    pub fn to_data(&self) -> Result<Value, serde_json::Error> {
        match self {
            ChangeAction::Reserve(r) => serde_json::to_value(r),
            ChangeAction::CheckIn(r) => serde_json::to_value(r),
            ChangeAction::WalkIn(r) => serde_json::to_value(r),
            ChangeAction::AdminEdit(r) => serde_json::to_value(r),
        }
    }

    pub fn from_parts(change_type: ChangeType, data: &Value) -> Result<Self, Failure> {
        let parsed = match change_type {
            ChangeType::Reservation => serde_json::from_value(data.clone()).map(ChangeAction::Reserve),
            ChangeType::Checkin => serde_json::from_value(data.clone()).map(ChangeAction::CheckIn),
            ChangeType::Walkin => serde_json::from_value(data.clone()).map(ChangeAction::WalkIn),
            ChangeType::AdminEdit => serde_json::from_value(data.clone()).map(ChangeAction::AdminEdit),
        };
        parsed.map_err(|e| Failure::validation(format!("corrupt {} payload: {}", change_type, e)))
    }

    /// Места, которых касается мутация. Выдача на кассе мест заранее не знает.
    pub fn seat_ids(&self) -> Vec<String> {
        match self {
            ChangeAction::Reserve(r) => r.seat_ids.clone(),
            ChangeAction::CheckIn(r) => r.seat_ids.clone(),
            ChangeAction::WalkIn(_) => Vec::new(),
            ChangeAction::AdminEdit(r) => vec![r.seat_id.clone()],
        }
    }
}
