use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::performance::PerformanceId;
use super::seat::parse_seat_id;
use crate::error::Failure;

/// Бронирование места. Не больше одного на занятое место.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub performance_id: PerformanceId,
    pub row: String,
    pub column: u32,
    pub holder: Option<String>,
    pub timestamp: i64,
}

impl Reservation {
    pub fn new(performance_id: PerformanceId, seat_id: &str, holder: Option<String>) -> Result<Self, Failure> {
        let (row, column) = parse_seat_id(seat_id)?;
        Ok(Self {
            performance_id,
            row,
            column,
            holder,
            timestamp: super::now_millis(),
        })
    }

    pub fn seat_id(&self) -> String {
        format!("{}{}", self.row, self.column)
    }

    /// Разбор элемента из ответа `getReservations`:
    /// `{"seatId":"A1","name":"..."}` (или `row`/`column` вместо `seatId`).
    pub fn from_remote(performance_id: &PerformanceId, value: &Value) -> Result<Self, Failure> {
        let obj = value
            .as_object()
            .ok_or_else(|| Failure::application("reservation is not an object"))?;

        let seat_id = match (obj.get("seatId").or_else(|| obj.get("id")), obj.get("row"), obj.get("column")) {
            (Some(Value::String(id)), _, _) => id.clone(),
            (_, Some(Value::String(row)), Some(column)) => format!("{}{}", row, column_text(column)),
            _ => return Err(Failure::application("reservation has no seat reference")),
        };

        let holder = obj
            .get("name")
            .or_else(|| obj.get("holder"))
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
            .map(str::to_string);

        let mut reservation = Self::new(performance_id.clone(), &seat_id, holder)?;
        if let Some(ts) = obj.get("timestamp").and_then(Value::as_i64) {
            reservation.timestamp = ts;
        }
        Ok(reservation)
    }
}

fn column_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
