use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::session::Session;
use crate::error::Failure;

/// Статус места. Легальные переходы решает бэкенд, клиент только зеркалит.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeatStatus {
    Available,
    Reserved,
    ToBeCheckedIn,
    CheckedIn,
    Unavailable,
}

impl SeatStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SeatStatus::Available => "available",
            SeatStatus::Reserved => "reserved",
            SeatStatus::ToBeCheckedIn => "to-be-checked-in",
            SeatStatus::CheckedIn => "checked-in",
            SeatStatus::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatStatus {
    type Err = Failure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(SeatStatus::Available),
            "reserved" => Ok(SeatStatus::Reserved),
            "to-be-checked-in" => Ok(SeatStatus::ToBeCheckedIn),
            "checked-in" => Ok(SeatStatus::CheckedIn),
            "unavailable" => Ok(SeatStatus::Unavailable),
            other => Err(Failure::validation(format!("unknown seat status '{}'", other))),
        }
    }
}

/// Разбирает id места вида `A12` на ряд и номер.
pub fn parse_seat_id(id: &str) -> Result<(String, u32), Failure> {
    let split = id
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| Failure::validation(format!("seat id '{}' has no column number", id)))?;
    let (row, column) = id.split_at(split);
    if row.is_empty() || !row.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(Failure::validation(format!("seat id '{}' has no row letter", id)));
    }
    let column: u32 = column
        .parse()
        .map_err(|_| Failure::validation(format!("seat id '{}' has a malformed column", id)))?;
    if column == 0 {
        return Err(Failure::validation(format!("seat id '{}' has column 0", id)));
    }
    Ok((row.to_string(), column))
}

/// Запись о месте. Служебные поля хранилища (ключ, performance_id, время
/// записи) сюда не попадают.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    pub row: String,
    pub column: u32,
    pub status: SeatStatus,
    pub name: Option<String>,
    /// Свободные колонки админки (columnC/D/E) и всё, что ещё пришлёт бэкенд.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

impl Seat {
    pub fn new(row: impl Into<String>, column: u32, status: SeatStatus) -> Self {
        Self {
            row: row.into(),
            column,
            status,
            name: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn id(&self) -> String {
        format!("{}{}", self.row, self.column)
    }

    /// Разбор элемента `seatMap` из ответа бэкенда:
    /// `{"id":"A1","status":"reserved","name":"...", "columnC": ...}`.
    pub fn from_remote(key: &str, value: &Value) -> Result<Self, Failure> {
        let obj = value
            .as_object()
            .ok_or_else(|| Failure::application(format!("seat '{}' is not an object", key)))?;
        let id = obj.get("id").and_then(Value::as_str).unwrap_or(key);
        let (row, column) = parse_seat_id(id)?;
        let status: SeatStatus = obj
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unavailable")
            .parse()?;
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        let extensions = obj
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "id" | "status" | "name"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self { row, column, status, name, extensions })
    }

    /// Все места из `seatMap`; нераспознанные пропускаются с предупреждением.
    pub fn from_seat_map(seat_map: &Map<String, Value>) -> Vec<Self> {
        seat_map
            .iter()
            .filter_map(|(key, value)| match Seat::from_remote(key, value) {
                Ok(seat) => Some(seat),
                Err(e) => {
                    tracing::warn!("Skipping malformed seat {}: {}", key, e.message);
                    None
                }
            })
            .collect()
    }

    /// Карта мест из успешного ответа `getSeatData`. Ответ без `seatMap`
    /// считается битым, пустой снимок из него не строится.
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Vec<Self>, Failure> {
        match payload.get("seatMap") {
            Some(Value::Object(map)) => Ok(Seat::from_seat_map(map)),
            Some(_) => Err(Failure::transport("seat data response has a malformed seatMap")),
            None => Err(Failure::transport("seat data response has no seatMap")),
        }
    }

    /// Прячет то, что не положено видеть в данном режиме: имена только
    /// админам, колонки админки только суперадмину.
    pub fn redact_for(&mut self, session: Session) {
        if !session.is_admin() {
            self.name = None;
        }
        if !session.is_super_admin() {
            self.extensions.clear();
        }
    }
}

/// Ячейка схемы зала.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum LayoutCell {
    Seat(String),
    Gap,
    Passage,
}

/// Геометрия зала: ряды A–D по 12 мест, ряд E из шести мест на позициях 4–9,
/// проход после шестой позиции.
#[derive(Debug, Clone)]
pub struct SeatLayout {
    rows: Vec<char>,
    columns: u32,
    passage_after: u32,
}

impl Default for SeatLayout {
    fn default() -> Self {
        Self {
            rows: vec!['A', 'B', 'C', 'D', 'E'],
            columns: 12,
            passage_after: 6,
        }
    }
}

impl SeatLayout {
    fn seat_at(&self, row: char, position: u32) -> Option<String> {
        if row == 'E' {
            // E1..E6 сдвинуты к центру
            (4..=9).contains(&position).then(|| format!("E{}", position - 3))
        } else {
            Some(format!("{}{}", row, position))
        }
    }

    pub fn cells(&self) -> Vec<Vec<LayoutCell>> {
        self.rows
            .iter()
            .map(|&row| {
                let mut cells = Vec::new();
                for position in 1..=self.columns {
                    cells.push(match self.seat_at(row, position) {
                        Some(id) => LayoutCell::Seat(id),
                        None => LayoutCell::Gap,
                    });
                    if position == self.passage_after {
                        cells.push(LayoutCell::Passage);
                    }
                }
                cells
            })
            .collect()
    }

    pub fn seat_ids(&self) -> Vec<String> {
        self.rows
            .iter()
            .flat_map(|&row| (1..=self.columns).filter_map(move |p| self.seat_at(row, p)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Mode;
    use serde_json::json;

    #[test]
    fn parses_seat_ids() {
        assert_eq!(parse_seat_id("A1").unwrap(), ("A".to_string(), 1));
        assert_eq!(parse_seat_id("D12").unwrap(), ("D".to_string(), 12));
        assert!(parse_seat_id("12").is_err());
        assert!(parse_seat_id("A").is_err());
        assert!(parse_seat_id("A0").is_err());
        assert!(parse_seat_id("A1x").is_err());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            SeatStatus::Available,
            SeatStatus::Reserved,
            SeatStatus::ToBeCheckedIn,
            SeatStatus::CheckedIn,
            SeatStatus::Unavailable,
        ] {
            assert_eq!(status.as_str().parse::<SeatStatus>().unwrap(), status);
        }
        assert!("sold".parse::<SeatStatus>().is_err());
    }

    #[test]
    fn reads_remote_seat_with_admin_columns() {
        let seat = Seat::from_remote(
            "B3",
            &json!({"id": "B3", "status": "to-be-checked-in", "name": "Sato", "columnC": "paid"}),
        )
        .unwrap();
        assert_eq!(seat.id(), "B3");
        assert_eq!(seat.status, SeatStatus::ToBeCheckedIn);
        assert_eq!(seat.name.as_deref(), Some("Sato"));
        assert_eq!(seat.extensions.get("columnC"), Some(&json!("paid")));
    }

    #[test]
    fn malformed_seats_are_skipped() {
        let map = json!({
            "A1": {"id": "A1", "status": "available"},
            "??": {"status": "available"},
            "A2": {"id": "A2", "status": "sold"}
        });
        let seats = Seat::from_seat_map(map.as_object().unwrap());
        assert_eq!(seats.len(), 1);
        assert_eq!(seats[0].id(), "A1");
    }

    #[test]
    fn seat_map_is_required_in_payload() {
        let ok = json!({"success": true, "seatMap": {"A1": {"id": "A1", "status": "available"}}});
        assert_eq!(Seat::from_payload(ok.as_object().unwrap()).unwrap().len(), 1);

        let empty = json!({"success": true, "seatMap": {}});
        assert!(Seat::from_payload(empty.as_object().unwrap()).unwrap().is_empty());

        let missing = json!({"success": true});
        let failure = Seat::from_payload(missing.as_object().unwrap()).unwrap_err();
        assert_eq!(failure.kind, crate::error::ErrorKind::Transport);
        assert!(Seat::from_payload(json!({"success": true, "seatMap": []}).as_object().unwrap()).is_err());
    }

    #[test]
    fn redaction_follows_operator_mode() {
        let mut full = Seat::new("B", 2, SeatStatus::Reserved).with_name("Sato");
        full.extensions.insert("columnC".into(), json!("paid"));

        let mut normal = full.clone();
        normal.redact_for(Session::default());
        assert_eq!(normal.name, None);
        assert!(normal.extensions.is_empty());
        assert_eq!(normal.status, SeatStatus::Reserved);

        let mut admin = full.clone();
        admin.redact_for(Session::new(Mode::Admin));
        assert_eq!(admin.name.as_deref(), Some("Sato"));
        assert!(admin.extensions.is_empty());

        let mut superadmin = full.clone();
        superadmin.redact_for(Session::new(Mode::SuperAdmin));
        assert_eq!(superadmin, full);
    }

    #[test]
    fn row_e_is_shifted_to_the_centre() {
        let layout = SeatLayout::default();
        let cells = layout.cells();
        let row_e = &cells[4];
        // 12 позиций + проход
        assert_eq!(row_e.len(), 13);
        assert_eq!(row_e[0], LayoutCell::Gap);
        assert_eq!(row_e[3], LayoutCell::Seat("E1".into()));
        assert_eq!(row_e[6], LayoutCell::Passage);
        assert_eq!(row_e[9], LayoutCell::Seat("E6".into()));
        assert_eq!(row_e[10], LayoutCell::Gap);
        assert_eq!(row_e[12], LayoutCell::Gap);

        let ids = layout.seat_ids();
        assert_eq!(ids.len(), 4 * 12 + 6);
        assert!(ids.contains(&"E6".to_string()));
        assert!(!ids.contains(&"E7".to_string()));
    }
}
