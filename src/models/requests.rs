//! Входные данные мутирующих действий. Валидируются до выбора пути
//! (локальный или прямой) и сериализуются как payload ожидающего изменения.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::seat::parse_seat_id;

/// Максимум мест, выдаваемых одним запросом на кассе.
pub const MAX_WALKIN_SEATS: u32 = 6;

fn validate_seat_ids(ids: &[String]) -> Result<(), ValidationError> {
    for id in ids {
        validate_seat_id(id)?;
    }
    let mut sorted: Vec<&String> = ids.iter().collect();
    sorted.sort();
    sorted.dedup();
    if sorted.len() != ids.len() {
        return Err(ValidationError::new("duplicate_seat_id"));
    }
    Ok(())
}

fn validate_seat_id(id: &str) -> Result<(), ValidationError> {
    parse_seat_id(id)
        .map(|_| ())
        .map_err(|_| ValidationError::new("malformed_seat_id"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ReserveRequest {
    #[validate(length(min = 1, message = "select at least one seat"), custom(function = "validate_seat_ids"))]
    pub seat_ids: Vec<String>,
    #[validate(length(max = 100))]
    pub holder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CheckInRequest {
    #[validate(length(min = 1, message = "select at least one seat"), custom(function = "validate_seat_ids"))]
    pub seat_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct WalkInRequest {
    #[validate(range(min = 1, max = MAX_WALKIN_SEATS, message = "walk-in count must be between 1 and 6"))]
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdminEditRequest {
    #[validate(custom(function = "validate_seat_id"))]
    pub seat_id: String,
    pub column_c: Option<String>,
    pub column_d: Option<String>,
    pub column_e: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_requires_well_formed_distinct_seats() {
        let ok = ReserveRequest { seat_ids: vec!["A1".into(), "A2".into()], holder: None };
        assert!(ok.validate().is_ok());

        let empty = ReserveRequest { seat_ids: vec![], holder: None };
        assert!(empty.validate().is_err());

        let bad = ReserveRequest { seat_ids: vec!["1A".into()], holder: None };
        assert!(bad.validate().is_err());

        let dup = ReserveRequest { seat_ids: vec!["A1".into(), "A1".into()], holder: None };
        assert!(dup.validate().is_err());
    }

    #[test]
    fn walkin_count_is_bounded() {
        assert!(WalkInRequest { count: 0 }.validate().is_err());
        assert!(WalkInRequest { count: 1 }.validate().is_ok());
        assert!(WalkInRequest { count: MAX_WALKIN_SEATS }.validate().is_ok());
        assert!(WalkInRequest { count: MAX_WALKIN_SEATS + 1 }.validate().is_err());
    }

    #[test]
    fn admin_edit_checks_seat_id() {
        let edit = AdminEditRequest {
            seat_id: "E7x".into(),
            column_c: Some("note".into()),
            column_d: None,
            column_e: None,
        };
        assert!(edit.validate().is_err());
    }
}
