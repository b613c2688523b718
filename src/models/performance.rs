use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::Failure;

/// Идентификатор спектакля: `group_day_timeslot`.
///
/// Всё локальное состояние шардируется по этому ключу, два спектакля
/// никогда не делят места или бронирования.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PerformanceId {
    pub group: String,
    pub day: String,
    pub timeslot: String,
}

impl PerformanceId {
    pub fn new(group: impl Into<String>, day: impl Into<String>, timeslot: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            day: day.into(),
            timeslot: timeslot.into(),
        }
    }

    /// Первые три параметра любого RPC бэкенда.
    pub fn rpc_params(&self) -> Vec<serde_json::Value> {
        vec![
            self.group.clone().into(),
            self.day.clone().into(),
            self.timeslot.clone().into(),
        ]
    }
}

impl fmt::Display for PerformanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.group, self.day, self.timeslot)
    }
}

impl FromStr for PerformanceId {
    type Err = Failure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Группа может содержать '_', поэтому режем справа
        let mut parts = s.rsplitn(3, '_');
        let timeslot = parts.next().unwrap_or_default();
        let day = parts.next().unwrap_or_default();
        let group = parts.next().unwrap_or_default();

        if group.is_empty() || day.is_empty() || timeslot.is_empty() {
            return Err(Failure::validation(format!(
                "performance id '{}' must look like group_day_timeslot",
                s
            )));
        }
        Ok(Self::new(group, day, timeslot))
    }
}

impl Serialize for PerformanceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PerformanceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_parses_back() {
        let pid = PerformanceId::new("G", "1", "A");
        assert_eq!(pid.to_string(), "G_1_A");
        assert_eq!("G_1_A".parse::<PerformanceId>().unwrap(), pid);
    }

    #[test]
    fn group_may_contain_underscores() {
        let pid: PerformanceId = "drama_club_2_B".parse().unwrap();
        assert_eq!(pid.group, "drama_club");
        assert_eq!(pid.day, "2");
        assert_eq!(pid.timeslot, "B");
    }

    #[test]
    fn rejects_incomplete_ids() {
        assert!("G_1".parse::<PerformanceId>().is_err());
        assert!("G__A".parse::<PerformanceId>().is_err());
        assert!("".parse::<PerformanceId>().is_err());
    }

    #[test]
    fn rpc_params_are_group_day_timeslot() {
        let pid = PerformanceId::new("5", "2", "E");
        assert_eq!(pid.rpc_params(), vec![serde_json::json!("5"), serde_json::json!("2"), serde_json::json!("E")]);
    }
}
