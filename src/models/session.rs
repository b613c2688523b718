use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Failure;

/// Режим оператора. Как он был получен (пароль и т.п.) клиенту не важно.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Normal,
    Admin,
    Walkin,
    SuperAdmin,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Admin => "admin",
            Mode::Walkin => "walkin",
            Mode::SuperAdmin => "superadmin",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Failure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "" => Ok(Mode::Normal),
            "admin" => Ok(Mode::Admin),
            "walkin" => Ok(Mode::Walkin),
            "superadmin" => Ok(Mode::SuperAdmin),
            other => Err(Failure::validation(format!("unknown operator mode '{}'", other))),
        }
    }
}

/// Сессия оператора, передаётся в каждую операцию, где важен уровень доступа.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub mode: Mode,
}

impl Session {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.mode, Mode::Admin | Mode::SuperAdmin)
    }

    pub fn is_super_admin(&self) -> bool {
        self.mode == Mode::SuperAdmin
    }

    pub fn can_check_in(&self) -> Result<(), Failure> {
        self.require(self.is_admin(), "check-in requires admin mode")
    }

    pub fn can_edit_seats(&self) -> Result<(), Failure> {
        self.require(self.is_super_admin(), "seat editing requires superadmin mode")
    }

    pub fn can_issue_walk_in(&self) -> Result<(), Failure> {
        self.require(
            matches!(self.mode, Mode::Walkin | Mode::Admin | Mode::SuperAdmin),
            "walk-in issuing requires walkin or admin mode",
        )
    }

    fn require(&self, allowed: bool, message: &str) -> Result<(), Failure> {
        if allowed {
            Ok(())
        } else {
            Err(Failure::permission(format!("{} (current mode: {})", message, self.mode)))
        }
    }
}
