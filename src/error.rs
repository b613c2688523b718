//! Таксономия ошибок клиента.
//!
//! Все терминальные ошибки доходят до UI как значения [`Failure`], а не как
//! паника или проброшенное исключение. Ошибки конкретных слоёв
//! ([`StoreError`] и т.д.) сводятся к `Failure` через `From`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Класс ошибки. Определяет, повторяем ли мы операцию и куда её эскалируем.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Сетевая ошибка: соединение, не-2xx ответ, нечитаемое тело.
    Transport,
    /// Нет ответа за отведённое время.
    Timeout,
    /// Бэкенд ответил `success: false` (например, место уже занято).
    Application,
    /// Локальное хранилище недоступно или переполнено.
    Storage,
    /// Некорректный ввод, обнаруженный до вызова.
    Validation,
    /// Текущий режим сессии не разрешает операцию.
    Permission,
}

impl ErrorKind {
    /// Транспорт и таймаут повторяются локально (failover, backoff).
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transport | ErrorKind::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Application => "application",
            ErrorKind::Storage => "storage",
            ErrorKind::Validation => "validation",
            ErrorKind::Permission => "permission",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Терминальный результат неудачной операции.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind} failure: {message}")]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Application, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Ошибки локального хранилища.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("local store unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("local store migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt local record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt local record: {0}")]
    Corrupt(String),

    #[error("local store rejected the operation: {0}")]
    Unavailable(String),
}

impl From<StoreError> for Failure {
    fn from(e: StoreError) -> Self {
        Failure::new(ErrorKind::Storage, e.to_string())
    }
}

impl From<validator::ValidationErrors> for Failure {
    fn from(e: validator::ValidationErrors) -> Self {
        Failure::validation(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
