//! Уведомления оператору. Терминальные ошибки превращаются в короткое
//! сообщение с подсказкой и рассылаются подписчикам через broadcast-канал.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::{ErrorKind, Failure};
use crate::models::now_millis;

/// Счётчик ошибок операции обнуляется после минуты тишины.
pub const ERROR_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
    pub action: Option<String>,
    pub at: i64,
}

fn describe(kind: ErrorKind) -> (&'static str, &'static str, NoticeLevel) {
    match kind {
        ErrorKind::Transport => (
            "Network error",
            "Check the connection and try again.",
            NoticeLevel::Warning,
        ),
        ErrorKind::Timeout => (
            "Server is not responding",
            "Wait a moment and try again.",
            NoticeLevel::Warning,
        ),
        ErrorKind::Application => (
            "Request rejected",
            "Reload the seat map and check the selection.",
            NoticeLevel::Error,
        ),
        ErrorKind::Storage => (
            "Local storage unavailable",
            "Offline mode is limited, operations go straight to the server.",
            NoticeLevel::Warning,
        ),
        ErrorKind::Validation => ("Invalid input", "Check the entered values.", NoticeLevel::Error),
        ErrorKind::Permission => (
            "Not permitted",
            "Switch to a mode that allows this operation.",
            NoticeLevel::Error,
        ),
    }
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
    counts: Arc<Mutex<HashMap<(String, ErrorKind), (u32, Instant)>>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notice: Notice) {
        // Нет подписчиков - не ошибка
        let _ = self.tx.send(notice);
    }

    pub fn info(&self, title: impl Into<String>, message: impl Into<String>) {
        let title = title.into();
        let message = message.into();
        info!("{}: {}", title, message);
        self.publish(Notice {
            level: NoticeLevel::Info,
            title,
            message,
            action: None,
            at: now_millis(),
        });
    }

    /// Фиксирует терминальную ошибку операции и оповещает оператора.
    /// Возвращает число таких ошибок за текущее окно.
    pub fn report(&self, operation: &str, failure: &Failure) -> u32 {
        let count = self.bump(operation, failure.kind);
        let (title, action, level) = describe(failure.kind);

        match level {
            NoticeLevel::Error => error!("{} failed ({}): {}", operation, failure.kind, failure.message),
            _ => warn!("{} failed ({}): {}", operation, failure.kind, failure.message),
        }

        self.publish(Notice {
            level,
            title: title.to_string(),
            message: failure.message.clone(),
            action: Some(action.to_string()),
            at: now_millis(),
        });
        count
    }

    pub fn error_count(&self, operation: &str, kind: ErrorKind) -> u32 {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        match counts.get(&(operation.to_string(), kind)) {
            Some((count, last)) if last.elapsed() < ERROR_WINDOW => *count,
            _ => 0,
        }
    }

    fn bump(&self, operation: &str, kind: ErrorKind) -> u32 {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let entry = counts
            .entry((operation.to_string(), kind))
            .or_insert((0, Instant::now()));
        if entry.1.elapsed() >= ERROR_WINDOW {
            entry.0 = 0;
        }
        entry.0 += 1;
        entry.1 = Instant::now();
        entry.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn report_broadcasts_friendly_notice() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();

        notifier.report("reserve_seats", &Failure::timeout("no answer in 15s"));
        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.level, NoticeLevel::Warning);
        assert_eq!(notice.title, "Server is not responding");
        assert_eq!(notice.message, "no answer in 15s");
        assert!(notice.action.is_some());
    }

    #[test]
    fn counts_are_per_operation_and_kind() {
        let notifier = Notifier::default();
        assert_eq!(notifier.report("sync", &Failure::transport("down")), 1);
        assert_eq!(notifier.report("sync", &Failure::transport("down")), 2);
        assert_eq!(notifier.report("sync", &Failure::timeout("slow")), 1);
        assert_eq!(notifier.report("walk_in", &Failure::transport("down")), 1);
        assert_eq!(notifier.error_count("sync", ErrorKind::Transport), 2);
        assert_eq!(notifier.error_count("sync", ErrorKind::Storage), 0);
    }
}
