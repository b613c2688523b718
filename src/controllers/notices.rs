use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::{stream, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::warn;

use crate::services::notifier::Notice;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/notices", get(notices))
}

/// Уведомления подписчика. Отставший подписчик теряет старые, но не отключается.
pub fn notice_stream(rx: Receiver<Notice>) -> impl Stream<Item = Notice> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(notice) => return Some((notice, rx)),
                Err(RecvError::Lagged(skipped)) => warn!("Notice subscriber skipped {} notices", skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

// GET /api/notices
async fn notices(State(state): State<Arc<AppState>>) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let events = notice_stream(state.notifier.subscribe())
        .map(|notice| Event::default().event("notice").json_data(notice));
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Failure;
    use crate::services::notifier::{NoticeLevel, Notifier};
    use axum::{http::header, response::IntoResponse};

    #[tokio::test]
    async fn stream_yields_published_notices_in_order() {
        let notifier = Notifier::new(2);
        let mut stream = Box::pin(notice_stream(notifier.subscribe()));

        notifier.info("Offline", "Working from local data.");
        notifier.report("reserve_seats", &Failure::application("A1 already reserved"));

        let first = stream.next().await.unwrap();
        assert_eq!(first.level, NoticeLevel::Info);
        assert_eq!(first.title, "Offline");
        let second = stream.next().await.unwrap();
        assert_eq!(second.message, "A1 already reserved");
        assert!(second.action.is_some());

        drop(notifier);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn lagging_subscriber_keeps_receiving() {
        let notifier = Notifier::new(1);
        let mut stream = Box::pin(notice_stream(notifier.subscribe()));

        notifier.info("first", "dropped");
        notifier.info("second", "kept");
        assert_eq!(stream.next().await.unwrap().title, "second");
    }

    #[tokio::test]
    async fn route_answers_with_event_stream() {
        let config = Config::for_endpoints(vec!["http://127.0.0.1:1/exec".into()]);
        let state = AppState::new(config).await.unwrap();

        let response = notices(State(state)).await.into_response();
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, "text/event-stream");
    }
}
