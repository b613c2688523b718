use axum::{
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::cache::{CachedResponse, WorkerError, WorkerMessage};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/sw/message", post(post_message))
}

fn worker_error(e: WorkerError) -> (StatusCode, Json<Value>) {
    tracing::warn!("Worker request failed: {}", e);
    let status = match &e {
        WorkerError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
        WorkerError::Fetch { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "success": false, "error": e.to_string() })))
}

// POST /sw/message
async fn post_message(
    State(state): State<Arc<AppState>>,
    Json(message): Json<WorkerMessage>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let reply = state.worker.handle_message(message).await.map_err(worker_error)?;
    Ok(Json(reply))
}

fn into_response(cached: CachedResponse) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::BAD_GATEWAY);
    match cached.content_type {
        Some(content_type) => (status, [(header::CONTENT_TYPE, content_type)], cached.body).into_response(),
        None => (status, cached.body).into_response(),
    }
}

/// Всё, что не попало в маршруты, отдаётся через кеш ресурсов.
pub async fn serve_resource(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let document = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"));
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    match state.worker.fetch(target, document).await {
        Ok(cached) => into_response(cached),
        Err(e) => worker_error(e).into_response(),
    }
}
