pub mod notices;
pub mod seats;
pub mod worker;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::error::{ErrorKind, Failure};

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new().merge(seats::routes()).merge(notices::routes())
}

/// Терминальная ошибка операции в виде HTTP-ответа.
#[derive(Debug)]
pub struct ApiError(pub Failure);

impl From<Failure> for ApiError {
    fn from(failure: Failure) -> Self {
        ApiError(failure)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Permission => StatusCode::FORBIDDEN,
        ErrorKind::Application => StatusCode::CONFLICT,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Transport => StatusCode::BAD_GATEWAY,
        ErrorKind::Storage => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "kind": self.0.kind,
            "error": self.0.message,
        });
        (status_for(self.0.kind), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_failure_kinds_to_statuses() {
        let response = ApiError(Failure::permission("walk-in mode required")).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::Transport), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::Storage), StatusCode::SERVICE_UNAVAILABLE);
    }
}
