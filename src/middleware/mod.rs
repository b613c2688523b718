use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use std::sync::Arc;

use crate::models::{Mode, Session};

/// Заголовок с режимом оператора: normal, admin, walkin, superadmin.
pub const OPERATOR_MODE_HEADER: &str = "x-operator-mode";

// Сессия из заголовка; без заголовка - обычный режим
impl FromRequestParts<Arc<crate::AppState>> for Session {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(OPERATOR_MODE_HEADER) else {
            return Ok(Session::default());
        };
        let raw = value
            .to_str()
            .map_err(|_| (StatusCode::BAD_REQUEST, "operator mode header is not ASCII".to_string()))?;
        let mode: Mode = raw
            .parse()
            .map_err(|e: crate::error::Failure| (StatusCode::BAD_REQUEST, e.message))?;
        Ok(Session::new(mode))
    }
}
