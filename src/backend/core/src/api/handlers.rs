//! API request handlers with proper error propagation.
//!
//! All handlers return `Result<impl IntoResponse, LicenseError>` so that errors
//! are automatically converted to appropriate HTTP status codes via the
//! `IntoResponse` implementation on `LicenseError`.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};

use super::AppState;
use crate::error::{ErrorCode, LicenseError};
use crate::store::LicenseUpdate;

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": &*state.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Authorization Handlers
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn get_authorization(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, LicenseError> {
    let status = state.service.get_authorization(&user_id).await?;
    Ok(Json(status))
}

pub async fn update_authorization(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Result<Json<LicenseUpdate>, JsonRejection>,
) -> Result<impl IntoResponse, LicenseError> {
    let Json(update) = body.map_err(reject_body)?;
    let status = state.service.update_authorization(&user_id, update).await?;
    Ok(Json(status))
}

fn reject_body(rejection: JsonRejection) -> LicenseError {
    let code = match rejection {
        JsonRejection::MissingJsonContentType(_) => ErrorCode::UnsupportedMediaType,
        _ => ErrorCode::InvalidInput,
    };
    LicenseError::new(code, rejection.body_text())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Metrics
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        crate::observability::metrics::render(),
    )
}
