use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use serde::Serialize;
use subtle::ConstantTimeEq;

use super::{ApiError, AppState};
use crate::sweeper::{self, SweepReport};

#[derive(Debug, Serialize)]
pub struct ExpireResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub report: SweepReport,
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// On-demand sweep for an external scheduler.
pub async fn expire(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ExpireResponse>, ApiError> {
    let secret = state.sweep_secret.as_deref().ok_or(ApiError::BadSecret)?;
    let supplied = bearer(&headers).ok_or(ApiError::BadSecret)?;
    if !bool::from(supplied.as_bytes().ct_eq(secret.as_bytes())) {
        return Err(ApiError::BadSecret);
    }
    let report = sweeper::sweep_once(state.engine.as_ref(), state.sweep_batch).await;
    Ok(Json(ExpireResponse { ok: true, report }))
}
