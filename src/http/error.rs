use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::engine::{EngineError, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("missing or invalid x-user-id header")]
    Unauthenticated,
    #[error("missing or invalid bearer secret")]
    BadSecret,
    #[error("invalid request: {0}")]
    BadRequest(&'static str),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => match e.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::PreconditionFailed => StatusCode::CONFLICT,
                ErrorKind::InvalidToken => StatusCode::FORBIDDEN,
                ErrorKind::Expired => StatusCode::GONE,
                ErrorKind::AuthorizationFailed => StatusCode::FORBIDDEN,
                ErrorKind::ValidationFailed => StatusCode::BAD_REQUEST,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthenticated | ApiError::BadSecret => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Engine(e) => e.code(),
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::BadSecret => "unauthorized",
            ApiError::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        } else {
            tracing::debug!(code, error = %self, "request rejected");
        }
        // Internal detail stays in the log.
        let message = if status.is_server_error() {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "ok": false, "error": code, "message": message }))).into_response()
    }
}
