use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::ApiError;
use crate::model::UserId;

/// Header the upstream auth proxy sets after verifying the session.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated user making the request.
#[derive(Debug, Clone)]
pub struct Caller(pub UserId);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| Caller(id.to_string()))
            .ok_or(ApiError::Unauthenticated)
    }
}
