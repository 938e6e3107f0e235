use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use ulid::Ulid;

use super::{ApiError, AppState, Caller};
use crate::clock::to_rfc3339;
use crate::engine::{ErrorKind, StudentInfo};
use crate::mail::html_page;
use crate::model::*;
use crate::token::Action;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    pub room_id: RoomId,
    pub slot_id: Ulid,
    #[serde(default)]
    pub student_name: String,
    #[serde(default)]
    pub student_phone: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub ok: bool,
    pub booking_id: Ulid,
    pub expires_at: String,
}

#[instrument(skip_all, fields(caller = %caller.0))]
pub async fn request(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<RequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let info = StudentInfo {
        name: body.student_name,
        phone: body.student_phone,
        subject: body.subject,
        note: body.note,
    };
    let receipt = state
        .engine
        .request(&caller.0, &body.room_id, body.slot_id, info)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RequestResponse {
            ok: true,
            booking_id: receipt.booking_id,
            expires_at: to_rfc3339(receipt.expires_at),
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkParams {
    pub booking_id: Option<String>,
    pub token: Option<String>,
}

const INVALID_LINK_TITLE: &str = "Link invalid or expired";
const INVALID_LINK_BODY: &str =
    "This link is no longer valid. The request may have expired or already been handled.";

pub async fn approve_link(
    State(state): State<AppState>,
    Query(params): Query<LinkParams>,
) -> (StatusCode, Html<String>) {
    link(&state, Action::Approve, params).await
}

pub async fn reject_link(
    State(state): State<AppState>,
    Query(params): Query<LinkParams>,
) -> (StatusCode, Html<String>) {
    link(&state, Action::Reject, params).await
}

/// Shared approve/reject page. The first click and every repeat render the
/// same success page; every other outcome renders the same generic page so
/// the reason never leaks.
async fn link(state: &AppState, action: Action, params: LinkParams) -> (StatusCode, Html<String>) {
    let (Some(booking_id), Some(token)) = (params.booking_id, params.token) else {
        return (
            StatusCode::BAD_REQUEST,
            Html(html_page("Missing parameters", "The link is incomplete.")),
        );
    };
    let Ok(booking_id) = booking_id.parse::<Ulid>() else {
        return invalid_link();
    };

    let (target, title, body) = match action {
        Action::Approve => (
            BookingStatus::Approved,
            "Booking approved",
            "The student has been notified that the session is confirmed.",
        ),
        Action::Reject => (
            BookingStatus::Rejected,
            "Booking rejected",
            "The student has been notified and the slot is open again.",
        ),
    };

    let result = match action {
        Action::Approve => state.engine.approve(booking_id, &token).await,
        Action::Reject => state.engine.reject(booking_id, &token).await,
    };
    match result {
        Ok(decision) if decision.status() == target => (StatusCode::OK, Html(html_page(title, body))),
        Ok(_) => invalid_link(),
        Err(e) if e.kind() == ErrorKind::Internal => {
            tracing::error!(%booking_id, "{} link failed: {e}", action.as_str());
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(html_page("Something went wrong", "Please try the link again later.")),
            )
        }
        Err(e) => {
            tracing::debug!(%booking_id, "{} link refused: {e}", action.as_str());
            invalid_link()
        }
    }
}

fn invalid_link() -> (StatusCode, Html<String>) {
    (
        StatusCode::FORBIDDEN,
        Html(html_page(INVALID_LINK_TITLE, INVALID_LINK_BODY)),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRef {
    pub room_id: RoomId,
    pub slot_id: Ulid,
}

#[instrument(skip_all, fields(caller = %caller.0))]
pub async fn approve_owner(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<SlotRef>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let booking_id = state
        .engine
        .owner_approve(&caller.0, &body.room_id, body.slot_id)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true, "bookingId": booking_id })))
}

/// Booking as shown to the student or tutor. Token hashes stay server-side.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: Ulid,
    pub room_id: RoomId,
    pub slot_id: Ulid,
    pub tutor_id: UserId,
    pub student_id: UserId,
    pub student_name: String,
    pub student_phone: String,
    pub student_email: String,
    pub subject: String,
    pub note: Option<String>,
    pub status: &'static str,
    pub created_at: String,
    pub expires_at: String,
    pub cancelled_at: Option<String>,
    pub cancelled_by: Option<UserId>,
}

impl From<Booking> for BookingView {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            room_id: b.room_id,
            slot_id: b.slot_id,
            tutor_id: b.tutor_id,
            student_id: b.student_id,
            student_name: b.contact.name,
            student_phone: b.contact.phone,
            student_email: b.contact.email,
            subject: b.subject,
            note: b.note,
            status: b.status.as_str(),
            created_at: to_rfc3339(b.created_at),
            expires_at: to_rfc3339(b.expires_at),
            cancelled_at: b.cancelled_at.map(to_rfc3339),
            cancelled_by: b.cancelled_by,
        }
    }
}

pub async fn get_booking(
    State(state): State<AppState>,
    caller: Caller,
    Path(booking_id): Path<String>,
) -> Result<Json<BookingView>, ApiError> {
    let booking_id = booking_id
        .parse::<Ulid>()
        .map_err(|_| ApiError::BadRequest("booking id is not a valid ULID"))?;
    let booking = state.engine.booking_for(&caller.0, booking_id).await?;
    Ok(Json(booking.into()))
}

