use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use ulid::Ulid;

use super::bookings::SlotRef;
use super::{ApiError, AppState, Caller};
use crate::clock::to_rfc3339;
use crate::model::*;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub id: Ulid,
    pub room_id: RoomId,
    pub owner_id: UserId,
    pub day_of_week: DayOfWeek,
    pub start_minute: u16,
    pub end_minute: u16,
    pub time_text: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_booking_id: Option<Ulid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booked_booking_id: Option<Ulid>,
}

impl From<TeachingSlot> for SlotView {
    fn from(s: TeachingSlot) -> Self {
        Self {
            time_text: s.time_text(),
            status: s.status().as_str(),
            pending_booking_id: s.pending_booking_id(),
            pending_expires_at: s.pending_expires_at().map(to_rfc3339),
            booked_booking_id: s.booked_booking_id(),
            id: s.id,
            room_id: s.room_id,
            owner_id: s.owner_id,
            day_of_week: s.day_of_week,
            start_minute: s.start_minute,
            end_minute: s.end_minute,
        }
    }
}

pub async fn list(
    State(state): State<AppState>,
    _caller: Caller,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Vec<SlotView>>, ApiError> {
    let slots = state.engine.list_room_slots(&room_id).await?;
    Ok(Json(slots.into_iter().map(SlotView::from).collect()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSlotBody {
    pub day_of_week: DayOfWeek,
    pub start_minute: u16,
    pub end_minute: u16,
}

#[instrument(skip_all, fields(caller = %caller.0))]
pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    Path(room_id): Path<RoomId>,
    Json(body): Json<CreateSlotBody>,
) -> Result<impl IntoResponse, ApiError> {
    let slot = state
        .engine
        .create_slot(
            &caller.0,
            &room_id,
            body.day_of_week,
            body.start_minute,
            body.end_minute,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(SlotView::from(slot))))
}

#[instrument(skip_all, fields(caller = %caller.0))]
pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<SlotRef>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state
        .engine
        .owner_cancel_slot(&caller.0, &body.room_id, body.slot_id)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true, "action": outcome.as_str() })))
}
