use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn slot(&self, id: Ulid) -> Result<TeachingSlot, EngineError> {
        self.slots
            .snapshot(&id)
            .await
            .ok_or(EngineError::SlotNotFound(id))
    }

    pub async fn booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.bookings
            .snapshot(&id)
            .await
            .ok_or(EngineError::BookingNotFound(id))
    }

    /// A booking as seen by one of its two parties. Anyone else gets
    /// `BookingNotFound`, the same as for an unknown id.
    pub async fn booking_for(&self, actor: &str, id: Ulid) -> Result<Booking, EngineError> {
        let booking = self.booking(id).await?;
        if booking.student_id != actor && booking.tutor_id != actor {
            return Err(EngineError::BookingNotFound(id));
        }
        Ok(booking)
    }

    /// Slots of a room ordered by weekday, then start minute.
    pub async fn list_room_slots(&self, room_id: &str) -> Result<Vec<TeachingSlot>, EngineError> {
        if self.directory().room(room_id).await.is_none() {
            return Err(EngineError::RoomNotFound(room_id.to_string()));
        }
        let mut slots = self.slots.in_room(room_id).await;
        slots.sort_by_key(|s| (s.day_of_week, s.start_minute, s.id));
        Ok(slots)
    }

    /// Bookings the sweeper should expire: Requested with `expires_at <= now`,
    /// oldest deadline first, at most `limit`.
    pub fn collect_expired_bookings(&self, now: Ms, limit: usize) -> Vec<Ulid> {
        self.bookings
            .due_for_expiry(now, limit)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }
}
