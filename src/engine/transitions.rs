use std::time::Instant;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::mail;
use crate::model::*;
use crate::observability::{record_transition, SLOTS_ACTIVE};
use crate::token::{self, Action};

use super::store::DocGuard;
use super::{Engine, EngineError};

/// Student-supplied request form. Fields are trimmed before validation.
#[derive(Debug, Clone, Default)]
pub struct StudentInfo {
    pub name: String,
    pub phone: String,
    pub subject: String,
    pub note: Option<String>,
}

impl StudentInfo {
    fn validated(self) -> Result<Self, EngineError> {
        let name = required(&self.name, MAX_NAME_LEN, "name is required", "name is too long")?;
        let phone = required(&self.phone, MAX_PHONE_LEN, "phone is required", "phone is too long")?;
        let subject = required(
            &self.subject,
            MAX_SUBJECT_LEN,
            "subject is required",
            "subject is too long",
        )?;
        let note = match self.note.as_deref().map(str::trim) {
            Some(n) if n.len() > MAX_NOTE_LEN => {
                return Err(EngineError::InvalidStudentInfo("note is too long"));
            }
            Some(n) if !n.is_empty() => Some(n.to_string()),
            _ => None,
        };
        Ok(Self {
            name,
            phone,
            subject,
            note,
        })
    }
}

fn required(
    value: &str,
    max: usize,
    missing: &'static str,
    too_long: &'static str,
) -> Result<String, EngineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::InvalidStudentInfo(missing));
    }
    if value.len() > max {
        return Err(EngineError::InvalidStudentInfo(too_long));
    }
    Ok(value.to_string())
}

/// What the requester gets back. The raw tokens never appear here; they only
/// travel in the owner's notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestReceipt {
    pub booking_id: Ulid,
    pub expires_at: Ms,
}

/// Result of a link click with a valid token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// This call moved the booking into the given status.
    Applied(BookingStatus),
    /// The booking was already terminal; nothing changed.
    AlreadyResolved(BookingStatus),
}

impl Decision {
    pub fn status(&self) -> BookingStatus {
        match self {
            Decision::Applied(s) | Decision::AlreadyResolved(s) => *s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    Expired,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotCancellation {
    Deleted,
    Reset,
}

impl SlotCancellation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotCancellation::Deleted => "deleted",
            SlotCancellation::Reset => "reset",
        }
    }
}

fn reopened(slot: &TeachingSlot) -> TeachingSlot {
    let mut next = slot.clone();
    next.state = SlotState::Available;
    next
}

impl Engine {
    // ── Student request ──────────────────────────────────

    pub async fn request(
        &self,
        actor: &str,
        room_id: &str,
        slot_id: Ulid,
        info: StudentInfo,
    ) -> Result<RequestReceipt, EngineError> {
        let started = Instant::now();
        let result = self.request_inner(actor, room_id, slot_id, info).await;
        record_transition("request", &result, started);
        result
    }

    async fn request_inner(
        &self,
        actor: &str,
        room_id: &str,
        slot_id: Ulid,
        info: StudentInfo,
    ) -> Result<RequestReceipt, EngineError> {
        let info = info.validated()?;
        let email = self
            .directory()
            .user_email(actor)
            .await
            .ok_or(EngineError::MissingContactEmail)?;
        let room = self
            .directory()
            .room(room_id)
            .await
            .ok_or_else(|| EngineError::RoomNotFound(room_id.to_string()))?;
        let owner_email = self.directory().owner_email(&room).await;

        let _gate = self.enter().await;
        let mut slot_guard = self
            .slots
            .lock(&slot_id)
            .await
            .ok_or(EngineError::SlotNotFound(slot_id))?;
        let slot = slot_guard.get();
        if slot.room_id != room_id {
            return Err(EngineError::SlotRoomMismatch {
                slot_id,
                room_id: room_id.to_string(),
            });
        }
        if !slot.is_available() {
            return Err(EngineError::SlotNotAvailable(slot_id));
        }

        let now = self.now();
        let approve_token = token::generate();
        let reject_token = token::generate();
        let booking = Booking {
            id: Ulid::new(),
            room_id: room_id.to_string(),
            slot_id,
            tutor_id: room.owner_id.clone(),
            student_id: actor.to_string(),
            contact: StudentContact {
                name: info.name,
                phone: info.phone,
                email,
            },
            subject: info.subject,
            note: info.note,
            status: BookingStatus::Requested,
            created_at: now,
            expires_at: now + self.booking_ttl_ms(),
            tokens: Some(ActionTokens {
                approve: token::hash(&approve_token),
                reject: token::hash(&reject_token),
            }),
            retired_tokens: None,
            cancelled_at: None,
            cancelled_by: None,
        };
        let mut next_slot = slot.clone();
        next_slot.state = SlotState::Pending {
            booking_id: booking.id,
            expires_at: booking.expires_at,
        };

        let event = Event::BookingRequested {
            booking: booking.clone(),
            slot: next_slot.clone(),
        };
        self.wal_append(&event).await?;
        self.bookings.insert(booking.id, booking.clone());
        slot_guard.put(next_slot.clone());
        drop(slot_guard);

        match owner_email {
            Some(to) => {
                let approve_url = self.links().action_url(Action::Approve, booking.id, &approve_token);
                let reject_url = self.links().action_url(Action::Reject, booking.id, &reject_token);
                self.notify(mail::booking_requested(
                    &to,
                    &booking,
                    &next_slot,
                    &approve_url,
                    &reject_url,
                ));
            }
            None => warn!(room_id, booking_id = %booking.id, "room owner has no email, request not announced"),
        }
        info!(booking_id = %booking.id, %slot_id, room_id, "booking requested");

        Ok(RequestReceipt {
            booking_id: booking.id,
            expires_at: booking.expires_at,
        })
    }

    // ── Link decisions ───────────────────────────────────

    pub async fn approve(&self, booking_id: Ulid, token: &str) -> Result<Decision, EngineError> {
        let started = Instant::now();
        let result = self.decide(Action::Approve, booking_id, token).await;
        record_transition("approve", &result, started);
        result
    }

    pub async fn reject(&self, booking_id: Ulid, token: &str) -> Result<Decision, EngineError> {
        let started = Instant::now();
        let result = self.decide(Action::Reject, booking_id, token).await;
        record_transition("reject", &result, started);
        result
    }

    async fn decide(
        &self,
        action: Action,
        booking_id: Ulid,
        supplied: &str,
    ) -> Result<Decision, EngineError> {
        if supplied.is_empty() || supplied.len() > MAX_TOKEN_LEN {
            return Err(EngineError::InvalidToken);
        }
        let supplied = token::hash(supplied);

        let _gate = self.enter().await;
        let slot_id = self
            .bookings
            .snapshot(&booking_id)
            .await
            .ok_or(EngineError::BookingNotFound(booking_id))?
            .slot_id;
        // Slot before booking, always. The slot may be gone.
        let mut slot_guard = self.slots.lock(&slot_id).await;
        let mut booking_guard = self
            .bookings
            .lock(&booking_id)
            .await
            .ok_or(EngineError::BookingNotFound(booking_id))?;

        let booking = booking_guard.get();
        if !booking.accepts(action, &supplied) {
            return Err(EngineError::InvalidToken);
        }
        if booking.status != BookingStatus::Requested {
            debug!(%booking_id, status = booking.status.as_str(), "repeated {} click", action.as_str());
            return Ok(Decision::AlreadyResolved(booking.status));
        }
        if booking.is_past_deadline(self.now()) {
            self.commit_expiry(&mut booking_guard, slot_guard.as_mut()).await?;
            return Err(EngineError::Expired(booking_id));
        }

        match action {
            Action::Approve => match slot_guard.as_mut() {
                Some(slot) if slot.get().is_pending_for(booking_id) => {
                    self.commit_approval(&mut booking_guard, slot).await?;
                    Ok(Decision::Applied(BookingStatus::Approved))
                }
                other => {
                    // The slot moved on without this booking; it can never be honoured.
                    self.commit_expiry(&mut booking_guard, other).await?;
                    Err(EngineError::SlotNotAvailable(slot_id))
                }
            },
            Action::Reject => {
                self.commit_rejection(&mut booking_guard, slot_guard.as_mut()).await?;
                Ok(Decision::Applied(BookingStatus::Rejected))
            }
        }
    }

    async fn commit_approval(
        &self,
        booking: &mut DocGuard<Booking>,
        slot: &mut DocGuard<TeachingSlot>,
    ) -> Result<(), EngineError> {
        let mut next = booking.get().clone();
        next.close(BookingStatus::Approved);
        let mut next_slot = slot.get().clone();
        next_slot.state = SlotState::Booked { booking_id: next.id };

        let event = Event::BookingApproved {
            booking: next.clone(),
            slot: next_slot.clone(),
        };
        self.wal_append(&event).await?;
        booking.put(next.clone());
        slot.put(next_slot.clone());

        self.notify(mail::booking_approved(&next, &next_slot));
        info!(booking_id = %next.id, slot_id = %next_slot.id, "booking approved");
        Ok(())
    }

    async fn commit_rejection(
        &self,
        booking: &mut DocGuard<Booking>,
        slot: Option<&mut DocGuard<TeachingSlot>>,
    ) -> Result<(), EngineError> {
        let mut next = booking.get().clone();
        next.close(BookingStatus::Rejected);
        let next_slot = slot
            .as_ref()
            .filter(|s| s.get().is_pending_for(next.id))
            .map(|s| reopened(s.get()));

        let event = Event::BookingRejected {
            booking: next.clone(),
            slot: next_slot.clone(),
        };
        self.wal_append(&event).await?;
        booking.put(next.clone());
        if let (Some(guard), Some(s)) = (slot, next_slot) {
            guard.put(s);
        }

        self.notify(mail::booking_rejected(&next));
        info!(booking_id = %next.id, "booking rejected");
        Ok(())
    }

    /// Expire a Requested booking and reopen its slot if the slot still holds it.
    async fn commit_expiry(
        &self,
        booking: &mut DocGuard<Booking>,
        slot: Option<&mut DocGuard<TeachingSlot>>,
    ) -> Result<(), EngineError> {
        let mut next = booking.get().clone();
        next.close(BookingStatus::Expired);
        let next_slot = slot
            .as_ref()
            .filter(|s| s.get().is_pending_for(next.id))
            .map(|s| reopened(s.get()));

        let event = Event::BookingExpired {
            booking: next.clone(),
            slot: next_slot.clone(),
        };
        self.wal_append(&event).await?;
        let booking_id = next.id;
        let slot_reopened = next_slot.is_some();
        booking.put(next);
        if let (Some(guard), Some(s)) = (slot, next_slot) {
            guard.put(s);
        }
        info!(%booking_id, slot_reopened, "booking expired");
        Ok(())
    }

    // ── Sweeper ──────────────────────────────────────────

    /// Expire one booking if it is Requested and past its deadline. Anything
    /// else is a no-op.
    pub async fn expire(&self, booking_id: Ulid) -> Result<ExpireOutcome, EngineError> {
        let started = Instant::now();
        let result = self.expire_inner(booking_id).await;
        record_transition("expire", &result, started);
        result
    }

    async fn expire_inner(&self, booking_id: Ulid) -> Result<ExpireOutcome, EngineError> {
        let _gate = self.enter().await;
        let snapshot = self
            .bookings
            .snapshot(&booking_id)
            .await
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        if snapshot.status != BookingStatus::Requested {
            return Ok(ExpireOutcome::Skipped);
        }

        let mut slot_guard = self.slots.lock(&snapshot.slot_id).await;
        let mut booking_guard = self
            .bookings
            .lock(&booking_id)
            .await
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let booking = booking_guard.get();
        if booking.status != BookingStatus::Requested || !booking.is_past_deadline(self.now()) {
            return Ok(ExpireOutcome::Skipped);
        }
        self.commit_expiry(&mut booking_guard, slot_guard.as_mut()).await?;
        Ok(ExpireOutcome::Expired)
    }

    // ── Owner actions ────────────────────────────────────

    async fn owned_room(&self, actor: &str, room_id: &str) -> Result<(), EngineError> {
        let room = self
            .directory()
            .room(room_id)
            .await
            .ok_or_else(|| EngineError::RoomNotFound(room_id.to_string()))?;
        if room.owner_id != actor {
            return Err(EngineError::NotOwner);
        }
        Ok(())
    }

    async fn lock_room_slot(
        &self,
        room_id: &str,
        slot_id: Ulid,
    ) -> Result<DocGuard<TeachingSlot>, EngineError> {
        let guard = self
            .slots
            .lock(&slot_id)
            .await
            .ok_or(EngineError::SlotNotFound(slot_id))?;
        if guard.get().room_id != room_id {
            return Err(EngineError::SlotRoomMismatch {
                slot_id,
                room_id: room_id.to_string(),
            });
        }
        Ok(guard)
    }

    /// Delete an idle slot, or force its active booking out and reopen it.
    pub async fn owner_cancel_slot(
        &self,
        actor: &str,
        room_id: &str,
        slot_id: Ulid,
    ) -> Result<SlotCancellation, EngineError> {
        let started = Instant::now();
        let result = self.owner_cancel_inner(actor, room_id, slot_id).await;
        record_transition("owner_cancel", &result, started);
        result
    }

    async fn owner_cancel_inner(
        &self,
        actor: &str,
        room_id: &str,
        slot_id: Ulid,
    ) -> Result<SlotCancellation, EngineError> {
        self.owned_room(actor, room_id).await?;

        let _gate = self.enter().await;
        let mut slot_guard = self.lock_room_slot(room_id, slot_id).await?;

        let Some(booking_id) = slot_guard.get().active_booking_id() else {
            self.wal_append(&Event::SlotDeleted { id: slot_id }).await?;
            slot_guard.delete();
            self.slots.remove(&slot_id);
            metrics::gauge!(SLOTS_ACTIVE).set(self.slots.len() as f64);
            info!(%slot_id, room_id, "slot deleted by owner");
            return Ok(SlotCancellation::Deleted);
        };

        let mut booking_guard = self.bookings.lock(&booking_id).await;
        // The student hears about every reset, even of a booking that already lapsed.
        let recipient = booking_guard.as_ref().map(|g| g.get().clone());
        let cancelled = booking_guard
            .as_ref()
            .map(|g| g.get())
            .filter(|b| b.status != BookingStatus::Expired)
            .map(|b| {
                let mut next = b.clone();
                next.close(BookingStatus::Expired);
                next.cancelled_at = Some(self.now());
                next.cancelled_by = Some(actor.to_string());
                next
            });
        let previous_slot = slot_guard.get().clone();
        let next_slot = reopened(&previous_slot);

        let event = Event::SlotReset {
            slot: next_slot.clone(),
            booking: cancelled.clone(),
        };
        self.wal_append(&event).await?;
        slot_guard.put(next_slot);
        if let (Some(guard), Some(next)) = (booking_guard.as_mut(), cancelled.as_ref()) {
            guard.put(next.clone());
        }
        drop(booking_guard);
        drop(slot_guard);

        if let Some(booking) = cancelled.as_ref().or(recipient.as_ref()) {
            self.notify(mail::slot_cancelled(booking, &previous_slot));
        }
        info!(%slot_id, %booking_id, room_id, "slot reset by owner");
        Ok(SlotCancellation::Reset)
    }

    /// Owner approval from inside the app, no token involved.
    pub async fn owner_approve(
        &self,
        actor: &str,
        room_id: &str,
        slot_id: Ulid,
    ) -> Result<Ulid, EngineError> {
        let started = Instant::now();
        let result = self.owner_approve_inner(actor, room_id, slot_id).await;
        record_transition("owner_approve", &result, started);
        result
    }

    async fn owner_approve_inner(
        &self,
        actor: &str,
        room_id: &str,
        slot_id: Ulid,
    ) -> Result<Ulid, EngineError> {
        self.owned_room(actor, room_id).await?;

        let _gate = self.enter().await;
        let mut slot_guard = self.lock_room_slot(room_id, slot_id).await?;
        let booking_id = slot_guard
            .get()
            .pending_booking_id()
            .ok_or(EngineError::SlotNotPending(slot_id))?;
        let mut booking_guard = self
            .bookings
            .lock(&booking_id)
            .await
            .ok_or(EngineError::BookingNotFound(booking_id))?;

        let booking = booking_guard.get();
        if booking.status != BookingStatus::Requested {
            return Err(EngineError::BookingNotRequested(booking_id));
        }
        if booking.is_past_deadline(self.now()) {
            self.commit_expiry(&mut booking_guard, Some(&mut slot_guard)).await?;
            return Err(EngineError::Expired(booking_id));
        }
        self.commit_approval(&mut booking_guard, &mut slot_guard).await?;
        Ok(booking_id)
    }

    pub async fn create_slot(
        &self,
        actor: &str,
        room_id: &str,
        day_of_week: DayOfWeek,
        start_minute: u16,
        end_minute: u16,
    ) -> Result<TeachingSlot, EngineError> {
        let started = Instant::now();
        let result = self
            .create_slot_inner(actor, room_id, day_of_week, start_minute, end_minute)
            .await;
        record_transition("create_slot", &result, started);
        result
    }

    async fn create_slot_inner(
        &self,
        actor: &str,
        room_id: &str,
        day_of_week: DayOfWeek,
        start_minute: u16,
        end_minute: u16,
    ) -> Result<TeachingSlot, EngineError> {
        if end_minute >= MINUTES_PER_DAY {
            return Err(EngineError::InvalidSlotTime("end must be at most 23:59"));
        }
        if start_minute >= end_minute {
            return Err(EngineError::InvalidSlotTime("start must be before end"));
        }
        self.owned_room(actor, room_id).await?;

        let room_lock = self.room_lock(room_id);
        let _room = room_lock.lock().await;
        let _gate = self.enter().await;

        let existing = self.slots.in_room(room_id).await;
        if existing.len() >= MAX_SLOTS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many slots in room"));
        }
        if let Some(clash) = existing
            .iter()
            .find(|s| s.overlaps(day_of_week, start_minute, end_minute))
        {
            return Err(EngineError::SlotOverlap(clash.id));
        }

        let slot = TeachingSlot::new(
            Ulid::new(),
            actor.to_string(),
            room_id.to_string(),
            day_of_week,
            start_minute,
            end_minute,
        );
        self.wal_append(&Event::SlotCreated { slot: slot.clone() }).await?;
        self.slots.insert(slot.id, slot.clone());
        metrics::gauge!(SLOTS_ACTIVE).set(self.slots.len() as f64);
        info!(slot_id = %slot.id, room_id, "slot created: {}", slot.time_text());
        Ok(slot)
    }
}
