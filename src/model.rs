use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::token::{Action, TokenHash};

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Identity ids come from the external auth provider and are opaque.
pub type UserId = String;

/// Rooms live in the external directory; their ids are opaque too.
pub type RoomId = String;

pub const MINUTES_PER_DAY: u16 = 1440;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Monday => "Monday",
            DayOfWeek::Tuesday => "Tuesday",
            DayOfWeek::Wednesday => "Wednesday",
            DayOfWeek::Thursday => "Thursday",
            DayOfWeek::Friday => "Friday",
            DayOfWeek::Saturday => "Saturday",
            DayOfWeek::Sunday => "Sunday",
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a minute-of-day as `HH:MM`.
pub fn format_minute(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Reservation state of a slot. The booking ids live inside the variants, so a
/// slot can never be pending and booked at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Available,
    /// Held for a requested booking until the owner decides or the deadline passes.
    Pending { booking_id: Ulid, expires_at: Ms },
    Booked { booking_id: Ulid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotStatus {
    Available,
    Pending,
    Booked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Pending => "pending",
            SlotStatus::Booked => "booked",
        }
    }
}

/// A recurring weekly window offered by a tutor. One slot is one bookable
/// occurrence; the owner resets it to reopen it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeachingSlot {
    pub id: Ulid,
    pub owner_id: UserId,
    pub room_id: RoomId,
    pub day_of_week: DayOfWeek,
    pub start_minute: u16,
    pub end_minute: u16,
    pub state: SlotState,
}

impl TeachingSlot {
    pub fn new(
        id: Ulid,
        owner_id: UserId,
        room_id: RoomId,
        day_of_week: DayOfWeek,
        start_minute: u16,
        end_minute: u16,
    ) -> Self {
        debug_assert!(start_minute < end_minute, "slot start must be before end");
        Self {
            id,
            owner_id,
            room_id,
            day_of_week,
            start_minute,
            end_minute,
            state: SlotState::Available,
        }
    }

    pub fn status(&self) -> SlotStatus {
        match self.state {
            SlotState::Available => SlotStatus::Available,
            SlotState::Pending { .. } => SlotStatus::Pending,
            SlotState::Booked { .. } => SlotStatus::Booked,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, SlotState::Available)
    }

    pub fn pending_booking_id(&self) -> Option<Ulid> {
        match self.state {
            SlotState::Pending { booking_id, .. } => Some(booking_id),
            _ => None,
        }
    }

    pub fn pending_expires_at(&self) -> Option<Ms> {
        match self.state {
            SlotState::Pending { expires_at, .. } => Some(expires_at),
            _ => None,
        }
    }

    pub fn booked_booking_id(&self) -> Option<Ulid> {
        match self.state {
            SlotState::Booked { booking_id } => Some(booking_id),
            _ => None,
        }
    }

    /// The pending or booked booking, if any.
    pub fn active_booking_id(&self) -> Option<Ulid> {
        self.pending_booking_id().or(self.booked_booking_id())
    }

    /// Guard check: is this slot still held pending for `booking_id`?
    pub fn is_pending_for(&self, booking_id: Ulid) -> bool {
        self.pending_booking_id() == Some(booking_id)
    }

    /// Same weekday and intersecting `[start, end)` minute ranges.
    pub fn overlaps(&self, day: DayOfWeek, start_minute: u16, end_minute: u16) -> bool {
        self.day_of_week == day && self.start_minute < end_minute && start_minute < self.end_minute
    }

    /// Human-readable window, e.g. `Monday 14:00-15:00`.
    pub fn time_text(&self) -> String {
        format!(
            "{} {}-{}",
            self.day_of_week,
            format_minute(self.start_minute),
            format_minute(self.end_minute)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Requested,
    Approved,
    Rejected,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Requested => "requested",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Requested)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentContact {
    pub name: String,
    pub phone: String,
    pub email: String,
}

/// Hashes of the two action tokens minted for one booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTokens {
    pub approve: TokenHash,
    pub reject: TokenHash,
}

impl ActionTokens {
    pub fn for_action(&self, action: Action) -> &TokenHash {
        match action {
            Action::Approve => &self.approve,
            Action::Reject => &self.reject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: RoomId,
    pub slot_id: Ulid,
    pub tutor_id: UserId,
    pub student_id: UserId,
    pub contact: StudentContact,
    pub subject: String,
    pub note: Option<String>,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub expires_at: Ms,
    /// Live token hashes. Present only while `status == Requested`.
    pub tokens: Option<ActionTokens>,
    /// Hashes moved out of `tokens` by the terminal transition. Only used to
    /// recognise a repeated click on a link that already did its job.
    pub retired_tokens: Option<ActionTokens>,
    pub cancelled_at: Option<Ms>,
    pub cancelled_by: Option<UserId>,
}

impl Booking {
    pub fn approve_token_hash(&self) -> Option<&TokenHash> {
        self.tokens.as_ref().map(|t| &t.approve)
    }

    pub fn reject_token_hash(&self) -> Option<&TokenHash> {
        self.tokens.as_ref().map(|t| &t.reject)
    }

    pub fn is_past_deadline(&self, now: Ms) -> bool {
        self.expires_at <= now
    }

    /// Does `supplied` match the hash minted for `action`, live or retired?
    pub fn accepts(&self, action: Action, supplied: &TokenHash) -> bool {
        self.tokens
            .as_ref()
            .or(self.retired_tokens.as_ref())
            .is_some_and(|t| t.for_action(action).matches(supplied))
    }

    /// Move into a terminal status, retiring the live token hashes.
    pub fn close(&mut self, status: BookingStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        if let Some(tokens) = self.tokens.take() {
            self.retired_tokens = Some(tokens);
        }
    }
}

/// The event types. This is the WAL record format. Every transition is a single
/// record carrying the post-image of each document it touched, so replay
/// re-applies a transaction all at once or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotCreated {
        slot: TeachingSlot,
    },
    SlotDeleted {
        id: Ulid,
    },
    BookingRequested {
        booking: Booking,
        slot: TeachingSlot,
    },
    BookingApproved {
        booking: Booking,
        slot: TeachingSlot,
    },
    BookingRejected {
        booking: Booking,
        slot: Option<TeachingSlot>,
    },
    BookingExpired {
        booking: Booking,
        slot: Option<TeachingSlot>,
    },
    /// Owner reset of a slot that held a booking.
    SlotReset {
        slot: TeachingSlot,
        booking: Option<Booking>,
    },
    /// Written by compaction for bookings no longer reachable from a slot event.
    BookingRetained {
        booking: Booking,
    },
}

impl Event {
    pub fn label(&self) -> &'static str {
        match self {
            Event::SlotCreated { .. } => "slot_created",
            Event::SlotDeleted { .. } => "slot_deleted",
            Event::BookingRequested { .. } => "booking_requested",
            Event::BookingApproved { .. } => "booking_approved",
            Event::BookingRejected { .. } => "booking_rejected",
            Event::BookingExpired { .. } => "booking_expired",
            Event::SlotReset { .. } => "slot_reset",
            Event::BookingRetained { .. } => "booking_retained",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token;

    fn slot(day: DayOfWeek, start: u16, end: u16) -> TeachingSlot {
        TeachingSlot::new(Ulid::new(), "tutor".into(), "room".into(), day, start, end)
    }

    fn requested_booking(approve: &str, reject: &str) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id: "room".into(),
            slot_id: Ulid::new(),
            tutor_id: "tutor".into(),
            student_id: "student".into(),
            contact: StudentContact {
                name: "An".into(),
                phone: "0900".into(),
                email: "an@example.com".into(),
            },
            subject: "Math".into(),
            note: None,
            status: BookingStatus::Requested,
            created_at: 0,
            expires_at: 1000,
            tokens: Some(ActionTokens {
                approve: token::hash(approve),
                reject: token::hash(reject),
            }),
            retired_tokens: None,
            cancelled_at: None,
            cancelled_by: None,
        }
    }

    #[test]
    fn slot_accessors_follow_state() {
        let mut s = slot(DayOfWeek::Monday, 840, 900);
        assert_eq!(s.status(), SlotStatus::Available);
        assert_eq!(s.active_booking_id(), None);

        let b = Ulid::new();
        s.state = SlotState::Pending { booking_id: b, expires_at: 5 };
        assert_eq!(s.status(), SlotStatus::Pending);
        assert_eq!(s.pending_booking_id(), Some(b));
        assert_eq!(s.pending_expires_at(), Some(5));
        assert_eq!(s.booked_booking_id(), None);
        assert!(s.is_pending_for(b));
        assert!(!s.is_pending_for(Ulid::new()));

        s.state = SlotState::Booked { booking_id: b };
        assert_eq!(s.status(), SlotStatus::Booked);
        assert_eq!(s.pending_booking_id(), None);
        assert_eq!(s.pending_expires_at(), None);
        assert_eq!(s.active_booking_id(), Some(b));
        assert!(!s.is_pending_for(b));
    }

    #[test]
    fn slot_time_text() {
        let s = slot(DayOfWeek::Monday, 14 * 60, 15 * 60 + 30);
        assert_eq!(s.time_text(), "Monday 14:00-15:30");
        assert_eq!(format_minute(5), "00:05");
    }

    #[test]
    fn slot_overlap_is_half_open_and_per_day() {
        let s = slot(DayOfWeek::Tuesday, 600, 660);
        assert!(s.overlaps(DayOfWeek::Tuesday, 630, 700));
        assert!(!s.overlaps(DayOfWeek::Tuesday, 660, 720)); // adjacent
        assert!(!s.overlaps(DayOfWeek::Wednesday, 600, 660));
    }

    #[test]
    fn close_retires_live_tokens() {
        let mut b = requested_booking("a", "r");
        assert!(b.approve_token_hash().is_some());
        b.close(BookingStatus::Approved);
        assert_eq!(b.status, BookingStatus::Approved);
        assert!(b.approve_token_hash().is_none());
        assert!(b.reject_token_hash().is_none());
        assert!(b.retired_tokens.is_some());
    }

    #[test]
    fn accepts_checks_the_matching_action_only() {
        let b = requested_booking("approve-me", "reject-me");
        assert!(b.accepts(Action::Approve, &token::hash("approve-me")));
        assert!(!b.accepts(Action::Approve, &token::hash("reject-me")));
        assert!(b.accepts(Action::Reject, &token::hash("reject-me")));

        let mut closed = b.clone();
        closed.close(BookingStatus::Rejected);
        assert!(closed.accepts(Action::Reject, &token::hash("reject-me")));
        assert!(!closed.accepts(Action::Reject, &token::hash("guess")));
    }

    #[test]
    fn deadline_is_inclusive() {
        let b = requested_booking("a", "r");
        assert!(!b.is_past_deadline(999));
        assert!(b.is_past_deadline(1000));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let b = requested_booking("a", "r");
        let mut s = slot(DayOfWeek::Friday, 60, 120);
        s.state = SlotState::Pending { booking_id: b.id, expires_at: b.expires_at };
        let event = Event::BookingRequested { booking: b, slot: s };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
