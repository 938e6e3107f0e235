use ulid::Ulid;

use crate::model::RoomId;

/// Coarse classes callers branch on. HTTP status mapping keys off these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PreconditionFailed,
    InvalidToken,
    Expired,
    AuthorizationFailed,
    ValidationFailed,
    Internal,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::Expired => "expired",
            ErrorKind::AuthorizationFailed => "authorization_failed",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("slot not found: {0}")]
    SlotNotFound(Ulid),
    #[error("booking not found: {0}")]
    BookingNotFound(Ulid),
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),
    #[error("slot {slot_id} does not belong to room {room_id}")]
    SlotRoomMismatch { slot_id: Ulid, room_id: RoomId },
    #[error("slot {0} is not available")]
    SlotNotAvailable(Ulid),
    #[error("slot {0} has no pending request")]
    SlotNotPending(Ulid),
    #[error("booking {0} is no longer awaiting a decision")]
    BookingNotRequested(Ulid),
    #[error("slot overlaps existing slot {0}")]
    SlotOverlap(Ulid),
    #[error("invalid student info: {0}")]
    InvalidStudentInfo(&'static str),
    #[error("invalid slot time: {0}")]
    InvalidSlotTime(&'static str),
    #[error("caller has no contact email")]
    MissingContactEmail,
    #[error("invalid action token")]
    InvalidToken,
    #[error("booking {0} passed its decision deadline")]
    Expired(Ulid),
    #[error("caller does not own the room")]
    NotOwner,
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::SlotNotFound(_)
            | EngineError::BookingNotFound(_)
            | EngineError::RoomNotFound(_)
            | EngineError::SlotRoomMismatch { .. } => ErrorKind::NotFound,
            EngineError::SlotNotAvailable(_)
            | EngineError::SlotNotPending(_)
            | EngineError::BookingNotRequested(_)
            | EngineError::SlotOverlap(_)
            | EngineError::MissingContactEmail
            | EngineError::LimitExceeded(_) => ErrorKind::PreconditionFailed,
            EngineError::InvalidToken => ErrorKind::InvalidToken,
            EngineError::Expired(_) => ErrorKind::Expired,
            EngineError::NotOwner => ErrorKind::AuthorizationFailed,
            EngineError::InvalidStudentInfo(_) | EngineError::InvalidSlotTime(_) => {
                ErrorKind::ValidationFailed
            }
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::SlotNotFound(_) => "slot_not_found",
            EngineError::BookingNotFound(_) => "booking_not_found",
            EngineError::RoomNotFound(_) => "room_not_found",
            EngineError::SlotRoomMismatch { .. } => "slot_room_mismatch",
            EngineError::SlotNotAvailable(_) => "slot_not_available",
            EngineError::SlotNotPending(_) => "slot_not_pending",
            EngineError::BookingNotRequested(_) => "booking_not_requested",
            EngineError::SlotOverlap(_) => "slot_overlap",
            EngineError::InvalidStudentInfo(_) => "missing_student_fields",
            EngineError::InvalidSlotTime(_) => "invalid_slot_time",
            EngineError::MissingContactEmail => "missing_student_email",
            EngineError::InvalidToken => "invalid_token",
            EngineError::Expired(_) => "expired",
            EngineError::NotOwner => "not_owner",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "internal",
        }
    }
}
