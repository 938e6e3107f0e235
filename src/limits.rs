use crate::model::Ms;

/// How long a requested booking holds its slot.
pub const DEFAULT_BOOKING_TTL_MS: Ms = 24 * 60 * 60 * 1000;

pub const MAX_NAME_LEN: usize = 120;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_SUBJECT_LEN: usize = 200;
pub const MAX_NOTE_LEN: usize = 2_000;

/// Longer inputs cannot be one of our tokens; reject before hashing.
pub const MAX_TOKEN_LEN: usize = 256;

pub const MAX_SLOTS_PER_ROOM: usize = 500;

pub const DEFAULT_SWEEP_BATCH: usize = 50;
pub const MAX_SWEEP_BATCH: usize = 500;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

pub const OUTBOX_CAPACITY: usize = 1_024;

pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1_000;
