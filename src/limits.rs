//! Hard input limits. Exceeding any of these is `EngineError::LimitExceeded`,
//! never a panic or an unbounded allocation.

pub const MAX_VEHICLES: usize = 100_000;
pub const MAX_BOOKINGS_PER_VEHICLE: usize = 10_000;
pub const MAX_NOTIFICATIONS_PER_USER: usize = 10_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4_096;
pub const MAX_FORM_FIELD_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 1_024;

/// Longest single rental, in days.
pub const MAX_RANGE_DAYS: i64 = 366;

/// Widest availability query window, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 730;

/// Accepted calendar window for rental dates (by year).
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2100;
