use crate::model::Ms;

pub const MAX_SPACES: usize = 10_000;
pub const MAX_USERS: usize = 1_000_000;
pub const MAX_BOOKINGS_PER_SPACE: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_NOTES_LEN: usize = 2_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Five 365-day years.
pub const MAX_SPAN_DURATION_MS: Ms = 5 * 365 * 86_400_000;

/// Widest window accepted by the per-space booking listing.
pub const MAX_QUERY_WINDOW_MS: Ms = 2 * 365 * 86_400_000;
