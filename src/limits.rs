use chrono::TimeDelta;

pub const MAX_FACILITY_LEN: usize = 64;
pub const MAX_USERNAME_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_UNIT_LEN: usize = 32;
pub const MAX_PURPOSE_LEN: usize = 1024;

/// Longest single occupancy.
pub const MAX_SPAN_DURATION: TimeDelta = TimeDelta::hours(24);

/// Upper bound on the week count of a recurring request.
pub const MAX_RECURRING_WEEKS: u32 = 52;

/// Widest window accepted by upcoming-booking queries.
pub const MAX_QUERY_WINDOW: TimeDelta = TimeDelta::days(366);
