pub const MAX_ACTIVITIES: usize = 100_000;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 4_000;
pub const MAX_LOCATION_LEN: usize = 200;
pub const MAX_CAPACITY: u32 = 10_000;
pub const MAX_BOOKINGS_PER_USER: usize = 10_000;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_TREND_WEEKS: usize = 52;

/// Longest accepted request line on the wire, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
