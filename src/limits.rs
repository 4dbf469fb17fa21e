use crate::model::Ms;

/// Widest availability query, in calendar days (inclusive range).
pub const MAX_QUERY_DAYS: i64 = 366;

/// Longest slot a rule may define.
pub const MAX_SLOT_DURATION_MINUTES: i64 = 24 * 60;

pub const MAX_RULES: usize = 1_000;
pub const MAX_BLOCK_OUTS: usize = 100_000;
pub const MAX_APPOINTMENTS: usize = 1_000_000;
pub const MAX_CUSTOMERS: usize = 1_000_000;

pub const MAX_NOTES_LEN: usize = 4_096;
pub const MAX_REASON_LEN: usize = 1_024;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_CUSTOMER_ID_LEN: usize = 128;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// A single block-out may cover at most ten years.
pub const MAX_BLOCK_OUT_SPAN_MS: Ms = 10 * 366 * 86_400_000;
