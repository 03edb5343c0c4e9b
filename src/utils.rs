//! General utilities.

use chrono::{DateTime, FixedOffset, Local, TimeZone, Timelike, Utc};

/// Get the current local time at second precision, respecting
/// `SOURCE_DATE_EPOCH`.
///
/// When the `SOURCE_DATE_EPOCH` environment variable is set, returns that
/// instant instead of the actual current time. This enables deterministic
/// test output. All code that stores or displays timestamps should use this
/// function rather than `Local::now()` directly.
pub fn get_now() -> DateTime<FixedOffset> {
    let now = source_date_epoch()
        .map(|secs| Utc.timestamp_opt(secs, 0).unwrap().with_timezone(&Local))
        .unwrap_or_else(Local::now);
    now.fixed_offset().with_nanosecond(0).expect("zero nanoseconds is valid")
}

/// Current UTC time at second precision (used for ticket id synthesis).
pub fn get_now_utc() -> DateTime<Utc> {
    let now = source_date_epoch()
        .map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
        .unwrap_or_else(Utc::now);
    now.with_nanosecond(0).expect("zero nanoseconds is valid")
}

fn source_date_epoch() -> Option<i64> {
    std::env::var("SOURCE_DATE_EPOCH").ok()?.parse().ok()
}
