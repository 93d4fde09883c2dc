//! Text codec for reading timestamps.
//!
//! Keys are fixed-width `YYYY-MM-DDTHH:MM:SSZ`, always UTC, so lexical order
//! in the store is chronological order and bytes 11..13 are the hour digits.

use time::{
    format_description::{well_known::Rfc3339, BorrowedFormatItem},
    macros::format_description,
    Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset,
};

const KEY_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

const NAIVE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

/// Convert to UTC and drop sub-second precision.
pub fn normalize(ts: OffsetDateTime) -> OffsetDateTime {
    let utc = ts.to_offset(UtcOffset::UTC);
    utc - Duration::nanoseconds(i64::from(utc.nanosecond()))
}

/// Render a timestamp as a storage key.
pub fn format(ts: OffsetDateTime) -> String {
    let ts = normalize(ts);
    // The key format only contains components every OffsetDateTime has.
    ts.format(KEY_FORMAT)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

/// Parse a storage key, or any RFC 3339 instant, or a naive
/// `YYYY-MM-DDTHH:MM:SS` (taken as UTC).
pub fn parse(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    let s = s.trim();
    match OffsetDateTime::parse(s, &Rfc3339) {
        Ok(ts) => Ok(normalize(ts)),
        Err(_) => PrimitiveDateTime::parse(s, NAIVE_FORMAT).map(|p| normalize(p.assume_utc())),
    }
}
