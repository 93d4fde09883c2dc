use time::{macros::time, Date, OffsetDateTime};

use super::timestamp;

/// Inclusive `[start, end]` window over reading timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl TimeRange {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self {
            start: timestamp::normalize(start),
            end: timestamp::normalize(end),
        }
    }

    /// `00:00:00` through `23:59:59` UTC of `date`.
    pub fn day(date: Date) -> Self {
        Self {
            start: date.with_time(time!(00:00:00)).assume_utc(),
            end: date.with_time(time!(23:59:59)).assume_utc(),
        }
    }

    /// The current UTC day.
    pub fn today() -> Self {
        Self::day(OffsetDateTime::now_utc().date())
    }

    /// Storage keys for both bounds, suitable for a `BETWEEN` comparison.
    pub fn keys(&self) -> (String, String) {
        (timestamp::format(self.start), timestamp::format(self.end))
    }
}
