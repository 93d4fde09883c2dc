use energy_client::{domain::timestamp, TimeRange};
use serde::Deserialize;
use time::{
    format_description::BorrowedFormatItem, macros::format_description, Date, Duration, OffsetDateTime,
    PrimitiveDateTime,
};

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// What an HTML `datetime-local` input submits.
const MINUTE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]");

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("invalid {field} '{value}': expected RFC 3339, YYYY-MM-DDTHH:MM[:SS] or YYYY-MM-DD")]
    Instant { field: &'static str, value: String },
    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    Date(String),
}

#[derive(Debug, Clone, Copy)]
enum Bound {
    Start,
    End,
}

/// `?start=..&end=..` or `?date=..`; neither means today (UTC).
///
/// `start` and `end` only count as a pair. A lone bound is ignored and the
/// range comes from `date` instead.
#[derive(Debug, Default, Deserialize)]
pub struct RangeParams {
    pub start: Option<String>,
    pub end: Option<String>,
    pub date: Option<String>,
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Parse a range bound. Coarser values widen to cover their whole minute or
/// day: a start snaps to the first second, an end to the last.
fn parse_bound(bound: Bound, value: &str) -> Result<OffsetDateTime, ValidationError> {
    if let Ok(ts) = timestamp::parse(value) {
        return Ok(ts);
    }

    if let Ok(minute) = PrimitiveDateTime::parse(value, MINUTE_FORMAT) {
        let ts = match bound {
            Bound::Start => minute,
            Bound::End => minute + Duration::seconds(59),
        };
        return Ok(ts.assume_utc());
    }

    if let Ok(date) = Date::parse(value, DATE_FORMAT) {
        let day = TimeRange::day(date);
        return Ok(match bound {
            Bound::Start => day.start,
            Bound::End => day.end,
        });
    }

    Err(ValidationError::Instant {
        field: match bound {
            Bound::Start => "start",
            Bound::End => "end",
        },
        value: value.to_string(),
    })
}

impl RangeParams {
    pub fn resolve(&self) -> Result<TimeRange, ValidationError> {
        if let (Some(start), Some(end)) = (non_empty(&self.start), non_empty(&self.end)) {
            return Ok(TimeRange::new(
                parse_bound(Bound::Start, start)?,
                parse_bound(Bound::End, end)?,
            ));
        }

        match non_empty(&self.date) {
            Some(date) => Date::parse(date, DATE_FORMAT)
                .map(TimeRange::day)
                .map_err(|_| ValidationError::Date(date.to_string())),
            None => Ok(TimeRange::today()),
        }
    }
}
