use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    db::{ReadingStore, StorageError},
    domain::{Reading, TimeRange},
};

pub const HOURS_PER_DAY: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HourlyEnergy {
    pub hour: u8,
    pub kwh: f64,
}

/// Energy and cost totals over a time range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub kwh: f64,
    pub cost: f64,
    /// Always 24 entries, hour 0 through 23.
    pub trend: Vec<HourlyEnergy>,
    /// Number of readings the summary was computed from.
    #[serde(skip)]
    pub readings: usize,
}

/// Round to `digits` decimal places, ties to even.
///
/// Values that are not exactly representable round by their binary value, so
/// `2.675` becomes `2.67`.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round_ties_even() / scale
}

/// Hour-of-day bucket for a stored timestamp.
///
/// Readings are stored in UTC, so this is the hour digit of the stored key.
fn hour_bucket(ts: OffsetDateTime) -> usize {
    usize::from(ts.hour())
}

/// Totals and the 24-slot hourly trend from one set of readings.
///
/// Cost is computed from the unrounded total and then rounded to cents.
pub fn summarize(readings: &[Reading], cost_rate: f64) -> Summary {
    let mut buckets = [0.0_f64; HOURS_PER_DAY];
    let mut total = 0.0_f64;

    for r in readings {
        total += r.kwh;
        buckets[hour_bucket(r.ts)] += r.kwh;
    }

    let trend = buckets
        .iter()
        .enumerate()
        .map(|(hour, kwh)| HourlyEnergy {
            hour: hour as u8,
            kwh: round_to(*kwh, 3),
        })
        .collect();

    Summary {
        kwh: round_to(total, 3),
        cost: round_to(total * cost_rate, 2),
        trend,
        readings: readings.len(),
    }
}

/// Read-side queries over a [`ReadingStore`].
#[derive(Clone)]
pub struct Aggregator {
    store: ReadingStore,
    cost_rate: f64,
}

impl Aggregator {
    pub fn new(store: ReadingStore, cost_rate: f64) -> Self {
        Self { store, cost_rate }
    }

    /// Summary over `range`; totals and trend share a single fetch.
    pub async fn summary(&self, range: TimeRange) -> Result<Summary, StorageError> {
        let rows = self.store.query(range).await?;
        let summary = summarize(&rows, self.cost_rate);

        tracing::info!(
            start = %range.start,
            end = %range.end,
            rows = summary.readings,
            kwh = summary.kwh,
            "summary computed"
        );

        Ok(summary)
    }

    /// Ordered readings in `range`.
    pub async fn history(&self, range: TimeRange) -> Result<Vec<Reading>, StorageError> {
        self.store.query(range).await
    }
}
