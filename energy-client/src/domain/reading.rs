use time::OffsetDateTime;

use super::timestamp;

/// Collection intervals per hour.
///
/// Energy is approximated as constant power over a fixed one-minute window,
/// independent of how long ago the previous sample was actually taken.
pub const SAMPLES_PER_HOUR: f64 = 60.0;

/// One timestamped sample from the metering device.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// UTC, whole seconds. Unique key in the store.
    pub ts: OffsetDateTime,
    pub power: f64,
    pub current: f64,
    pub voltage: f64,
    pub kwh: f64,
}

impl Reading {
    /// Build a reading from raw telemetry, deriving `kwh` from `power`.
    ///
    /// The timestamp is normalised to UTC and truncated to whole seconds.
    pub fn sample(ts: OffsetDateTime, power: f64, current: f64, voltage: f64) -> Self {
        Self {
            ts: timestamp::normalize(ts),
            power,
            current,
            voltage,
            kwh: energy_kwh(power),
        }
    }

    /// The storage/export key for this reading.
    pub fn ts_key(&self) -> String {
        timestamp::format(self.ts)
    }
}

/// Watts held for one sample interval, expressed in kWh.
pub fn energy_kwh(power_watts: f64) -> f64 {
    power_watts / 1000.0 / SAMPLES_PER_HOUR
}
