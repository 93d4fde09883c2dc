pub mod range;
pub mod reading;
pub mod timestamp;

pub use range::TimeRange;
pub use reading::{energy_kwh, Reading, SAMPLES_PER_HOUR};
