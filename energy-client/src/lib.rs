pub mod aggregate;
pub mod db;
pub mod domain;

pub use aggregate::{Aggregator, HourlyEnergy, Summary};
pub use db::{ReadingStore, StorageError};
pub use domain::{Reading, TimeRange};
