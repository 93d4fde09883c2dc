pub mod api;
pub mod collector;
pub mod config;
pub mod device;
pub mod error;
pub mod export;
pub mod metrics_server;
pub mod observability;

pub use collector::{Collector, TickOutcome};
pub use error::AppError;
