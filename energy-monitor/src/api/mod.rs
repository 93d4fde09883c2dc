pub mod handlers;
pub mod params;
pub mod routes;

use std::sync::Arc;

use energy_client::Aggregator;

use crate::{device::DeviceClient, export::ExportMirror};

pub use params::{RangeParams, ValidationError};
pub use routes::create_router;

/// Shared handles for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub device: Arc<dyn DeviceClient>,
    pub aggregator: Aggregator,
    pub mirror: ExportMirror,
}
