pub mod tuya;

use serde::Serialize;

pub use tuya::TuyaCloudClient;

/// Live telemetry from the metering plug.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub switch: bool,
    /// Watts.
    pub power: f64,
    /// Amps.
    pub current: f64,
    /// Volts.
    pub voltage: f64,
}

#[derive(thiserror::Error, Debug)]
pub enum DeviceError {
    #[error("device request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("device request timed out")]
    Timeout,
    #[error("device API error {code}: {msg}")]
    Api { code: i64, msg: String },
    #[error("device response malformed: {0}")]
    Malformed(String),
    #[error("request signing failed: {0}")]
    Signing(String),
}

/// Remote metering device.
///
/// Every call either succeeds or fails; implementations apply their own
/// bounded timeout and report it as [`DeviceError::Timeout`].
#[async_trait::async_trait]
pub trait DeviceClient: Send + Sync {
    async fn get_status(&self) -> Result<DeviceStatus, DeviceError>;

    async fn turn_on(&self) -> Result<(), DeviceError>;

    async fn turn_off(&self) -> Result<(), DeviceError>;
}
