use serde::Deserialize;
use std::{fs, net::SocketAddr, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Tuya data-centre region: `eu`, `us`, `cn` or `in`.
    pub region: String,
    pub api_key: String,
    pub api_secret: String,
    pub device_id: String,
    #[serde(default = "default_device_timeout_ms")]
    pub timeout_ms: u64,
    /// Overrides the region's OpenAPI endpoint.
    pub base_url: Option<String>,
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_export_path")]
    pub export_path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            export_path: default_export_path(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl CollectorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    /// Currency per kWh.
    #[serde(default = "default_cost_rate")]
    pub cost_rate: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            cost_rate: default_cost_rate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind_addr")]
    pub bind_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_http_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub device: DeviceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub metrics: Option<MetricsConfig>,
}

fn default_device_timeout_ms() -> u64 {
    5_000
}

fn default_database_path() -> PathBuf {
    PathBuf::from("energy.db")
}

fn default_export_path() -> PathBuf {
    PathBuf::from("energy.csv")
}

fn default_max_connections() -> u32 {
    4
}

fn default_interval_secs() -> u64 {
    60
}

fn default_cost_rate() -> f64 {
    8.5
}

fn default_http_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("ENERGY_MONITOR_CONFIG").unwrap_or_else(|_| "energy-monitor.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config file '{path}': {e}"))?;
        let mut cfg = Self::from_toml(&contents)?;

        if let Ok(port) = env::var("PORT") {
            cfg.http.bind_addr = cfg.http.with_port(&port)?;
        }

        Ok(cfg)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }
}

impl HttpConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        self.bind_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid http.bind_addr '{}': {e}", self.bind_addr))
    }

    /// `bind_addr` with its port replaced by `port`.
    fn with_port(&self, port: &str) -> anyhow::Result<String> {
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid PORT '{port}': {e}"))?;
        let mut addr = self.socket_addr()?;
        addr.set_port(port);
        Ok(addr.to_string())
    }
}
