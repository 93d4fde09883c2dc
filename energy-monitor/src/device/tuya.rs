use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use reqwest::{header::CONTENT_TYPE, Method};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::{DeviceClient, DeviceError, DeviceStatus};
use crate::config::DeviceConfig;

type HmacSha256 = Hmac<Sha256>;

/// Refresh the access token this long before Tuya says it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Tuya error code for an expired or revoked access token.
const TOKEN_INVALID: i64 = 1010;

const SWITCH_CODE: &str = "switch_1";

pub fn region_endpoint(region: &str) -> Option<&'static str> {
    match region.trim().to_ascii_lowercase().as_str() {
        "eu" => Some("https://openapi.tuyaeu.com"),
        "us" => Some("https://openapi.tuyaus.com"),
        "cn" => Some("https://openapi.tuyacn.com"),
        "in" => Some("https://openapi.tuyain.com"),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    success: bool,
    code: Option<i64>,
    msg: Option<String>,
    result: Option<T>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<Option<T>, DeviceError> {
        if self.success {
            Ok(self.result)
        } else {
            Err(DeviceError::Api {
                code: self.code.unwrap_or(-1),
                msg: self.msg.unwrap_or_default(),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResult {
    access_token: String,
    expire_time: u64,
}

#[derive(Debug, Deserialize)]
struct DataPoint {
    code: String,
    #[serde(default)]
    value: Value,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Data points arrive as numbers or numeric strings; anything else reads as zero.
fn dp_number(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Map the plug's data points to engineering units.
///
/// `cur_power` is in 0.1 W, `cur_current` in mA, `cur_voltage` in 0.1 V.
/// Missing points stay at zero/false.
fn decode_status(points: &[DataPoint]) -> DeviceStatus {
    let mut status = DeviceStatus::default();
    for dp in points {
        match dp.code.as_str() {
            SWITCH_CODE => status.switch = dp.value.as_bool().unwrap_or(false),
            "cur_power" => status.power = dp_number(&dp.value) / 10.0,
            "cur_current" => status.current = dp_number(&dp.value) / 1000.0,
            "cur_voltage" => status.voltage = dp_number(&dp.value) / 10.0,
            _ => {}
        }
    }
    status
}

/// `METHOD \n sha256(body) \n <signed headers> \n path?query`
fn string_to_sign(method: &Method, body: &[u8], path: &str) -> String {
    let content_hash = hex::encode(Sha256::digest(body));
    format!("{}\n{}\n\n{}", method.as_str(), content_hash, path)
}

fn sign(
    secret: &str,
    client_id: &str,
    access_token: Option<&str>,
    t: &str,
    string_to_sign: &str,
) -> Result<String, DeviceError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| DeviceError::Signing(e.to_string()))?;
    mac.update(client_id.as_bytes());
    if let Some(token) = access_token {
        mac.update(token.as_bytes());
    }
    mac.update(t.as_bytes());
    mac.update(string_to_sign.as_bytes());
    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}

fn map_transport(e: reqwest::Error) -> DeviceError {
    if e.is_timeout() {
        DeviceError::Timeout
    } else if e.is_decode() {
        DeviceError::Malformed(e.to_string())
    } else {
        DeviceError::Transport(e)
    }
}

/// [`DeviceClient`] backed by the Tuya Cloud OpenAPI.
pub struct TuyaCloudClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    secret: String,
    device_id: String,
    token: Mutex<Option<AccessToken>>,
}

impl TuyaCloudClient {
    pub fn new(cfg: &DeviceConfig) -> anyhow::Result<Self> {
        let base_url = match &cfg.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => region_endpoint(&cfg.region)
                .ok_or_else(|| anyhow::anyhow!("unknown device.region '{}'", cfg.region))?
                .to_string(),
        };

        let http = reqwest::Client::builder().timeout(cfg.timeout()).build()?;

        Ok(Self {
            http,
            base_url,
            client_id: cfg.api_key.clone(),
            secret: cfg.api_secret.clone(),
            device_id: cfg.device_id.clone(),
            token: Mutex::new(None),
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        access_token: Option<&str>,
    ) -> Result<Option<T>, DeviceError> {
        let body = match body {
            Some(v) => serde_json::to_vec(v).map_err(|e| DeviceError::Malformed(e.to_string()))?,
            None => Vec::new(),
        };
        let t = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).to_string();
        let signature = sign(
            &self.secret,
            &self.client_id,
            access_token,
            &t,
            &string_to_sign(&method, &body, path),
        )?;

        let mut req = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("client_id", &self.client_id)
            .header("sign", signature)
            .header("t", &t)
            .header("sign_method", "HMAC-SHA256");
        if let Some(token) = access_token {
            req = req.header("access_token", token);
        }
        if !body.is_empty() {
            req = req.header(CONTENT_TYPE, "application/json").body(body);
        }

        let resp = req.send().await.map_err(map_transport)?;
        let envelope: ApiResponse<T> = resp.json().await.map_err(map_transport)?;
        envelope.into_result()
    }

    async fn access_token(&self) -> Result<String, DeviceError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let result: TokenResult = self
            .send(Method::GET, "/v1.0/token?grant_type=1", None, None)
            .await?
            .ok_or_else(|| DeviceError::Malformed("token response without result".to_string()))?;

        let lifetime = Duration::from_secs(result.expire_time).saturating_sub(TOKEN_REFRESH_MARGIN);
        tracing::debug!(expires_in_secs = lifetime.as_secs(), "tuya access token refreshed");

        *guard = Some(AccessToken {
            value: result.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(result.access_token)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<T>, DeviceError> {
        let token = self.access_token().await?;
        let res = self.send(method, path, body, Some(&token)).await;

        if let Err(DeviceError::Api { code, .. }) = &res {
            if *code == TOKEN_INVALID {
                self.token.lock().await.take();
            }
        }

        res
    }

    async fn set_switch(&self, on: bool) -> Result<(), DeviceError> {
        let path = format!("/v1.0/devices/{}/commands", self.device_id);
        let body = json!({ "commands": [{ "code": SWITCH_CODE, "value": on }] });

        self.call::<Value>(Method::POST, &path, Some(&body)).await?;
        tracing::info!(device_id = %self.device_id, on, "switch command accepted");
        Ok(())
    }
}

#[async_trait::async_trait]
impl DeviceClient for TuyaCloudClient {
    async fn get_status(&self) -> Result<DeviceStatus, DeviceError> {
        let path = format!("/v1.0/devices/{}/status", self.device_id);
        let points: Vec<DataPoint> = self.call(Method::GET, &path, None).await?.unwrap_or_default();

        tracing::debug!(device_id = %self.device_id, data_points = ?points, "device status received");
        Ok(decode_status(&points))
    }

    async fn turn_on(&self) -> Result<(), DeviceError> {
        self.set_switch(true).await
    }

    async fn turn_off(&self) -> Result<(), DeviceError> {
        self.set_switch(false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use axum::{
        extract::State,
        http::HeaderMap,
        routing::{get, post},
        Json, Router,
    };

    fn points(v: Value) -> Vec<DataPoint> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn decode_status_scales_data_points() {
        let status = decode_status(&points(json!([
            { "code": "switch_1", "value": true },
            { "code": "countdown_1", "value": 0 },
            { "code": "cur_current", "value": 2609 },
            { "code": "cur_power", "value": 6000 },
            { "code": "cur_voltage", "value": "2301" },
        ])));

        assert_eq!(
            status,
            DeviceStatus {
                switch: true,
                power: 600.0,
                current: 2.609,
                voltage: 230.1,
            }
        );
    }

    #[test]
    fn decode_status_defaults_missing_and_malformed_points() {
        let status = decode_status(&points(json!([
            { "code": "switch_1", "value": "yes" },
            { "code": "cur_power", "value": null },
            { "code": "cur_voltage" },
        ])));

        assert_eq!(status, DeviceStatus::default());
        assert_eq!(decode_status(&[]), DeviceStatus::default());
    }

    #[test]
    fn string_to_sign_hashes_the_body() {
        let s = string_to_sign(&Method::GET, b"", "/v1.0/token?grant_type=1");
        assert_eq!(
            s,
            "GET\ne3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855\n\n/v1.0/token?grant_type=1"
        );
    }

    #[test]
    fn signature_is_uppercase_hex_and_covers_the_token() {
        let sts = string_to_sign(&Method::GET, b"", "/v1.0/devices/d/status");
        let a = sign("secret", "client", None, "1700000000000", &sts).unwrap();
        let b = sign("secret", "client", None, "1700000000000", &sts).unwrap();
        let with_token = sign("secret", "client", Some("tok"), "1700000000000", &sts).unwrap();

        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_eq!(a, b);
        assert_ne!(a, with_token);
    }

    #[test]
    fn api_failure_becomes_device_error() {
        let resp: ApiResponse<Value> =
            serde_json::from_value(json!({ "success": false, "code": 1106, "msg": "permission deny" })).unwrap();

        match resp.into_result() {
            Err(DeviceError::Api { code, msg }) => {
                assert_eq!(code, 1106);
                assert_eq!(msg, "permission deny");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn known_regions_resolve() {
        assert_eq!(region_endpoint("EU"), Some("https://openapi.tuyaeu.com"));
        assert!(region_endpoint("mars").is_none());
    }

    #[derive(Clone, Default)]
    struct FakeCloud {
        token_calls: Arc<AtomicUsize>,
        commands: Arc<std::sync::Mutex<Vec<Value>>>,
    }

    async fn token(State(cloud): State<FakeCloud>, headers: HeaderMap) -> Json<Value> {
        cloud.token_calls.fetch_add(1, Ordering::SeqCst);
        assert!(headers.get("access_token").is_none());
        Json(json!({ "success": true, "result": { "access_token": "tok-1", "expire_time": 7200 } }))
    }

    async fn status(headers: HeaderMap) -> Json<Value> {
        assert_eq!(headers.get("access_token").unwrap(), "tok-1");
        assert_eq!(headers.get("sign_method").unwrap(), "HMAC-SHA256");
        Json(json!({
            "success": true,
            "result": [
                { "code": "switch_1", "value": false },
                { "code": "cur_power", "value": 1200 },
                { "code": "cur_current", "value": 520 },
                { "code": "cur_voltage", "value": 2290 },
            ]
        }))
    }

    async fn commands(State(cloud): State<FakeCloud>, Json(body): Json<Value>) -> Json<Value> {
        cloud.commands.lock().unwrap().push(body);
        Json(json!({ "success": true, "result": true }))
    }

    #[tokio::test]
    async fn client_talks_to_openapi_and_caches_token() {
        let cloud = FakeCloud::default();
        let app = Router::new()
            .route("/v1.0/token", get(token))
            .route("/v1.0/devices/dev-1/status", get(status))
            .route("/v1.0/devices/dev-1/commands", post(commands))
            .with_state(cloud.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = TuyaCloudClient::new(&DeviceConfig {
            region: "eu".to_string(),
            api_key: "client".to_string(),
            api_secret: "secret".to_string(),
            device_id: "dev-1".to_string(),
            timeout_ms: 2_000,
            base_url: Some(format!("http://{addr}/")),
        })
        .unwrap();

        let s = client.get_status().await.unwrap();
        assert_eq!(s.power, 120.0);
        assert_eq!(s.current, 0.52);
        assert_eq!(s.voltage, 229.0);
        assert!(!s.switch);

        client.turn_on().await.unwrap();
        client.turn_off().await.unwrap();

        assert_eq!(cloud.token_calls.load(Ordering::SeqCst), 1);
        let sent = cloud.commands.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![
                json!({ "commands": [{ "code": "switch_1", "value": true }] }),
                json!({ "commands": [{ "code": "switch_1", "value": false }] }),
            ]
        );
    }
}
