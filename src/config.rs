//! Configuration snapshots and the configuration-provider seam.
//!
//! Capture settings come from the environment at daemon start. Broker
//! settings are owned by an external store (provisioned through the web
//! interface); the daemon only sees them through [`ConfigProvider`], as an
//! already-decoded [`BrokerConfig`] value. Both snapshots are immutable once
//! taken: changing either requires a capture restart or a full reconnect.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespacing prefix applied to the configured MQTT client id.
pub const CLIENT_ID_PREFIX: &str = "CallwatchRelay_";

/// Default SIP signaling port.
pub const DEFAULT_SIP_PORT: u16 = 5060;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration store: {0}")]
    Store(#[from] std::io::Error),

    #[error("configuration store is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("connection secret is not valid base64: {0}")]
    SecretEncoding(#[from] base64::DecodeError),

    #[error("connection secret is not valid UTF-8: {0}")]
    SecretUtf8(#[from] std::string::FromUtf8Error),
}

/// Capture device selection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceMode {
    /// First device whose name or description mentions "loopback".
    Loopback,
    /// First enumerated device.
    First,
    /// First device matching the configured name fragment.
    ByName,
    /// Loopback if present, else the first device.
    #[default]
    Auto,
    /// The device literally named "any" (Linux), else the first device.
    Any,
}

impl DeviceMode {
    /// Parse a mode string; anything unrecognized falls back to `Auto`.
    pub fn parse(mode: &str) -> Self {
        match mode.to_ascii_lowercase().as_str() {
            "loopback" => DeviceMode::Loopback,
            "first" => DeviceMode::First,
            "byname" | "by-name" => DeviceMode::ByName,
            "any" => DeviceMode::Any,
            _ => DeviceMode::Auto,
        }
    }
}

/// Immutable capture settings, loaded once per daemon start.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub mode: DeviceMode,
    pub device_name: Option<String>,
    pub sip_port: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: DeviceMode::Auto,
            device_name: None,
            sip_port: DEFAULT_SIP_PORT,
        }
    }
}

impl CaptureConfig {
    /// Create capture settings from environment variables.
    pub fn from_env() -> Self {
        Self {
            mode: std::env::var("CALLWATCH_DEVICE_MODE")
                .map(|m| DeviceMode::parse(&m))
                .unwrap_or_default(),
            device_name: std::env::var("CALLWATCH_DEVICE_NAME").ok(),
            sip_port: std::env::var("CALLWATCH_SIP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SIP_PORT),
        }
    }
}

/// The broker connection secret: base64-encoded UTF-8 JSON, provisioned by
/// the web interface. Field names are part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSecret {
    #[serde(rename = "Broker")]
    pub broker: String,
    #[serde(rename = "ClientId")]
    pub client_id: String,
    #[serde(rename = "LocationId")]
    pub location_id: String,
    #[serde(rename = "UserName")]
    pub username: String,
    #[serde(rename = "Password")]
    pub password: String,
}

impl ConnectionSecret {
    pub fn decode(base64_secret: &str) -> Result<Self, ConfigError> {
        let json = String::from_utf8(BASE64.decode(base64_secret.trim())?)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn encode(&self) -> Result<String, ConfigError> {
        Ok(BASE64.encode(serde_json::to_string(self)?))
    }
}

/// Immutable broker settings, assembled from the provider's stored record and
/// its decoded connection secret. A reload requires a full reconnect.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker address; a `ws`/`wss` scheme prefix selects websocket transport.
    pub broker: String,
    pub port: u16,
    configured_client_id: String,
    pub location_id: String,
    pub username: String,
    pub password: String,
    pub topic: String,
}

impl BrokerConfig {
    pub fn new(secret: ConnectionSecret, port: u16, topic: String) -> Self {
        Self {
            broker: secret.broker,
            port,
            configured_client_id: secret.client_id,
            location_id: secret.location_id,
            username: secret.username,
            password: secret.password,
            topic,
        }
    }

    /// The namespaced client id: the configured id with [`CLIENT_ID_PREFIX`]
    /// applied exactly once. Reapplying the rule is a no-op.
    pub fn client_id(&self) -> String {
        let id = &self.configured_client_id;
        let already_prefixed = id
            .get(..CLIENT_ID_PREFIX.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(CLIENT_ID_PREFIX));
        if already_prefixed {
            id.clone()
        } else {
            format!("{}{}", CLIENT_ID_PREFIX, id)
        }
    }

    pub fn is_websocket(&self) -> bool {
        self.broker.starts_with("ws")
    }
}

/// Narrow interface to the externally-owned configuration store.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Current broker configuration. `Ok(None)` means no configuration has
    /// been provisioned yet, which is distinct from a failed read.
    async fn broker_config(&self) -> Result<Option<BrokerConfig>, ConfigError>;

    /// Capture settings snapshot for this daemon run.
    fn capture_config(&self) -> CaptureConfig;
}

/// On-disk layout of the stored broker record.
#[derive(Debug, Deserialize)]
struct StoredBrokerRecord {
    connection_secret: String,
    broker_port: u16,
    topic_publish: String,
}

/// Provider backed by a JSON file maintained by the configuration frontend.
pub struct FileConfigProvider {
    path: PathBuf,
    capture: CaptureConfig,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>, capture: CaptureConfig) -> Self {
        Self {
            path: path.into(),
            capture,
        }
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn broker_config(&self) -> Result<Option<BrokerConfig>, ConfigError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: StoredBrokerRecord = serde_json::from_str(&raw)?;
        let secret = ConnectionSecret::decode(&record.connection_secret)?;
        Ok(Some(BrokerConfig::new(
            secret,
            record.broker_port,
            record.topic_publish,
        )))
    }

    fn capture_config(&self) -> CaptureConfig {
        self.capture.clone()
    }
}
