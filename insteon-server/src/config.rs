//! Daemon configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (given with --config or INSTEON_CONFIG)
//! 3. Environment variables

use insteon_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BAUD: u32 = 19_200;

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateways to drive, each with its own engine.
    pub gateways: Vec<GatewayConfig>,
    pub storage: StorageConfig,
    /// Read-only HTTP status endpoint.
    pub status: StatusConfig,
    /// Protocol timings shared by every gateway.
    pub engine: EngineConfig,
}

impl Config {
    /// Loads configuration from `path`, or from INSTEON_CONFIG when no path is
    /// given, then applies environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("INSTEON_CONFIG").map(PathBuf::from));
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    /// Applies overrides looked up by variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.storage.apply_overrides(&lookup);
        self.status.apply_overrides(&lookup);
        apply_engine_overrides(&mut self.engine, &lookup);

        // Single-gateway shorthand: INSTEON_PORT / INSTEON_HUB target the first gateway.
        let port = lookup("INSTEON_PORT");
        let hub = lookup("INSTEON_HUB");
        if (port.is_some() || hub.is_some()) && self.gateways.is_empty() {
            self.gateways.push(GatewayConfig::default());
        }
        if let Some(gateway) = self.gateways.first_mut() {
            if let Some(port) = port {
                gateway.port = Some(port);
                gateway.hub = None;
            }
            if let Some(hub) = hub {
                gateway.hub = Some(hub);
                gateway.port = None;
            }
            if let Some(baud) = parsed(&lookup, "INSTEON_BAUD") {
                gateway.baud = baud;
            }
        }
    }

    /// Checks that gateways are uniquely named and each names one link.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for gateway in &self.gateways {
            if gateway.name.is_empty() {
                return Err(ConfigError::Validation("gateway name must not be empty".to_string()));
            }
            if !names.insert(gateway.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate gateway name '{}'",
                    gateway.name
                )));
            }
            match (&gateway.port, &gateway.hub) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "gateway '{}' needs exactly one of port or hub",
                        gateway.name
                    )))
                }
            }
        }
        if self.storage.save_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "storage.save_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn gateway(&self, name: &str) -> Option<&GatewayConfig> {
        self.gateways.iter().find(|g| g.name == name)
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.parse().ok())
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    lookup(key).map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
}

fn apply_engine_overrides(engine: &mut EngineConfig, lookup: &impl Fn(&str) -> Option<String>) {
    if let Some(ms) = parsed(lookup, "INSTEON_GATEWAY_ACK_TIMEOUT_MS") {
        engine.gateway_ack_timeout_ms = ms;
    }
    if let Some(n) = parsed(lookup, "INSTEON_MAX_GATEWAY_RETRIES") {
        engine.max_gateway_retries = n;
    }
    if let Some(n) = parsed(lookup, "INSTEON_MAX_DEVICE_RETRIES") {
        engine.max_device_retries = n;
    }
    if let Some(ms) = parsed(lookup, "INSTEON_CONVERSATION_TIMEOUT_MS") {
        engine.conversation_timeout_ms = ms;
    }
    if let Some(value) = lookup("INSTEON_TRIGGER_TTL_MS") {
        // 0 disables trigger expiry.
        match value.parse::<u64>() {
            Ok(0) => engine.trigger_ttl_ms = None,
            Ok(ms) => engine.trigger_ttl_ms = Some(ms),
            Err(_) => {}
        }
    }
}

/// One gateway, reached over a serial port or a TCP hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub name: String,
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub port: Option<String>,
    /// `host:port` of a hub exposing the PLM over TCP.
    pub hub: Option<String>,
    pub baud: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "plm".to_string(),
            port: None,
            hub: None,
            baud: DEFAULT_BAUD,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory.
    pub data_dir: PathBuf,
    /// Seconds between periodic snapshot saves.
    pub save_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            save_interval_secs: 300,
        }
    }
}

impl StorageConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("INSTEON_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parsed(lookup, "INSTEON_SAVE_INTERVAL") {
            self.save_interval_secs = secs;
        }
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
}

/// Status endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Milliseconds between engine polls.
    pub poll_interval_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8085)),
            poll_interval_ms: 5,
        }
    }
}

impl StatusConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(enabled) = flag(lookup, "INSTEON_STATUS_ENABLED") {
            self.enabled = enabled;
        }
        if let Some(addr) = parsed(lookup, "INSTEON_STATUS_BIND") {
            self.bind_addr = addr;
        }
        if let Some(ms) = parsed(lookup, "INSTEON_POLL_INTERVAL_MS") {
            self.poll_interval_ms = ms;
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.gateways.is_empty());
        assert_eq!(config.storage.snapshots_dir(), PathBuf::from("./data/snapshots"));
        assert_eq!(config.storage.save_interval(), Duration::from_secs(300));
        assert_eq!(config.status.bind_addr.port(), 8085);
        assert_eq!(config.engine.gateway_ack_timeout_ms, 75);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("insteon.yaml");
        std::fs::write(
            &path,
            r#"
gateways:
  - name: home
    port: /dev/ttyUSB0
  - name: barn
    hub: 192.168.1.20:9761
storage:
  data_dir: /var/lib/insteon
status:
  bind_addr: 0.0.0.0:9000
engine:
  conversation_timeout_ms: 4000
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateways.len(), 2);
        let home = config.gateway("home").unwrap();
        assert_eq!(home.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(home.baud, DEFAULT_BAUD);
        assert_eq!(config.gateway("barn").unwrap().hub.as_deref(), Some("192.168.1.20:9761"));
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/insteon"));
        assert_eq!(config.storage.save_interval_secs, 300);
        assert_eq!(config.status.bind_addr.port(), 9000);
        assert_eq!(config.engine.conversation_timeout_ms, 4000);
        assert_eq!(config.engine.gateway_ack_timeout_ms, 75);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/insteon.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("INSTEON_PORT", "/dev/ttyS1"),
            ("INSTEON_BAUD", "9600"),
            ("INSTEON_DATA_DIR", "/tmp/insteon"),
            ("INSTEON_STATUS_ENABLED", "false"),
            ("INSTEON_STATUS_BIND", "127.0.0.1:9999"),
            ("INSTEON_GATEWAY_ACK_TIMEOUT_MS", "120"),
            ("INSTEON_TRIGGER_TTL_MS", "0"),
        ]));

        assert_eq!(config.gateways.len(), 1);
        assert_eq!(config.gateways[0].port.as_deref(), Some("/dev/ttyS1"));
        assert_eq!(config.gateways[0].baud, 9600);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/insteon"));
        assert!(!config.status.enabled);
        assert_eq!(config.status.bind_addr.port(), 9999);
        assert_eq!(config.engine.gateway_ack_timeout_ms, 120);
        assert_eq!(config.engine.trigger_ttl_ms, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hub_override_replaces_port() {
        let mut config = Config {
            gateways: vec![GatewayConfig {
                port: Some("/dev/ttyUSB0".to_string()),
                ..GatewayConfig::default()
            }],
            ..Config::default()
        };
        config.apply_overrides(lookup(&[
            ("INSTEON_HUB", "10.0.0.5:9761"),
            ("INSTEON_BAUD", "fast"),
        ]));
        assert_eq!(config.gateways[0].port, None);
        assert_eq!(config.gateways[0].hub.as_deref(), Some("10.0.0.5:9761"));
        assert_eq!(config.gateways[0].baud, DEFAULT_BAUD);
    }

    #[test]
    fn test_validation() {
        let gateway = |name: &str, port: Option<&str>, hub: Option<&str>| GatewayConfig {
            name: name.to_string(),
            port: port.map(str::to_string),
            hub: hub.map(str::to_string),
            baud: DEFAULT_BAUD,
        };

        let mut config = Config {
            gateways: vec![
                gateway("a", Some("/dev/ttyUSB0"), None),
                gateway("a", Some("/dev/ttyUSB1"), None),
            ],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        config.gateways = vec![gateway("a", None, None)];
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        config.gateways = vec![gateway("a", Some("/dev/ttyUSB0"), Some("10.0.0.5:9761"))];
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        config.gateways = vec![gateway("", Some("/dev/ttyUSB0"), None)];
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("insteon.yaml");
        let mut config = Config::default();
        config.gateways.push(GatewayConfig {
            port: Some("/dev/ttyUSB0".to_string()),
            ..GatewayConfig::default()
        });
        config.save(&path).unwrap();

        let parsed = Config::from_file(&path).unwrap();
        assert_eq!(parsed.status.bind_addr, config.status.bind_addr);
        assert_eq!(parsed.gateways[0].name, "plm");
        assert_eq!(parsed.engine, config.engine);
    }
}
