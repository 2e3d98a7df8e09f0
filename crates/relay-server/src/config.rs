//! Server configuration.
//!
//! Configuration is layered from:
//! - The first existing TOML file among the default paths
//! - Environment variables (`RELAY_*`, nested keys joined with `__`)

use anyhow::{Context, Result};
use relay_core::DirectoryConfig;
use relay_protocol::Domain;
use relay_transport::{RetryPolicy, WebSocketConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file locations, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "relay.toml",
    "/etc/relay/relay.toml",
    "~/.config/relay/relay.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Game relay namespace.
    #[serde(default = "RelayConfig::game")]
    pub game: RelayConfig,

    /// Meeting relay namespace.
    #[serde(default = "RelayConfig::meeting")]
    pub meeting: RelayConfig,

    /// Signaling service endpoint.
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// One relay namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Serve this namespace.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// WebSocket path for external sessions.
    pub path: String,

    /// Backend service URL.
    pub backend_url: String,

    /// Initial connection retry.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Backend connection retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Bound on each attempt.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Signaling endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Serve the signaling endpoint.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// WebSocket path.
    #[serde(default = "default_signaling_path")]
    pub path: String,

    /// Maximum members per room, 0 for unlimited.
    #[serde(default)]
    pub max_room_size: usize,

    /// Meeting service base URL for join and leave log entries.
    #[serde(default)]
    pub meeting_log_url: Option<String>,

    /// Internal key sent with meeting log entries.
    #[serde(default)]
    pub meeting_log_key: Option<String>,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrent WebSocket sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    5_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_signaling_path() -> String {
    "/signal".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_metrics_port() -> u16 {
    9090
}

impl RelayConfig {
    /// Defaults for the game namespace: a single connection attempt.
    #[must_use]
    pub fn game() -> Self {
        Self {
            enabled: true,
            path: "/game".to_string(),
            backend_url: "ws://127.0.0.1:3000/socket".to_string(),
            retry: RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
        }
    }

    /// Defaults for the meeting namespace.
    #[must_use]
    pub fn meeting() -> Self {
        Self {
            enabled: true,
            path: "/meeting".to_string(),
            backend_url: "ws://127.0.0.1:8080/signal".to_string(),
            retry: RetryConfig::default(),
        }
    }

    /// Defaults for a domain's namespace.
    #[must_use]
    pub fn for_domain(domain: Domain) -> Self {
        match domain {
            Domain::Game => Self::game(),
            Domain::Meeting => Self::meeting(),
        }
    }

    /// Connector settings for this namespace.
    #[must_use]
    pub fn connector_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            retry: self.retry.policy(),
            connect_timeout: Duration::from_millis(self.retry.connect_timeout_ms),
            ..WebSocketConfig::new(self.backend_url.clone())
        }
    }
}

impl RetryConfig {
    /// The retry policy described by this section.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
        }
    }
}

impl SignalingConfig {
    /// Room directory settings.
    #[must_use]
    pub fn directory_config(&self) -> DirectoryConfig {
        DirectoryConfig {
            max_room_size: (self.max_room_size > 0).then_some(self.max_room_size),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            game: RelayConfig::game(),
            meeting: RelayConfig::meeting(),
            signaling: SignalingConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_signaling_path(),
            max_room_size: 0,
            meeting_log_url: None,
            meeting_log_key: None,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first default path found, with
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        Self::layered(file.as_deref())
    }

    /// Load configuration from a specific file, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        Self::layered(Some(path))
    }

    fn layered(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Per-domain namespace defaults sit under the file and env layers.
        for domain in Domain::ALL {
            let defaults = RelayConfig::for_domain(domain);
            builder = builder
                .set_default(format!("{domain}.path"), defaults.path)?
                .set_default(format!("{domain}.backend_url"), defaults.backend_url)?
                .set_default(
                    format!("{domain}.retry.max_attempts"),
                    i64::from(defaults.retry.max_attempts),
                )?;
        }

        if let Some(path) = file {
            tracing::debug!(path = %path.display(), "Loading config file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Toml),
            );
        }

        let source = builder
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| match file {
                Some(path) => format!("Failed to read config file: {}", path.display()),
                None => "Failed to read environment config".to_string(),
            })?;

        source
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.host, self.port))
    }

    /// The relay namespace settings for a domain.
    #[must_use]
    pub fn relay(&self, domain: Domain) -> &RelayConfig {
        match domain {
            Domain::Game => &self.game,
            Domain::Meeting => &self.meeting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.game.path, "/game");
        assert_eq!(config.meeting.backend_url, "ws://127.0.0.1:8080/signal");
        assert_eq!(config.game.retry.max_attempts, 1);
        assert_eq!(config.meeting.retry.max_attempts, 5);
        assert!(config.signaling.enabled);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [game]
            path = "/play"
            backend_url = "ws://game.internal:3000/socket"
            retry = { max_attempts = 3 }

            [signaling]
            max_room_size = 4

            [limits]
            max_connections = 500
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.game.path, "/play");
        assert!(config.game.enabled);
        assert_eq!(config.game.retry.max_attempts, 3);
        assert_eq!(config.game.retry.initial_delay_ms, 1_000);
        assert_eq!(config.meeting.path, "/meeting");
        assert_eq!(config.limits.max_connections, 500);
        assert_eq!(config.signaling.directory_config().max_room_size, Some(4));
    }

    #[test]
    fn test_meeting_log_keys() {
        let config = Config::default();
        assert!(config.signaling.meeting_log_url.is_none());

        let config: Config = toml::from_str(
            "[signaling]\nmeeting_log_url = \"http://meet.internal:5000\"\nmeeting_log_key = \"k\"\n",
        )
        .unwrap();
        assert_eq!(
            config.signaling.meeting_log_url.as_deref(),
            Some("http://meet.internal:5000")
        );
        assert_eq!(config.signaling.meeting_log_key.as_deref(), Some("k"));
        assert_eq!(config.signaling.path, "/signal");
    }

    #[test]
    fn test_unlimited_rooms_by_default() {
        let config = Config::default();
        assert_eq!(config.signaling.directory_config().max_room_size, None);
    }

    #[test]
    fn test_retry_policy_conversion() {
        let relay = RelayConfig::meeting();
        let ws = relay.connector_config();
        assert_eq!(ws.url, "ws://127.0.0.1:8080/signal");
        assert_eq!(ws.retry.max_attempts, 5);
        assert_eq!(ws.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(ws.retry.max_delay, Duration::from_secs(5));
        assert_eq!(ws.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_section_from_file() {
        let path = std::env::temp_dir().join(format!("relay-test-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "port = 9100\n[game]\nbackend_url = \"ws://game.internal:3000/socket\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.game.backend_url, "ws://game.internal:3000/socket");
        assert_eq!(config.game.path, "/game");
        assert_eq!(config.game.retry.max_attempts, 1);
        assert_eq!(config.meeting.retry.max_attempts, 5);
    }

    #[test]
    fn test_from_file_missing() {
        assert!(Config::from_file("/nonexistent/relay.toml").is_err());
    }
}
