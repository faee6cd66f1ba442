//! Configuration Module
//!
//! Loads the bridge configuration once at startup, from either:
//! - a Java-style properties file (`key=value`, any extension but `.toml`)
//! - a TOML file (`.toml` extension) with the same flat keys
//!
//! Both forms support `${VAR}` / `${VAR:-default}` substitution in the file
//! text and `BUSBRIDGE_<KEY>` environment overrides. Keys the bridge does
//! not recognize are passed through untouched to the client drivers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat, ValueKind};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::codec;
use crate::endpoint::drivers::DriverProperties;

pub mod properties;


/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "BUSBRIDGE";

/// Keys consumed by the bridge itself; everything else goes to the drivers
pub const KNOWN_KEYS: &[&str] = &[
    "sol_bridge_queue",
    "kaf_bridge_topics",
    "bridge_kafka_sol_topic_trans",
    "bridge_sol_kafka_topic_trans",
    "bridge_pool_capacity",
    "bridge_pool_prefill",
    "bridge_poll_timeout",
    "bridge_poll_max_records",
    "bridge_idle_backoff",
    "bridge_send_attempts",
    "bridge_stats_interval",
    "bridge_key_codec",
    "bridge_value_codec",
    "bridge_log_driver",
    "bridge_queue_driver",
    "log_level",
    "metrics_enabled",
    "metrics_bind",
];

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = match Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure.
///
/// Key names follow the historical property names so existing property
/// files keep working.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Queue bound by the queue-bus endpoint
    #[serde(deserialize_with = "properties::deserialize_non_empty")]
    pub sol_bridge_queue: Option<String>,
    /// Log-bus source topics
    #[serde(deserialize_with = "properties::deserialize_list")]
    pub kaf_bridge_topics: Vec<String>,
    /// Log -> queue topic translations
    #[serde(deserialize_with = "properties::deserialize_pairs")]
    pub bridge_kafka_sol_topic_trans: Vec<(String, String)>,
    /// Queue -> log topic translations
    #[serde(deserialize_with = "properties::deserialize_pairs")]
    pub bridge_sol_kafka_topic_trans: Vec<(String, String)>,
    /// In-flight pool capacity
    pub bridge_pool_capacity: usize,
    /// Allocate every pool entry at startup
    pub bridge_pool_prefill: bool,
    #[serde(with = "humantime_serde")]
    pub bridge_poll_timeout: Duration,
    /// Upper bound on records per poll; must fit in the pool
    pub bridge_poll_max_records: usize,
    #[serde(with = "humantime_serde")]
    pub bridge_idle_backoff: Duration,
    /// Synchronous publish attempts toward the queue bus
    pub bridge_send_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub bridge_stats_interval: Duration,
    pub bridge_key_codec: String,
    pub bridge_value_codec: String,
    pub bridge_log_driver: String,
    pub bridge_queue_driver: String,
    pub log_level: String,
    pub metrics_enabled: bool,
    pub metrics_bind: SocketAddr,
    /// Unrecognized keys, handed to the client drivers
    #[serde(skip)]
    pub client_properties: DriverProperties,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sol_bridge_queue: None,
            kaf_bridge_topics: Vec::new(),
            bridge_kafka_sol_topic_trans: Vec::new(),
            bridge_sol_kafka_topic_trans: Vec::new(),
            bridge_pool_capacity: 10_000,
            bridge_pool_prefill: false,
            bridge_poll_timeout: Duration::from_secs(1),
            bridge_poll_max_records: 500,
            bridge_idle_backoff: Duration::from_millis(100),
            bridge_send_attempts: 5,
            bridge_stats_interval: Duration::from_secs(10),
            bridge_key_codec: "string".to_string(),
            bridge_value_codec: "bytes".to_string(),
            bridge_log_driver: "memory".to_string(),
            bridge_queue_driver: "memory".to_string(),
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_bind: SocketAddr::from(([0, 0, 0, 0], 9090)),
            client_properties: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a file with environment variable overrides.
    ///
    /// The format follows the extension: `.toml` is TOML, anything else is
    /// read as a properties file. A missing file is an error.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}`
    /// 2. Override via env vars: `BUSBRIDGE_` prefix plus the key name:
    ///    - `BUSBRIDGE_BRIDGE_POOL_CAPACITY=50000` overrides `bridge_pool_capacity`
    ///    - `BUSBRIDGE_SOL_BRIDGE_QUEUE=ORD.Q` overrides `sol_bridge_queue`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let format = Self::format_for(path);

        let cfg = config::Config::builder()
            .add_source(File::from_str(&Self::prepare(&content, format), format))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        debug!("Loaded configuration from {}", path.display());
        Self::from_source(cfg)
    }

    /// Parse configuration from a string (for testing, no env var overrides)
    pub fn parse(content: &str, format: FileFormat) -> Result<Self, ConfigError> {
        let cfg = config::Config::builder()
            .add_source(File::from_str(&Self::prepare(content, format), format))
            .build()?;
        Self::from_source(cfg)
    }

    fn format_for(path: &Path) -> FileFormat {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => FileFormat::Toml,
            _ => FileFormat::Ini,
        }
    }

    fn prepare(content: &str, format: FileFormat) -> String {
        let substituted = substitute_env_vars(content);
        match format {
            // The INI reader consumes one level of backslash escapes; keep
            // `\:` intact for the translation pair parser
            FileFormat::Ini => substituted.replace("\\:", "\\\\:"),
            _ => substituted,
        }
    }

    fn from_source(cfg: config::Config) -> Result<Self, ConfigError> {
        let raw: HashMap<String, config::Value> = cfg.clone().try_deserialize()?;
        let mut config: Config = cfg.try_deserialize()?;

        for (key, value) in raw {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                collect_property(key, value, &mut config.client_properties);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge_pool_capacity == 0 {
            return Err(ConfigError::Validation(
                "bridge_pool_capacity must be at least 1".to_string(),
            ));
        }

        if self.bridge_send_attempts == 0 {
            return Err(ConfigError::Validation(
                "bridge_send_attempts must be at least 1".to_string(),
            ));
        }

        if self.bridge_poll_max_records == 0
            || self.bridge_poll_max_records > self.bridge_pool_capacity
        {
            return Err(ConfigError::Validation(format!(
                "bridge_poll_max_records must be between 1 and bridge_pool_capacity ({}), got {}",
                self.bridge_pool_capacity, self.bridge_poll_max_records
            )));
        }

        if self.bridge_stats_interval.is_zero() {
            return Err(ConfigError::Validation(
                "bridge_stats_interval must be greater than zero".to_string(),
            ));
        }

        for (key, id) in [
            ("bridge_key_codec", &self.bridge_key_codec),
            ("bridge_value_codec", &self.bridge_value_codec),
        ] {
            if codec::lookup(id).is_err() {
                return Err(ConfigError::Validation(format!(
                    "{} '{}' is not one of: {}",
                    key,
                    id,
                    codec::available().join(", ")
                )));
            }
        }

        Ok(())
    }
}

/// Flatten one driver property back to its dotted name.
///
/// The config crate nests dotted keys (`bootstrap.servers`) into tables;
/// drivers expect the flat form.
fn collect_property(key: String, value: config::Value, out: &mut DriverProperties) {
    if matches!(value.kind, ValueKind::Table(_)) {
        if let Ok(table) = value.into_table() {
            for (child, value) in table {
                collect_property(format!("{}.{}", key, child), value, out);
            }
        }
        return;
    }

    match value.into_string() {
        Ok(value) => {
            out.insert(key, value);
        }
        Err(e) => debug!("Not passing '{}' to drivers: {}", key, e),
    }
}

/// Queue and topics to bridge, after command-line overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    pub queue: String,
    pub topics: Vec<String>,
}

impl BridgeSettings {
    /// Merge command-line values over the file; both must end up present
    pub fn resolve(
        config: &Config,
        queue: Option<String>,
        topics: &[String],
    ) -> Result<Self, ConfigError> {
        let queue = queue
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .or_else(|| config.sol_bridge_queue.clone())
            .ok_or_else(|| {
                ConfigError::Validation(
                    "no queue given (sol_bridge_queue or command line)".to_string(),
                )
            })?;

        let topics = if topics.is_empty() {
            config.kaf_bridge_topics.clone()
        } else {
            topics.iter().flat_map(|t| properties::split_list(t)).collect()
        };
        if topics.is_empty() {
            return Err(ConfigError::Validation(
                "no topics given (kaf_bridge_topics or command line)".to_string(),
            ));
        }

        Ok(Self { queue, topics })
    }
}
