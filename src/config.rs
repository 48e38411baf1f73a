//! Listener Configuration
//!
//! Settings can come from a TOML file, from environment variables, or both
//! (environment wins). Timing knobs default to the values the ingestion loop
//! was designed around and rarely need changing outside tests.
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | PORT_LISTENER_SOURCE | Source (thread/table) name |
//! | PORT_LISTENER_HOST | Bridge host |
//! | PORT_LISTENER_PORT | Bridge port |
//! | PORT_LISTENER_BATCH_SIZE | Bytes per batch (16..=1024) |
//! | PORT_LISTENER_BATCHES_PER_FLUSH | Batches collected before a save |
//! | PORT_LISTENER_DATA_DIR | Directory for the local byte store |

use crate::error::{ListenerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const BATCH_SIZE_MIN: usize = 16;
pub const BATCH_SIZE_MAX: usize = 1024;

const DEFAULT_SOURCE_NAME: &str = "port_listener";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_BATCH_SIZE: usize = 1024;
const DEFAULT_BATCHES_PER_FLUSH: usize = 10;
const DEFAULT_DATA_DIR: &str = "./data";

/// Top-level listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Name used for the table, status reports and taps
    pub source_name: String,
    /// Bridge host
    pub host: String,
    /// Bridge port
    pub port: u16,
    /// Bytes per batch (B)
    pub batch_size: usize,
    /// Batches accumulated before a flush (K)
    pub batches_per_flush: usize,
    /// Directory used by the binary's local byte store
    pub data_dir: PathBuf,
    /// Loop timing
    pub timing: TimingConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            source_name: DEFAULT_SOURCE_NAME.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            batch_size: DEFAULT_BATCH_SIZE,
            batches_per_flush: DEFAULT_BATCHES_PER_FLUSH,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            timing: TimingConfig::default(),
        }
    }
}

impl ListenerConfig {
    pub fn new(source_name: &str, host: &str, port: u16) -> Self {
        ListenerConfig {
            source_name: source_name.to_string(),
            host: host.to_string(),
            port,
            ..ListenerConfig::default()
        }
    }

    pub fn with_batching(mut self, batch_size: usize, batches_per_flush: usize) -> Self {
        self.batch_size = batch_size;
        self.batches_per_flush = batches_per_flush;
        self
    }

    /// Target address in `host:port` form
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ListenerError::InvalidConfig(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Overlay values from `PORT_LISTENER_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("PORT_LISTENER_SOURCE") {
            self.source_name = source;
        }
        if let Ok(host) = std::env::var("PORT_LISTENER_HOST") {
            self.host = host;
        }
        if let Some(port) = parse_env("PORT_LISTENER_PORT")? {
            self.port = port;
        }
        if let Some(batch_size) = parse_env("PORT_LISTENER_BATCH_SIZE")? {
            self.batch_size = batch_size;
        }
        if let Some(count) = parse_env("PORT_LISTENER_BATCHES_PER_FLUSH")? {
            self.batches_per_flush = count;
        }
        if let Ok(dir) = std::env::var("PORT_LISTENER_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(BATCH_SIZE_MIN..=BATCH_SIZE_MAX).contains(&self.batch_size) {
            return Err(ListenerError::InvalidBatchSize {
                batch_size: self.batch_size,
                min: BATCH_SIZE_MIN,
                max: BATCH_SIZE_MAX,
            });
        }
        if self.batches_per_flush == 0 {
            return Err(ListenerError::InvalidConfig(
                "batches_per_flush must be at least 1".to_string(),
            ));
        }
        if self.source_name.is_empty() {
            return Err(ListenerError::InvalidConfig(
                "source_name must not be empty".to_string(),
            ));
        }
        self.timing.validate()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| {
                ListenerError::InvalidConfig(format!("{} has invalid value {:?}", name, raw))
            }),
        Err(_) => Ok(None),
    }
}

/// Ingestion loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Longest wait for socket readiness per iteration (default: 100ms)
    #[serde(with = "duration_millis")]
    pub read_wait: Duration,
    /// Pause after a readiness wait times out (default: 100ms)
    #[serde(with = "duration_millis")]
    pub idle_sleep: Duration,
    /// Byte count reporting window (default: 1s)
    #[serde(with = "duration_millis")]
    pub report_interval: Duration,
    /// Quiet period that forces a partial flush (default: 5s)
    #[serde(with = "duration_millis")]
    pub stale_after: Duration,
    /// Delay before reconnecting after a read error (default: 5s)
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
    /// Poll interval while disconnected (default: 500ms)
    #[serde(with = "duration_millis")]
    pub disconnected_poll: Duration,
    /// Bounded wait for the tap and status locks (default: 10s)
    #[serde(with = "duration_millis")]
    pub lock_timeout: Duration,
    /// Upper bound on a single connect attempt (default: 5s)
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            read_wait: Duration::from_millis(100),
            idle_sleep: Duration::from_millis(100),
            report_interval: Duration::from_secs(1),
            stale_after: Duration::from_secs(5),
            retry_delay: Duration::from_secs(5),
            disconnected_poll: Duration::from_millis(500),
            lock_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl TimingConfig {
    fn validate(&self) -> Result<()> {
        let checks = [
            ("read_wait", self.read_wait),
            ("report_interval", self.report_interval),
            ("stale_after", self.stale_after),
            ("lock_timeout", self.lock_timeout),
            ("connect_timeout", self.connect_timeout),
        ];
        for (name, value) in checks {
            if value.is_zero() {
                return Err(ListenerError::InvalidConfig(format!(
                    "timing.{} must be non-zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ListenerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timing.stale_after, Duration::from_secs(5));
        assert_eq!(config.timing.read_wait, Duration::from_millis(100));
    }

    #[test]
    fn test_batch_size_bounds() {
        for ok in [16, 512, 1024] {
            let config = ListenerConfig::default().with_batching(ok, 2);
            assert!(config.validate().is_ok(), "batch size {} should be accepted", ok);
        }
        for bad in [0, 15, 1025] {
            let config = ListenerConfig::default().with_batching(bad, 2);
            assert!(matches!(
                config.validate(),
                Err(ListenerError::InvalidBatchSize { batch_size, .. }) if batch_size == bad
            ));
        }
    }

    #[test]
    fn test_zero_batches_rejected() {
        let config = ListenerConfig::default().with_batching(16, 0);
        assert!(matches!(config.validate(), Err(ListenerError::InvalidConfig(_))));
    }

    #[test]
    fn test_toml_with_partial_timing() {
        let config = ListenerConfig::from_toml_str(
            r#"
            source_name = "uart0"
            host = "10.0.0.5"
            port = 4001
            batch_size = 64
            batches_per_flush = 4

            [timing]
            stale_after = 2500
            "#,
        )
        .unwrap();

        assert_eq!(config.source_name, "uart0");
        assert_eq!(config.address(), "10.0.0.5:4001");
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.timing.stale_after, Duration::from_millis(2500));
        assert_eq!(config.timing.retry_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = ListenerConfig::from_toml_str("port = \"not a number\"").unwrap_err();
        assert!(matches!(err, ListenerError::InvalidConfig(_)));
    }
}
