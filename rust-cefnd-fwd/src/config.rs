//! Forwarder configuration.
//!
//! Options are grouped per component. Every field has a default, so an
//! empty file (or no file at all) yields a working daemon; values can be
//! overridden with `CEFND_*` environment variables, nested sections joined
//! by a double underscore (`CEFND_PIT__CAPACITY=4096`).

use config::{Config, Environment, File};
use rust_cefnd_common::types::{ReturnCode, DEFAULT_PORT, MAX_CS_ENTRIES, MAX_FIB_ENTRIES, MAX_PIT_ENTRIES};
use rust_cefnd_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pit::SuppressionMode;
use crate::strategy;

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Address the UDP and TCP listeners bind to
    pub listen_addr: String,

    /// Port for UDP and TCP faces
    pub port: u16,

    /// Unix socket applications connect to
    pub local_socket: PathBuf,

    /// Unix socket of the administrative control channel
    pub control_socket: PathBuf,

    /// Static route file read once at startup
    pub routes_file: Option<PathBuf>,

    /// Forwarding strategy name (`default`, `flooding`, `cost`)
    pub strategy: String,

    /// Whether Interest Returns are generated at all
    pub interest_return: bool,

    /// Code of the deferred return held for hop-limit-1 Interests
    pub hop_limit_return_code: ReturnCode,

    /// Capacity of the face event channel
    pub event_buffer_size: usize,

    /// UDP faces learned from unknown sources before new sources are ignored
    pub max_udp_faces: usize,

    pub pit: PitConfig,
    pub fib: FibConfig,
    pub cs: CsConfig,
    pub tx: TxConfig,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            local_socket: PathBuf::from("/tmp/cefnd.sock"),
            control_socket: PathBuf::from("/tmp/cefnd.ctrl"),
            routes_file: None,
            strategy: "default".to_string(),
            interest_return: true,
            hop_limit_return_code: ReturnCode::HopLimitExceeded,
            event_buffer_size: 1024,
            max_udp_faces: 4096,
            pit: PitConfig::default(),
            fib: FibConfig::default(),
            cs: CsConfig::default(),
            tx: TxConfig::default(),
        }
    }
}

impl ForwarderConfig {
    /// Load the configuration: defaults, then `path` (TOML, or any format
    /// the extension names) when given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("CEFND")
                .prefix_separator("_")
                .separator("__"),
        );

        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        if strategy::by_name(&self.strategy).is_none() {
            return Err(Error::Config(format!(
                "Unknown strategy '{}' (expected one of: {})",
                self.strategy,
                strategy::NAMES.join(", ")
            )));
        }
        if !matches!(
            self.hop_limit_return_code,
            ReturnCode::HopLimitExceeded | ReturnCode::NoRoute
        ) {
            return Err(Error::Config(format!(
                "hop_limit_return_code must be hop_limit_exceeded or no_route, got {:?}",
                self.hop_limit_return_code
            )));
        }
        if self.max_udp_faces == 0 {
            return Err(Error::Config("max_udp_faces must be at least 1".into()));
        }
        if self.pit.capacity == 0 {
            return Err(Error::Config("pit.capacity must be at least 1".into()));
        }
        if self.fib.capacity == 0 {
            return Err(Error::Config("fib.capacity must be at least 1".into()));
        }
        if self.tx.lane_capacity == 0 || self.tx.worker_capacity == 0 {
            return Err(Error::Config("tx queue capacities must be at least 1".into()));
        }
        if self.tx.mode == TxMode::Sharded && self.tx.workers == 0 {
            return Err(Error::Config("tx.workers must be at least 1 in sharded mode".into()));
        }
        Ok(())
    }

    /// `listen_addr:port`
    pub fn listen_endpoint(&self) -> String {
        format!("{}:{}", self.listen_addr, self.port)
    }
}

/// Pending Interest Table options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitConfig {
    /// Maximum number of entries
    pub capacity: usize,

    /// Minimum time between two sweeps (in milliseconds)
    pub sweep_period_ms: u64,

    /// Soft cleanup checkpoint of an entry (in milliseconds)
    pub clean_interval_ms: u64,

    /// Lifetime applied to Interests that carry none (in milliseconds)
    pub default_lifetime_ms: u64,

    /// Number of recently delivered chunks a Symbolic entry remembers
    pub symbolic_window: usize,

    /// Retransmission handling
    pub suppression: SuppressionMode,
}

impl Default for PitConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_PIT_ENTRIES,
            sweep_period_ms: 100,
            clean_interval_ms: 1000,
            default_lifetime_ms: 4000,
            symbolic_window: 64,
            suppression: SuppressionMode::Suppress,
        }
    }
}

impl PitConfig {
    pub fn default_lifetime(&self) -> Duration {
        Duration::from_millis(self.default_lifetime_ms)
    }
}

/// Forwarding Information Base options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FibConfig {
    /// Maximum number of prefixes
    pub capacity: usize,
}

impl Default for FibConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_FIB_ENTRIES,
        }
    }
}

/// Content Store options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsConfig {
    pub enabled: bool,

    /// Maximum number of cached objects
    pub capacity: usize,

    /// Cache time for objects that carry none (in milliseconds)
    pub default_cache_time_ms: u64,
}

impl Default for CsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: MAX_CS_ENTRIES,
            default_cache_time_ms: 10_000,
        }
    }
}

/// How the transmission pipeline reaches the faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxMode {
    /// The dispatcher sends every frame itself.
    Simple,
    /// One worker per face bucket.
    Sharded,
}

/// Transmission pipeline options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxConfig {
    pub mode: TxMode,

    /// Number of workers in sharded mode
    pub workers: usize,

    /// Capacity of each priority lane
    pub lane_capacity: usize,

    /// Capacity of each worker queue
    pub worker_capacity: usize,

    /// Extra push attempts on a full queue before the frame is dropped
    pub push_retries: u32,

    /// Sleep between push attempts (in microseconds)
    pub retry_backoff_us: u64,

    /// Minimum gap between two sends to the same face (in microseconds,
    /// sharded mode only)
    pub pacing_us: u64,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            mode: TxMode::Sharded,
            workers: 2,
            lane_capacity: 1024,
            worker_capacity: 256,
            push_retries: 3,
            retry_backoff_us: 200,
            pacing_us: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ForwarderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.listen_endpoint(), format!("0.0.0.0:{}", DEFAULT_PORT));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
port = 7000
max_udp_faces = 16
strategy = "flooding"
hop_limit_return_code = "no_route"

[pit]
capacity = 10
suppression = "verbatim"

[tx]
mode = "simple"
"#
        )
        .unwrap();

        let config = ForwarderConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.max_udp_faces, 16);
        assert_eq!(config.strategy, "flooding");
        assert_eq!(config.hop_limit_return_code, ReturnCode::NoRoute);
        assert_eq!(config.pit.capacity, 10);
        assert_eq!(config.pit.suppression, SuppressionMode::Verbatim);
        // untouched fields keep their defaults
        assert_eq!(config.pit.default_lifetime_ms, 4000);
        assert_eq!(config.tx.mode, TxMode::Simple);
        assert_eq!(config.tx.workers, 2);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = ForwarderConfig::load(Some(Path::new("/nonexistent/cefnd.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validation() {
        let mut config = ForwarderConfig::default();
        config.strategy = "random".into();
        assert!(config.validate().is_err());

        let mut config = ForwarderConfig::default();
        config.hop_limit_return_code = ReturnCode::Congested;
        assert!(config.validate().is_err());

        let mut config = ForwarderConfig::default();
        config.max_udp_faces = 0;
        assert!(config.validate().is_err());

        let mut config = ForwarderConfig::default();
        config.tx.workers = 0;
        assert!(config.validate().is_err());
        config.tx.mode = TxMode::Simple;
        assert!(config.validate().is_ok());
    }
}
