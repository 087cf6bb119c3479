//! Configuration for the query-execution core.
//!
//! Loaded with precedence: Env vars > Config file > Defaults.
//!
//! # Example config file (strata.toml)
//! ```toml
//! [fanout]
//! max_parallel_requests = 8
//! request_timeout_secs = 120
//!
//! [query]
//! sorted = true
//! term_limit = 0
//! ```

use crate::error::Result;
use crate::ftgs::FtgsParams;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Top-level configuration for the query core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fan-out coordinator tuning
    pub fanout: FanoutConfig,
    /// Default query parameters
    pub query: QueryDefaults,
}

impl EngineConfig {
    /// Load configuration with precedence: Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    pub fn load(config_path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(EngineConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("STRATA_").split("_"));

        figment.extract().map_err(ConfigError::from)
    }
}

/// Fan-out coordinator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Maximum remote calls in flight at once (0 = one per node)
    pub max_parallel_requests: usize,
    /// Advisory per-call timeout handed to the transport
    pub request_timeout_secs: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_parallel_requests: 0,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Default FTGS query parameters, used when a caller does not specify them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDefaults {
    /// Request globally ordered output
    pub sorted: bool,
    /// Per-field term limit (0 = unlimited)
    pub term_limit: i64,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            sorted: true,
            term_limit: 0,
        }
    }
}

impl QueryDefaults {
    pub fn to_params(&self) -> Result<FtgsParams> {
        FtgsParams::new(self.term_limit, -1, self.sorted)
    }
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
