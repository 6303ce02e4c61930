//! Configuration system using Figment
//!
//! Configuration is layered, later sources override earlier ones:
//! 1. Built-in defaults
//! 2. `config/counter_bridge.toml` (or an explicit path; the file is optional)
//! 3. `SUPABASE_URL` / `SUPABASE_API_KEY` entries of a `.env` file (optional)
//! 4. `SUPABASE_URL` / `SUPABASE_API_KEY` environment variables
//! 5. Environment variables prefixed with `COUNTER_BRIDGE_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use counter_bridge::config::BridgeConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BridgeConfig::load()?;
//! config.validate()?;
//! println!("Store: {}", config.store.url);
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, BridgeError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/counter_bridge.toml";

/// Dotenv file holding the data store credentials, relative to the working directory.
pub const DEFAULT_DOTENV_PATH: &str = ".env";

/// Prefix for environment overrides, e.g. `COUNTER_BRIDGE_SERIAL__BAUD_RATE=9600`.
pub const ENV_PREFIX: &str = "COUNTER_BRIDGE_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sensor serial link
    #[serde(default)]
    pub serial: SerialConfig,
    /// HTTP data store
    #[serde(default)]
    pub store: StoreConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Colorize pretty output
    #[serde(default = "default_log_ansi")]
    pub log_ansi: bool,
    /// Include source file and line in log events
    #[serde(default)]
    pub log_file_and_line: bool,
}

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path; auto-detected when absent
    #[serde(default)]
    pub port: Option<String>,
    /// Baud rate of the sensor firmware
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Read timeout in milliseconds; bounds how quickly an interrupt is noticed
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

/// Data store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Project base URL, e.g. `https://your-project.supabase.co`
    #[serde(default)]
    pub url: String,
    /// API key, sent both as `apikey` and as the bearer token
    #[serde(default)]
    pub api_key: String,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Detection records resource
    #[serde(default = "default_counts_table")]
    pub counts_table: String,
    /// Plans resource
    #[serde(default = "default_plans_table")]
    pub plans_table: String,
    /// Execution counters resource
    #[serde(default = "default_counters_table")]
    pub counters_table: String,
    /// Also fetch and log every plan (active or not) before each update
    #[serde(default)]
    pub log_all_plans: bool,
}

// Default value functions
fn default_name() -> String {
    "counter-bridge".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_ansi() -> bool {
    true
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_read_timeout() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    5000
}

fn default_counts_table() -> String {
    "sensor_counts".to_string()
}

fn default_plans_table() -> String {
    "dca_plans".to_string()
}

fn default_counters_table() -> String {
    "dca_execution_counts".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_ansi: default_log_ansi(),
            log_file_and_line: false,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            request_timeout_ms: default_request_timeout(),
            counts_table: default_counts_table(),
            plans_table: default_plans_table(),
            counters_table: default_counters_table(),
            log_all_plans: false,
        }
    }
}

impl SerialConfig {
    /// Read timeout as a [`Duration`]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl StoreConfig {
    /// Request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl BridgeConfig {
    /// Load configuration from the default file and the environment
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path, `./.env` and the environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::load_with_dotenv(path, DEFAULT_DOTENV_PATH)
    }

    /// Load configuration from explicit config and dotenv paths and the environment
    pub fn load_with_dotenv<P: AsRef<Path>, D: AsRef<Path>>(
        path: P,
        dotenv: D,
    ) -> AppResult<Self> {
        Ok(Self::figment(path, dotenv)?.extract()?)
    }

    /// The layered provider stack behind [`BridgeConfig::load_from`]
    pub fn figment<P: AsRef<Path>, D: AsRef<Path>>(path: P, dotenv: D) -> AppResult<Figment> {
        Ok(Figment::from(Serialized::defaults(BridgeConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(dotenv_credentials(dotenv.as_ref())?)
            .merge(supabase_env())
            .merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        if self.store.url.trim().is_empty() {
            return Err(BridgeError::MissingCredentials("SUPABASE_URL"));
        }
        if self.store.api_key.trim().is_empty() {
            return Err(BridgeError::MissingCredentials("SUPABASE_API_KEY"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(BridgeError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(BridgeError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if !(self.store.url.starts_with("http://") || self.store.url.starts_with("https://")) {
            return Err(BridgeError::Configuration(format!(
                "Invalid store url '{}'. Must start with http:// or https://",
                self.store.url
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(BridgeError::Configuration(
                "serial.baud_rate must be greater than 0".to_string(),
            ));
        }
        if self.serial.read_timeout_ms == 0 || self.store.request_timeout_ms == 0 {
            return Err(BridgeError::Configuration(
                "timeouts must be greater than 0 ms".to_string(),
            ));
        }

        Ok(())
    }
}

/// Config key for a conventional `SUPABASE_*` variable name.
fn supabase_key(name: &str) -> Option<&'static str> {
    if name.eq_ignore_ascii_case("SUPABASE_URL") {
        Some("store.url")
    } else if name.eq_ignore_ascii_case("SUPABASE_API_KEY") {
        Some("store.api_key")
    } else {
        None
    }
}

/// Maps the conventional `SUPABASE_*` variables onto `store.*` keys.
fn supabase_env() -> Env {
    Env::raw().filter_map(|key| supabase_key(key.as_str()).map(Into::into))
}

/// Credentials from a dotenv file; a missing file contributes nothing.
fn dotenv_credentials(path: &Path) -> AppResult<Figment> {
    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(e) if e.not_found() => return Ok(Figment::new()),
        Err(e) => {
            return Err(BridgeError::Configuration(format!(
                "Cannot read {}: {}",
                path.display(),
                e
            )))
        }
    };

    let mut layer = Figment::new();
    for entry in entries {
        let (name, value) = entry.map_err(|e| {
            BridgeError::Configuration(format!("Malformed {}: {}", path.display(), e))
        })?;
        if let Some(key) = supabase_key(&name) {
            debug!(key, file = %path.display(), "Credential loaded from dotenv file");
            layer = layer.merge(Serialized::default(key, value));
        }
    }
    Ok(layer)
}
