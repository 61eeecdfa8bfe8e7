use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use validator::{Validate, ValidationError};

use crate::errors::CheckoutError;
use crate::services::settlement_watcher::WatcherConfig;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_SETTLEMENT_TIMEOUT_SECS: u64 = 600;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_EVENT_BUFFER: usize = 64;

fn validate_base_url(url: &str) -> Result<(), ValidationError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        let mut err = ValidationError::new("invalid_base_url");
        err.message = Some("Base URL must start with http:// or https://".into());
        Err(err)
    }
}

/// Checkout core configuration with validation.
///
/// Every knob the factory, watcher, and fulfillment engine need arrives here
/// and is passed into their constructors; the services themselves never read
/// the process environment.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CheckoutConfig {
    /// Base URL of the multi-rail payment provider API
    #[validate(custom = "validate_base_url")]
    pub provider_base_url: String,

    /// Base URL of the order fulfillment backend
    #[validate(custom = "validate_base_url")]
    pub fulfillment_base_url: String,

    /// Seconds between cumulative-spend samples on the crypto rail
    #[serde(default = "default_poll_interval_secs")]
    #[validate(range(min = 1, max = 300))]
    pub poll_interval_secs: u64,

    /// Ceiling on one settlement polling run. The reference storefront
    /// polled for as long as the tab stayed open; a finite ceiling keeps the
    /// watcher from hanging and surfaces a non-fatal "not yet detected"
    /// status instead.
    #[serde(default = "default_settlement_timeout_secs")]
    #[validate(range(min = 5, max = 86400))]
    pub settlement_timeout_secs: u64,

    /// Per-request timeout for provider and fulfillment HTTP calls
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Capacity of the checkout event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Log level filter for tracing output
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_settlement_timeout_secs() -> u64 {
    DEFAULT_SETTLEMENT_TIMEOUT_SECS
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            provider_base_url: "http://localhost:8081".to_string(),
            fulfillment_base_url: "http://localhost:8082".to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            settlement_timeout_secs: DEFAULT_SETTLEMENT_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
        }
    }
}

impl CheckoutConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.settlement_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn watcher(&self) -> WatcherConfig {
        WatcherConfig {
            interval: self.poll_interval(),
            timeout: self.settlement_timeout(),
        }
    }
}

/// Loads checkout configuration.
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<CheckoutConfig, CheckoutError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    let mut builder = Config::builder();
    if Path::new(CONFIG_DIR).exists() {
        builder = builder
            .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
            .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));
    } else {
        info!(
            "Config directory '{}' not found; relying on environment variables",
            CONFIG_DIR
        );
    }
    let settings = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let config: CheckoutConfig = settings.try_deserialize()?;
    config
        .validate()
        .map_err(|e| CheckoutError::Config(e.to_string()))?;
    Ok(config)
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("giftcard_checkout={}", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(filter_directive)
            .json()
            .try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}
