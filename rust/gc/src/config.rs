use backon::ExponentialBuilder;
use cdc_config::helpers::{deserialize_duration_from_seconds, serialize_duration_to_seconds};
use cdc_error::{CdcError, ErrorCodes};
use cdc_tracing::OtelFilter;
use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "./gc_manager_config.yaml";
pub const CONFIG_PATH_ENV_VAR: &str = "CONFIG_PATH";

#[derive(Debug, Error)]
pub enum GcManagerConfigError {
    #[error("Error loading config: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("gc_ttl must be at least one second, got {0:?}")]
    InvalidTtl(Duration),
    #[error("service_id must not be empty")]
    EmptyServiceId,
}

impl CdcError for GcManagerConfigError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcManagerConfig {
    /// Identity of this capture cluster's registration at the upstream.
    #[serde(default = "GcManagerConfig::default_service_id")]
    pub service_id: String,
    /// How long the upstream keeps our registration without a refresh. Also
    /// the grace window for consecutive push failures.
    #[serde(
        default = "GcManagerConfig::default_gc_ttl",
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds"
    )]
    pub gc_ttl: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "GcManagerConfig::default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub otel_endpoint: Option<String>,
    #[serde(default)]
    pub otel_filters: Vec<OtelFilter>,
}

impl GcManagerConfig {
    fn default_service_id() -> String {
        "ticdc-default".to_string()
    }

    fn default_gc_ttl() -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }

    fn default_service_name() -> String {
        "gc-manager".to_string()
    }

    /// Loads from `$CONFIG_PATH` when set, otherwise from the default path.
    pub fn load() -> Result<Self, GcManagerConfigError> {
        match std::env::var(CONFIG_PATH_ENV_VAR) {
            Ok(path) => Self::load_from_path(&path),
            Err(_) => Self::load_from_path(DEFAULT_CONFIG_PATH),
        }
    }

    pub fn load_from_path(path: &str) -> Result<Self, GcManagerConfigError> {
        // Nested keys are spelled with a double underscore in the environment,
        // e.g. CDC_GC_RETRY__MAX_RETRIES.
        let mut f = figment::Figment::from(
            Env::prefixed("CDC_GC_").map(|k| k.as_str().replace("__", ".").into()),
        );
        if std::path::Path::new(path).exists() {
            f = figment::Figment::from(Yaml::file(path)).merge(f);
        }
        let config: GcManagerConfig = f.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GcManagerConfigError> {
        if self.service_id.is_empty() {
            return Err(GcManagerConfigError::EmptyServiceId);
        }
        if self.gc_ttl < Duration::from_secs(1) {
            return Err(GcManagerConfigError::InvalidTtl(self.gc_ttl));
        }
        Ok(())
    }
}

impl Default for GcManagerConfig {
    fn default() -> Self {
        Self {
            service_id: Self::default_service_id(),
            gc_ttl: Self::default_gc_ttl(),
            retry: RetryConfig::default(),
            service_name: Self::default_service_name(),
            otel_endpoint: None,
            otel_filters: Vec::new(),
        }
    }
}

/// Backoff applied to each upstream safepoint update before the manager
/// treats the push as failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub factor: f32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: usize,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            factor: 2.0,
            min_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_retries: 8,
            jitter: true,
        }
    }
}

impl From<&RetryConfig> for ExponentialBuilder {
    fn from(config: &RetryConfig) -> Self {
        let b = ExponentialBuilder::default()
            .with_factor(config.factor)
            .with_min_delay(Duration::from_millis(config.min_delay_ms))
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
            .with_max_times(config.max_retries);
        if config.jitter {
            b.with_jitter()
        } else {
            b
        }
    }
}
