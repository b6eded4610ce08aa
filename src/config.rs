//! Server configuration read from `EPHEMRA_*` environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_GEO_MODEL_PATH: &str = "models_geo_phase2/geo_model.json";
pub const DEFAULT_GEO_SCALER_PATH: &str = "models_geo_phase2/scaler.json";
pub const DEFAULT_MEO_MODEL_PATH: &str = "models_meo_phase2/meo_model.json";
pub const DEFAULT_INFERENCE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Request-handling limits shared by both forecast routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceLimits {
    pub max_concurrent_inferences: usize,
    pub inference_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            max_concurrent_inferences: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            inference_timeout: Duration::from_millis(DEFAULT_INFERENCE_TIMEOUT_MS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub geo_model_path: PathBuf,
    pub geo_scaler_path: PathBuf,
    pub meo_model_path: PathBuf,
    pub limits: ServiceLimits,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            geo_model_path: PathBuf::from(DEFAULT_GEO_MODEL_PATH),
            geo_scaler_path: PathBuf::from(DEFAULT_GEO_SCALER_PATH),
            meo_model_path: PathBuf::from(DEFAULT_MEO_MODEL_PATH),
            limits: ServiceLimits::default(),
        }
    }
}

/// Unset or blank variables keep their defaults; malformed or zero values are errors.
pub fn service_config_from_env() -> Result<ServiceConfig, ConfigError> {
    let mut config = ServiceConfig::default();

    if let Some(raw) = non_blank("EPHEMRA_ADDR") {
        config.bind_addr = raw
            .parse::<SocketAddr>()
            .map_err(|err| invalid("EPHEMRA_ADDR", &raw, err.to_string()))?;
    }
    if let Some(raw) = non_blank("EPHEMRA_GEO_MODEL") {
        config.geo_model_path = PathBuf::from(raw);
    }
    if let Some(raw) = non_blank("EPHEMRA_GEO_SCALER") {
        config.geo_scaler_path = PathBuf::from(raw);
    }
    if let Some(raw) = non_blank("EPHEMRA_MEO_MODEL") {
        config.meo_model_path = PathBuf::from(raw);
    }
    if let Some(raw) = non_blank("EPHEMRA_INFERENCE_TIMEOUT_MS") {
        let ms = parse_positive("EPHEMRA_INFERENCE_TIMEOUT_MS", &raw)?;
        config.limits.inference_timeout = Duration::from_millis(ms as u64);
    }
    if let Some(raw) = non_blank("EPHEMRA_INFERENCE_CONCURRENCY") {
        config.limits.max_concurrent_inferences =
            parse_positive("EPHEMRA_INFERENCE_CONCURRENCY", &raw)?;
    }
    if let Some(raw) = non_blank("EPHEMRA_MAX_UPLOAD_BYTES") {
        config.limits.max_upload_bytes = parse_positive("EPHEMRA_MAX_UPLOAD_BYTES", &raw)?;
    }

    Ok(config)
}

fn non_blank(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_positive(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match raw.parse::<usize>() {
        Ok(0) => Err(invalid(key, raw, "must be greater than zero")),
        Ok(value) => Ok(value),
        Err(err) => Err(invalid(key, raw, err.to_string())),
    }
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}
