//! Ephemra core crate.
//!
//! Forecasts GNSS orbit and clock error for GEO and MEO satellites:
//! - CSV ingestion into a time-indexed feature table
//! - GEO cleaning chain (15-minute resample, Hampel filter, winsorization)
//! - external and bundled standard scalers
//! - chunked and recurrent predictors loaded from versioned JSON artifacts
//! - the axum service exposing both forecasts

mod artifact;
mod config;
mod forecast;
mod model;
mod observability;
mod preprocess;
mod scaler;
mod service;
mod table;

pub use artifact::{read_artifact, write_artifact, ArtifactError, ArtifactHeader, LoadedArtifact};
pub use config::{
    service_config_from_env, ConfigError, ServiceConfig, ServiceLimits, DEFAULT_BIND_ADDR,
    DEFAULT_GEO_MODEL_PATH, DEFAULT_GEO_SCALER_PATH, DEFAULT_INFERENCE_TIMEOUT_MS,
    DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_MEO_MODEL_PATH,
};
pub use forecast::{
    assemble_forecast, forecast_chunked, forecast_sequence, forecast_timestamps,
    AssembledForecast, ChunkedForecast, ForecastError, SIGMA_EPS,
};
pub use model::{
    Activation, CancelFlag, ChunkArchitecture, ChunkMlp, ChunkModelArtifact, ChunkPredictor,
    DenseLayer, DenseLayerArtifact, EncoderGru, GruArtifact, ModelError, ModelInfo, PredictError,
    ScalerParams, SequenceArchitecture, SequenceModelArtifact, SequencePredictor,
    CHUNK_MODEL_FORMAT, MODEL_FORMAT_VERSION, SEQUENCE_MODEL_FORMAT,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, logging_config_from_env, LogFormat, LoggingConfig,
    LoggingInitError, LOG_FORMAT_VAR, LOG_LEVEL_VAR, LOG_TARGET_VAR,
};
pub use preprocess::{
    hampel_filter, preprocess_geo, quantile_linear, resample_and_impute, rolling_median_centered,
    winsorize, GeoPreprocessConfig, PreprocessError, PreprocessReport,
    DEFAULT_HAMPEL_N_SIGMAS, DEFAULT_HAMPEL_WINDOW, DEFAULT_MAX_RESAMPLED_ROWS,
    DEFAULT_RESAMPLE_INTERVAL_SECS, DEFAULT_WINSOR_LIMIT,
};
pub use scaler::{FeatureScaler, ScalerArtifact, ScalerError, SCALER_FORMAT, SCALER_FORMAT_VERSION};
pub use service::{
    forecast_router, ApiError, ForecastRecord, ForecastService, GeoForecastResponse, GeoModel,
    InferencePool, MeoForecastResponse, MeoModel, ModelCatalog, ModelDescriptor,
    DEFAULT_GEO_MODEL_NAME, UPLOAD_FIELD,
};
pub use table::{parse_utc_timestamp, RawCsv, TableError, TimeSeriesTable, DEFAULT_TIMESTAMP_COLUMN};
