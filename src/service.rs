//! HTTP surface: loaded models, the bounded inference pool and axum routes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::artifact::ArtifactError;
use crate::config::{ServiceConfig, ServiceLimits};
use crate::forecast::{
    assemble_forecast, forecast_chunked, forecast_sequence, forecast_timestamps,
    AssembledForecast, ForecastError,
};
use crate::model::{
    CancelFlag, ChunkMlp, ChunkPredictor, EncoderGru, ModelError, ModelInfo, SequencePredictor,
};
use crate::preprocess::{preprocess_geo, GeoPreprocessConfig, PreprocessError};
use crate::scaler::{FeatureScaler, ScalerError};
use crate::table::{RawCsv, TableError, TimeSeriesTable, DEFAULT_TIMESTAMP_COLUMN};

/// Multipart field that carries the uploaded CSV.
pub const UPLOAD_FIELD: &str = "file";
pub const DEFAULT_GEO_MODEL_NAME: &str = "GEO Phase-2 Transformer";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("Inference did not finish within {} ms", .0.as_millis())]
    Timeout(Duration),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TableError> for ApiError {
    fn from(err: TableError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<PreprocessError> for ApiError {
    fn from(err: PreprocessError) -> Self {
        match err {
            PreprocessError::InvalidConfig(_) => Self::Internal(err.to_string()),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<ForecastError> for ApiError {
    fn from(err: ForecastError) -> Self {
        Self::Internal(format!("Inference failed: {err}"))
    }
}

impl From<ScalerError> for ApiError {
    fn from(err: ScalerError) -> Self {
        ForecastError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.to_string();
        if status.is_server_error() {
            error!(
                component = "forecast_server",
                event = "http.predict.rejected",
                status = status.as_u16(),
                detail = %detail
            );
        } else {
            warn!(
                component = "forecast_server",
                event = "http.predict.rejected",
                status = status.as_u16(),
                detail = %detail
            );
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Runs CPU-bound forecast jobs on the blocking pool, at most `max_concurrent`
/// at a time, each bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct InferencePool {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl InferencePool {
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    /// On timeout the job's cancel flag is raised and `ApiError::Timeout` is
    /// returned at once; the job keeps its permit until it observes the flag.
    pub async fn run<T, F>(&self, job: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&CancelFlag) -> Result<T, ApiError> + Send + 'static,
    {
        let cancel = CancelFlag::new();
        let job_cancel = cancel.clone();
        let permits = Arc::clone(&self.permits);

        let task = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ApiError::Internal("inference pool is closed".to_string()))?;
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job(&job_cancel)
            });
            match handle.await {
                Ok(result) => result,
                Err(err) => Err(ApiError::Internal(format!("inference task failed: {err}"))),
            }
        };

        match tokio::time::timeout(self.timeout, task).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                warn!(
                    component = "forecast_server",
                    event = "inference.timeout",
                    timeout_ms = self.timeout.as_millis() as u64
                );
                Err(ApiError::Timeout(self.timeout))
            }
        }
    }
}

/// One forecast row; serializes as `{"utc_time": ..., <feature>: value, ...}`
/// with features in model column order.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRecord {
    pub utc_time: DateTime<Utc>,
    pub feature_names: Arc<[String]>,
    pub values: Vec<f64>,
}

impl Serialize for ForecastRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 1))?;
        map.serialize_entry(DEFAULT_TIMESTAMP_COLUMN, &format_utc(self.utc_time))?;
        for (name, value) in self.feature_names.iter().zip(&self.values) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeoForecastResponse {
    pub model: String,
    pub forecast_steps: usize,
    pub prediction: Vec<ForecastRecord>,
    pub uncertainty: Vec<ForecastRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeoForecastResponse {
    pub prediction: Vec<Vec<f64>>,
    pub timestamps: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    #[serde(flatten)]
    pub info: ModelInfo,
    pub lookback: usize,
    pub horizon: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<usize>,
    pub feature_names: Vec<String>,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scaler_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelCatalog {
    pub geo: ModelDescriptor,
    pub meo: ModelDescriptor,
}

/// Chunked GEO predictor with its external scaler and cleaning parameters.
pub struct GeoModel {
    predictor: Arc<dyn ChunkPredictor>,
    scaler: FeatureScaler,
    info: ModelInfo,
    model_fingerprint: String,
    scaler_fingerprint: String,
    preprocess: GeoPreprocessConfig,
}

impl GeoModel {
    pub fn new(
        predictor: Arc<dyn ChunkPredictor>,
        scaler: FeatureScaler,
        info: ModelInfo,
        model_fingerprint: String,
        scaler_fingerprint: String,
    ) -> Result<Self, ModelError> {
        let arch = predictor.architecture();
        arch.validate()?;
        if arch.n_features != scaler.n_features() {
            return Err(ModelError::Invalid(format!(
                "model expects {} features but scaler has {}",
                arch.n_features,
                scaler.n_features()
            )));
        }

        Ok(Self {
            predictor,
            scaler,
            info,
            model_fingerprint,
            scaler_fingerprint,
            preprocess: GeoPreprocessConfig::default(),
        })
    }

    pub fn load(
        model_path: &std::path::Path,
        scaler_path: &std::path::Path,
    ) -> Result<Self, ArtifactError> {
        let (model, model_fingerprint) = ChunkMlp::load(model_path)?;
        let (scaler, scaler_fingerprint) = FeatureScaler::load(scaler_path)?;
        let info = model.info().clone();
        Self::new(
            Arc::new(model),
            scaler,
            info,
            model_fingerprint,
            scaler_fingerprint,
        )
        .map_err(|err| ArtifactError::invalid(scaler_path, err.to_string()))
    }

    pub fn with_preprocess(mut self, preprocess: GeoPreprocessConfig) -> Self {
        self.preprocess = preprocess;
        self
    }

    pub fn descriptor(&self) -> ModelDescriptor {
        let arch = self.predictor.architecture();
        ModelDescriptor {
            info: self.info.clone(),
            lookback: arch.lookback,
            horizon: arch.horizon,
            chunk: Some(arch.chunk),
            feature_names: self.scaler.feature_names().to_vec(),
            fingerprint: self.model_fingerprint.clone(),
            scaler_fingerprint: Some(self.scaler_fingerprint.clone()),
        }
    }

    /// Parse, clean, scale, forecast and inverse-scale one uploaded CSV.
    pub fn forecast(&self, csv: &[u8], cancel: &CancelFlag) -> Result<GeoForecastResponse, ApiError> {
        let raw = RawCsv::parse(csv)?;
        let table =
            TimeSeriesTable::from_csv_exact(&raw, DEFAULT_TIMESTAMP_COLUMN, self.scaler.feature_names())?;
        let (clean, report) = preprocess_geo(&table, &self.preprocess)?;

        let arch = self.predictor.architecture();
        let last_observed = match clean.last_timestamp() {
            Some(ts) if clean.len() >= arch.lookback => ts,
            _ => {
                return Err(ApiError::BadRequest(format!(
                    "Minimum {} timesteps required",
                    arch.lookback
                )))
            }
        };

        let interval = ChronoDuration::seconds(self.preprocess.resample_interval_secs);
        ensure_horizon_fits(last_observed, interval, arch.horizon)?;

        let window = clean.tail_matrix(arch.lookback);
        let scaled = self.scaler.transform(window.view())?;
        let forecast = forecast_chunked(self.predictor.as_ref(), scaled.view(), cancel)?;
        let assembled = assemble_forecast(
            forecast.mean.view(),
            Some(forecast.sigma.view()),
            &self.scaler,
            last_observed,
            interval,
        )?;

        info!(
            component = "forecast",
            event = "forecast.finish",
            model = "geo",
            input_rows = report.input_rows,
            window_rows = arch.lookback,
            inference_calls = forecast.inference_calls,
            forecast_steps = assembled.steps()
        );

        let model = if self.info.model_name.is_empty() {
            DEFAULT_GEO_MODEL_NAME.to_string()
        } else {
            self.info.model_name.clone()
        };
        Ok(GeoForecastResponse {
            model,
            forecast_steps: assembled.steps(),
            prediction: records(&assembled, &assembled.values),
            uncertainty: assembled
                .uncertainty
                .as_ref()
                .map(|spread| records(&assembled, spread))
                .unwrap_or_default(),
        })
    }
}

/// Recurrent MEO predictor; its scaler comes from the artifact itself.
pub struct MeoModel {
    predictor: Arc<dyn SequencePredictor>,
    scaler: FeatureScaler,
    info: ModelInfo,
    model_fingerprint: String,
}

impl MeoModel {
    pub fn new(
        predictor: Arc<dyn SequencePredictor>,
        scaler: FeatureScaler,
        info: ModelInfo,
        model_fingerprint: String,
    ) -> Result<Self, ModelError> {
        let arch = predictor.architecture();
        arch.validate()?;
        if arch.n_features != scaler.n_features() {
            return Err(ModelError::Invalid(format!(
                "model expects {} features but scaler has {}",
                arch.n_features,
                scaler.n_features()
            )));
        }

        Ok(Self {
            predictor,
            scaler,
            info,
            model_fingerprint,
        })
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ArtifactError> {
        let (model, fingerprint) = EncoderGru::load(path)?;
        let scaler = model.scaler().clone();
        let info = model.info().clone();
        Self::new(Arc::new(model), scaler, info, fingerprint)
            .map_err(|err| ArtifactError::invalid(path, err.to_string()))
    }

    pub fn descriptor(&self) -> ModelDescriptor {
        let arch = self.predictor.architecture();
        ModelDescriptor {
            info: self.info.clone(),
            lookback: arch.seq_len,
            horizon: arch.pred_len,
            chunk: None,
            feature_names: self.scaler.feature_names().to_vec(),
            fingerprint: self.model_fingerprint.clone(),
            scaler_fingerprint: None,
        }
    }

    /// Forecast from the last `seq_len` raw rows; the step between the last two
    /// timestamps becomes the output spacing.
    pub fn forecast(&self, csv: &[u8], cancel: &CancelFlag) -> Result<MeoForecastResponse, ApiError> {
        let raw = RawCsv::parse(csv)?;
        raw.require_column(DEFAULT_TIMESTAMP_COLUMN)?;
        for name in self.scaler.feature_names() {
            raw.require_column(name)?;
        }
        let table = TimeSeriesTable::from_csv_columns(
            &raw,
            DEFAULT_TIMESTAMP_COLUMN,
            self.scaler.feature_names(),
        )?;

        let arch = self.predictor.architecture();
        let found = table.len();
        if found < arch.seq_len {
            return Err(ApiError::BadRequest(format!(
                "Need at least {} rows of data (found {found})",
                arch.seq_len
            )));
        }
        if found < 2 {
            return Err(ApiError::BadRequest(
                "Need at least two rows to infer sampling interval".to_string(),
            ));
        }

        let stamps = table.timestamps();
        let last_observed = stamps[found - 1];
        let interval = last_observed - stamps[found - 2];
        if interval <= ChronoDuration::zero() {
            return Err(ApiError::BadRequest(format!(
                "Invalid time ordering in {DEFAULT_TIMESTAMP_COLUMN} column"
            )));
        }

        ensure_horizon_fits(last_observed, interval, arch.pred_len)?;

        let window = table.tail_matrix(arch.seq_len);
        if let Some(((_, col), _)) = window.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(ApiError::BadRequest(format!(
                "Column {} has a missing or non-numeric value in the last {} rows",
                self.scaler.feature_names()[col],
                arch.seq_len
            )));
        }

        let scaled = self.scaler.transform(window.view())?;
        let out = forecast_sequence(self.predictor.as_ref(), scaled.view(), cancel)?;
        let assembled = assemble_forecast(out.view(), None, &self.scaler, last_observed, interval)?;

        info!(
            component = "forecast",
            event = "forecast.finish",
            model = "meo",
            input_rows = found,
            window_rows = arch.seq_len,
            interval_secs = interval.num_seconds(),
            forecast_steps = assembled.steps()
        );

        Ok(MeoForecastResponse {
            prediction: assembled
                .values
                .rows()
                .into_iter()
                .map(|row| row.to_vec())
                .collect(),
            timestamps: assembled.timestamps.iter().copied().map(format_utc).collect(),
        })
    }
}

/// Process-wide forecasting state shared by every request.
pub struct ForecastService {
    geo: Arc<GeoModel>,
    meo: Arc<MeoModel>,
    pool: InferencePool,
    limits: ServiceLimits,
}

impl ForecastService {
    pub fn new(geo: GeoModel, meo: MeoModel, limits: ServiceLimits) -> Self {
        Self {
            geo: Arc::new(geo),
            meo: Arc::new(meo),
            pool: InferencePool::new(limits.max_concurrent_inferences, limits.inference_timeout),
            limits,
        }
    }

    /// Loads every artifact named in `config`; any failure is fatal to startup.
    pub fn load(config: &ServiceConfig) -> Result<Self, ArtifactError> {
        let geo = GeoModel::load(&config.geo_model_path, &config.geo_scaler_path)?;
        let meo = MeoModel::load(&config.meo_model_path)?;
        let service = Self::new(geo, meo, config.limits);

        let catalog = service.catalog();
        info!(
            component = "forecast_server",
            event = "models.loaded",
            geo_model = %catalog.geo.info.model_name,
            geo_fingerprint = %catalog.geo.fingerprint,
            meo_model = %catalog.meo.info.model_name,
            meo_fingerprint = %catalog.meo.fingerprint,
            max_concurrent_inferences = config.limits.max_concurrent_inferences,
            inference_timeout_ms = config.limits.inference_timeout.as_millis() as u64
        );

        Ok(service)
    }

    pub fn limits(&self) -> ServiceLimits {
        self.limits
    }

    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog {
            geo: self.geo.descriptor(),
            meo: self.meo.descriptor(),
        }
    }

    pub async fn forecast_geo(&self, csv: Vec<u8>) -> Result<GeoForecastResponse, ApiError> {
        let model = Arc::clone(&self.geo);
        self.pool.run(move |cancel| model.forecast(&csv, cancel)).await
    }

    pub async fn forecast_meo(&self, csv: Vec<u8>) -> Result<MeoForecastResponse, ApiError> {
        let model = Arc::clone(&self.meo);
        self.pool.run(move |cancel| model.forecast(&csv, cancel)).await
    }
}

pub fn forecast_router(service: Arc<ForecastService>) -> Router {
    let max_upload_bytes = service.limits().max_upload_bytes;
    Router::new()
        .route("/", get(get_root))
        .route("/models", get(get_models))
        .route("/predict/geo", post(post_predict_geo))
        .route("/predict/meo", post(post_predict_meo))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(ForecastAppState { service })
}

#[derive(Clone)]
struct ForecastAppState {
    service: Arc<ForecastService>,
}

async fn get_root() -> impl IntoResponse {
    Json(json!({ "message": "Backend is running!" }))
}

async fn get_models(State(state): State<ForecastAppState>) -> impl IntoResponse {
    Json(state.service.catalog())
}

async fn post_predict_geo(
    State(state): State<ForecastAppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<GeoForecastResponse>, ApiError> {
    let started = Instant::now();
    let csv = read_upload(multipart).await?;
    log_request("/predict/geo", csv.len());

    let response = state.service.forecast_geo(csv).await?;
    log_finish("/predict/geo", response.forecast_steps, started);
    Ok(Json(response))
}

async fn post_predict_meo(
    State(state): State<ForecastAppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<MeoForecastResponse>, ApiError> {
    let started = Instant::now();
    let csv = read_upload(multipart).await?;
    log_request("/predict/meo", csv.len());

    let response = state.service.forecast_meo(csv).await?;
    log_finish("/predict/meo", response.prediction.len(), started);
    Ok(Json(response))
}

/// Returns the bytes of the first `file` field.
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Vec<u8>, ApiError> {
    let mut multipart =
        multipart.map_err(|err| ApiError::BadRequest(format!("Invalid upload: {}", err.body_text())))?;

    loop {
        let field = multipart.next_field().await.map_err(upload_error)?;
        let Some(field) = field else {
            return Err(ApiError::BadRequest(format!(
                "Upload must include a '{UPLOAD_FIELD}' file field"
            )));
        };
        if field.name() == Some(UPLOAD_FIELD) {
            let bytes = field.bytes().await.map_err(upload_error)?;
            return Ok(bytes.to_vec());
        }
    }
}

fn upload_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(format!("Upload too large: {}", err.body_text()))
    } else {
        ApiError::BadRequest(format!("Invalid upload: {}", err.body_text()))
    }
}

fn log_request(route: &'static str, upload_bytes: usize) {
    info!(
        component = "forecast_server",
        event = "http.predict.request",
        route,
        upload_bytes
    );
}

fn log_finish(route: &'static str, forecast_steps: usize, started: Instant) {
    info!(
        component = "forecast_server",
        event = "http.predict.finish",
        route,
        forecast_steps,
        elapsed_ms = started.elapsed().as_millis() as u64
    );
}

fn records(assembled: &AssembledForecast, rows: &ndarray::Array2<f64>) -> Vec<ForecastRecord> {
    let names: Arc<[String]> = assembled.feature_names.clone().into();
    assembled
        .timestamps
        .iter()
        .zip(rows.rows())
        .map(|(ts, row)| ForecastRecord {
            utc_time: *ts,
            feature_names: Arc::clone(&names),
            values: row.to_vec(),
        })
        .collect()
}

/// Whole seconds print as `...:05Z`; sub-second instants keep their fraction.
fn format_utc(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// The upload fixes both the anchor and the step, so an unrepresentable
/// horizon is a client error caught before any inference runs.
fn ensure_horizon_fits(
    last_observed: DateTime<Utc>,
    interval: ChronoDuration,
    steps: usize,
) -> Result<(), ApiError> {
    forecast_timestamps(last_observed, interval, steps)
        .map(|_| ())
        .map_err(|_| {
            ApiError::BadRequest(format!(
                "Forecast horizon of {steps} steps from {} does not fit the supported date range",
                format_utc(last_observed)
            ))
        })
}
