//! Autoregressive horizon drivers and timestamped result assembly.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use thiserror::Error;
use tracing::debug;

use crate::model::{CancelFlag, ChunkPredictor, PredictError, SequencePredictor};
use crate::scaler::{FeatureScaler, ScalerError};

/// Added to the softplus of the raw sigma channel so spreads stay positive.
pub const SIGMA_EPS: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error(transparent)]
    Predict(#[from] PredictError),
    #[error(transparent)]
    Scaler(#[from] ScalerError),
    #[error("predictor architecture is invalid: {0}")]
    Architecture(String),
    #[error("predictor returned shape {found:?}, expected {expected:?}")]
    OutputShape {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("forecast value at step {step}, column {column} is not finite")]
    NonFinite { step: usize, column: usize },
    #[error("forecast timestamp overflow at step {0}")]
    TimestampOverflow(usize),
}

/// Scaled output of the chunked driver.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedForecast {
    /// `(horizon, n_features)` mean channel.
    pub mean: Array2<f64>,
    /// `(horizon, n_features)` standard deviation, `softplus(raw) + SIGMA_EPS`.
    pub sigma: Array2<f64>,
    pub inference_calls: usize,
}

/// Runs the predictor `horizon / chunk` times, sliding the window forward by
/// the predicted means after each call.
pub fn forecast_chunked(
    predictor: &dyn ChunkPredictor,
    window: ArrayView2<'_, f64>,
    cancel: &CancelFlag,
) -> Result<ChunkedForecast, ForecastError> {
    let arch = predictor.architecture();
    arch.validate()
        .map_err(|err| ForecastError::Architecture(err.to_string()))?;
    if window.dim() != (arch.lookback, arch.n_features) {
        return Err(PredictError::InputShape {
            expected: (arch.lookback, arch.n_features),
            found: window.dim(),
        }
        .into());
    }

    let mut current = window.to_owned();
    let mut mean = Array2::zeros((arch.horizon, arch.n_features));
    let mut sigma = Array2::zeros((arch.horizon, arch.n_features));
    let mut inference_calls = 0;

    for chunk_idx in 0..arch.chunk_count() {
        if cancel.is_cancelled() {
            return Err(PredictError::Cancelled.into());
        }

        let out = predictor.predict_chunk(current.view())?;
        inference_calls += 1;
        if out.dim() != (arch.chunk, arch.n_features, 2) {
            return Err(ForecastError::OutputShape {
                expected: vec![arch.chunk, arch.n_features, 2],
                found: out.shape().to_vec(),
            });
        }

        let mu = out.index_axis(Axis(2), 0);
        let raw_sigma = out.index_axis(Axis(2), 1);
        let rows = chunk_idx * arch.chunk..(chunk_idx + 1) * arch.chunk;
        mean.slice_mut(s![rows.clone(), ..]).assign(&mu);
        sigma
            .slice_mut(s![rows, ..])
            .assign(&raw_sigma.mapv(|raw| softplus(raw) + SIGMA_EPS));

        // Only the mean channel is fed back into the next window.
        current = concatenate(Axis(0), &[current.slice(s![arch.chunk.., ..]), mu]).map_err(
            |_| ForecastError::OutputShape {
                expected: vec![arch.lookback, arch.n_features],
                found: current.shape().to_vec(),
            },
        )?;

        debug!(
            component = "forecast",
            event = "forecast.chunk",
            chunk = chunk_idx,
            chunk_count = arch.chunk_count()
        );
    }

    Ok(ChunkedForecast {
        mean,
        sigma,
        inference_calls,
    })
}

/// Runs a single whole-horizon prediction and checks its shape.
pub fn forecast_sequence(
    predictor: &dyn SequencePredictor,
    window: ArrayView2<'_, f64>,
    cancel: &CancelFlag,
) -> Result<Array2<f64>, ForecastError> {
    let arch = predictor.architecture();
    arch.validate()
        .map_err(|err| ForecastError::Architecture(err.to_string()))?;
    if window.dim() != (arch.seq_len, arch.n_features) {
        return Err(PredictError::InputShape {
            expected: (arch.seq_len, arch.n_features),
            found: window.dim(),
        }
        .into());
    }

    let out = predictor.predict_sequence(window, cancel)?;
    if out.dim() != (arch.pred_len, arch.n_features) {
        return Err(ForecastError::OutputShape {
            expected: vec![arch.pred_len, arch.n_features],
            found: out.shape().to_vec(),
        });
    }
    Ok(out)
}

/// Forecast in raw units with one timestamp per row.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledForecast {
    pub feature_names: Vec<String>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub values: Array2<f64>,
    pub uncertainty: Option<Array2<f64>>,
}

impl AssembledForecast {
    pub fn steps(&self) -> usize {
        self.timestamps.len()
    }
}

pub fn assemble_forecast(
    scaled: ArrayView2<'_, f64>,
    scaled_sigma: Option<ArrayView2<'_, f64>>,
    scaler: &FeatureScaler,
    last_observed: DateTime<Utc>,
    interval: ChronoDuration,
) -> Result<AssembledForecast, ForecastError> {
    let values = scaler.inverse_transform(scaled)?;
    ensure_finite(&values)?;

    let uncertainty = match scaled_sigma {
        Some(sigma) => {
            let spread = scaler.inverse_transform_spread(sigma)?;
            ensure_finite(&spread)?;
            Some(spread)
        }
        None => None,
    };

    let timestamps = forecast_timestamps(last_observed, interval, values.nrows())?;

    Ok(AssembledForecast {
        feature_names: scaler.feature_names().to_vec(),
        timestamps,
        values,
        uncertainty,
    })
}

/// `last + interval * i` for `i` in `1..=steps`.
pub fn forecast_timestamps(
    last_observed: DateTime<Utc>,
    interval: ChronoDuration,
    steps: usize,
) -> Result<Vec<DateTime<Utc>>, ForecastError> {
    let interval_us = interval
        .num_microseconds()
        .ok_or(ForecastError::TimestampOverflow(0))?;

    (1..=steps)
        .map(|step| {
            interval_us
                .checked_mul(step as i64)
                .and_then(|offset| {
                    last_observed.checked_add_signed(ChronoDuration::microseconds(offset))
                })
                .ok_or(ForecastError::TimestampOverflow(step))
        })
        .collect()
}

fn ensure_finite(values: &Array2<f64>) -> Result<(), ForecastError> {
    match values.indexed_iter().find(|(_, v)| !v.is_finite()) {
        Some(((step, column), _)) => Err(ForecastError::NonFinite { step, column }),
        None => Ok(()),
    }
}

fn softplus(x: f64) -> f64 {
    if x > 20.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}
