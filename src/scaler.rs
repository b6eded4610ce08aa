//! Externally fitted per-column standard scaler.

use std::collections::HashSet;
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::{read_artifact, ArtifactError};

pub const SCALER_FORMAT: &str = "ephemra.standard-scaler";
pub const SCALER_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("invalid scaler: {0}")]
    Invalid(String),
    #[error("scaler expects {expected} feature columns, got {found}")]
    FeatureCountMismatch { expected: usize, found: usize },
}

/// On-disk form of a fitted scaler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub format: String,
    pub format_version: u32,
    pub feature_names: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl ScalerArtifact {
    pub fn new(feature_names: Vec<String>, mean: Vec<f64>, scale: Vec<f64>) -> Self {
        Self {
            format: SCALER_FORMAT.to_string(),
            format_version: SCALER_FORMAT_VERSION,
            feature_names,
            mean,
            scale,
        }
    }
}

/// `(x - mean) / scale` per column. Column order is the order of `feature_names`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureScaler {
    feature_names: Vec<String>,
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl FeatureScaler {
    pub fn new(
        feature_names: Vec<String>,
        mean: Vec<f64>,
        scale: Vec<f64>,
    ) -> Result<Self, ScalerError> {
        if feature_names.is_empty() {
            return Err(ScalerError::Invalid("no feature columns".to_string()));
        }
        if mean.len() != feature_names.len() || scale.len() != feature_names.len() {
            return Err(ScalerError::Invalid(format!(
                "{} feature names but {} means and {} scales",
                feature_names.len(),
                mean.len(),
                scale.len()
            )));
        }
        let mut seen = HashSet::new();
        for name in &feature_names {
            if !seen.insert(name.as_str()) {
                return Err(ScalerError::Invalid(format!(
                    "duplicate feature name {name}"
                )));
            }
        }
        if let Some(idx) = mean.iter().position(|m| !m.is_finite()) {
            return Err(ScalerError::Invalid(format!(
                "mean of {} is not finite",
                feature_names[idx]
            )));
        }
        if let Some(idx) = scale.iter().position(|s| !s.is_finite() || *s == 0.0) {
            return Err(ScalerError::Invalid(format!(
                "scale of {} must be finite and non-zero",
                feature_names[idx]
            )));
        }

        Ok(Self {
            feature_names,
            mean: Array1::from(mean),
            scale: Array1::from(scale),
        })
    }

    /// Pass-through scaler for models trained on raw values.
    pub fn identity(feature_names: Vec<String>) -> Self {
        let n = feature_names.len();
        Self {
            feature_names,
            mean: Array1::zeros(n),
            scale: Array1::ones(n),
        }
    }

    pub fn from_artifact(artifact: ScalerArtifact) -> Result<Self, ScalerError> {
        Self::new(artifact.feature_names, artifact.mean, artifact.scale)
    }

    /// Loads and validates a scaler file; returns the scaler and the file fingerprint.
    pub fn load(path: &Path) -> Result<(Self, String), ArtifactError> {
        let loaded = read_artifact::<ScalerArtifact>(path, SCALER_FORMAT, SCALER_FORMAT_VERSION)?;
        let scaler = Self::from_artifact(loaded.body)
            .map_err(|err| ArtifactError::invalid(path, err.to_string()))?;
        Ok((scaler, loaded.fingerprint))
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn transform(&self, rows: ArrayView2<'_, f64>) -> Result<Array2<f64>, ScalerError> {
        self.check_width(rows)?;
        Ok((&rows - &self.mean.view().insert_axis(Axis(0))) / &self.scale.view().insert_axis(Axis(0)))
    }

    pub fn inverse_transform(&self, rows: ArrayView2<'_, f64>) -> Result<Array2<f64>, ScalerError> {
        self.check_width(rows)?;
        Ok(&rows * &self.scale.view().insert_axis(Axis(0)) + &self.mean.view().insert_axis(Axis(0)))
    }

    /// Maps standard deviations from scaled space back to raw units.
    pub fn inverse_transform_spread(
        &self,
        rows: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, ScalerError> {
        self.check_width(rows)?;
        Ok(&rows * &self.scale.mapv(f64::abs).insert_axis(Axis(0)))
    }

    fn check_width(&self, rows: ArrayView2<'_, f64>) -> Result<(), ScalerError> {
        if rows.ncols() != self.n_features() {
            return Err(ScalerError::FeatureCountMismatch {
                expected: self.n_features(),
                found: rows.ncols(),
            });
        }
        Ok(())
    }
}
