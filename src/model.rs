//! Trained predictors: artifact formats, load-time validation and forward passes.
//!
//! Two predictor seams exist. [`ChunkPredictor`] emits a block of future steps
//! with mean and raw-sigma channels per feature (GEO); [`SequencePredictor`]
//! emits the whole horizon in one call, unrolling its own recurrent decoder
//! (MEO).

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::{read_artifact, ArtifactError};
use crate::scaler::FeatureScaler;

pub const CHUNK_MODEL_FORMAT: &str = "ephemra.chunk-mlp";
pub const SEQUENCE_MODEL_FORMAT: &str = "ephemra.encoder-gru";
pub const MODEL_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid model artifact: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("input window has shape {found:?}, expected {expected:?}")]
    InputShape {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("predictor output could not be reshaped: {0}")]
    OutputShape(String),
    #[error("inference cancelled")]
    Cancelled,
}

/// Shared flag a running inference polls between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Descriptive metadata carried by an artifact and served by `/models`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelInfo {
    pub model_name: String,
    pub version: String,
    pub model_type: String,
    pub trained_on: String,
    pub dataset: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Tanh,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Self::Linear => x,
            Self::Relu => x.max(0.0),
            Self::Tanh => x.tanh(),
        }
    }
}

/// Dense layer weights as stored on disk; `weight` is `(out, in)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayerArtifact {
    pub weight: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    #[serde(default)]
    pub activation: Activation,
}

#[derive(Debug, Clone)]
pub struct DenseLayer {
    weight: Array2<f64>,
    bias: Array1<f64>,
    activation: Activation,
}

impl DenseLayer {
    fn from_artifact(layer: &DenseLayerArtifact, name: &str) -> Result<Self, ModelError> {
        let weight = matrix_from_rows(&layer.weight, name)?;
        if layer.bias.len() != weight.nrows() {
            return Err(ModelError::Invalid(format!(
                "{name}: bias length {} does not match {} output units",
                layer.bias.len(),
                weight.nrows()
            )));
        }
        Ok(Self {
            weight,
            bias: Array1::from(layer.bias.clone()),
            activation: layer.activation,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        let activation = self.activation;
        let mut out = self.weight.dot(&x) + &self.bias;
        out.mapv_inplace(|v| activation.apply(v));
        out
    }

    /// Applies the layer to every row of `(rows, in)`.
    pub fn forward_rows(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let activation = self.activation;
        let mut out = x.dot(&self.weight.t()) + &self.bias;
        out.mapv_inplace(|v| activation.apply(v));
        out
    }

    fn expect_shape(&self, name: &str, output: usize, input: usize) -> Result<(), ModelError> {
        if self.output_dim() != output || self.input_dim() != input {
            return Err(ModelError::Invalid(format!(
                "{name}: weight shape ({}, {}), expected ({output}, {input})",
                self.output_dim(),
                self.input_dim()
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Chunked multi-step predictor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkArchitecture {
    pub lookback: usize,
    pub horizon: usize,
    pub chunk: usize,
    pub n_features: usize,
}

impl ChunkArchitecture {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.lookback == 0 || self.horizon == 0 || self.chunk == 0 || self.n_features == 0 {
            return Err(ModelError::Invalid(format!(
                "lookback, horizon, chunk and n_features must be > 0, got {self:?}"
            )));
        }
        if self.horizon % self.chunk != 0 {
            return Err(ModelError::Invalid(format!(
                "horizon {} is not a multiple of chunk {}",
                self.horizon, self.chunk
            )));
        }
        if self.chunk > self.lookback {
            return Err(ModelError::Invalid(format!(
                "chunk {} exceeds lookback {}",
                self.chunk, self.lookback
            )));
        }
        Ok(())
    }

    pub fn chunk_count(&self) -> usize {
        self.horizon / self.chunk
    }
}

pub trait ChunkPredictor: Send + Sync + 'static {
    fn architecture(&self) -> ChunkArchitecture;

    /// Predicts the next `chunk` steps from a `(lookback, n_features)` window.
    ///
    /// Output shape is `(chunk, n_features, 2)`: channel 0 is the mean,
    /// channel 1 the raw (pre-softplus) sigma.
    fn predict_chunk(&self, window: ArrayView2<'_, f64>) -> Result<Array3<f64>, PredictError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkModelArtifact {
    pub format: String,
    pub format_version: u32,
    #[serde(default)]
    pub info: ModelInfo,
    pub architecture: ChunkArchitecture,
    pub layers: Vec<DenseLayerArtifact>,
}

impl ChunkModelArtifact {
    /// Single linear layer repeating the last observed row for every step,
    /// with zero raw sigma. Serves as a reference baseline.
    pub fn persistence(architecture: ChunkArchitecture, info: ModelInfo) -> Self {
        let n = architecture.n_features;
        let inputs = architecture.lookback * n;
        let outputs = architecture.chunk * n * 2;
        let mut weight = vec![vec![0.0; inputs]; outputs];
        for step in 0..architecture.chunk {
            for feature in 0..n {
                let out_idx = (step * n + feature) * 2;
                let in_idx = (architecture.lookback - 1) * n + feature;
                weight[out_idx][in_idx] = 1.0;
            }
        }

        Self {
            format: CHUNK_MODEL_FORMAT.to_string(),
            format_version: MODEL_FORMAT_VERSION,
            info,
            architecture,
            layers: vec![DenseLayerArtifact {
                weight,
                bias: vec![0.0; outputs],
                activation: Activation::Linear,
            }],
        }
    }
}

/// Feed-forward network over the flattened lookback window.
#[derive(Debug, Clone)]
pub struct ChunkMlp {
    info: ModelInfo,
    architecture: ChunkArchitecture,
    layers: Vec<DenseLayer>,
}

impl ChunkMlp {
    pub fn from_artifact(artifact: &ChunkModelArtifact) -> Result<Self, ModelError> {
        let architecture = artifact.architecture;
        architecture.validate()?;
        if artifact.layers.is_empty() {
            return Err(ModelError::Invalid("model has no layers".to_string()));
        }

        let layers = artifact
            .layers
            .iter()
            .enumerate()
            .map(|(idx, layer)| DenseLayer::from_artifact(layer, &format!("layers[{idx}]")))
            .collect::<Result<Vec<_>, _>>()?;

        let mut width = architecture.lookback * architecture.n_features;
        for (idx, layer) in layers.iter().enumerate() {
            if layer.input_dim() != width {
                return Err(ModelError::Invalid(format!(
                    "layers[{idx}] expects {} inputs, previous width is {width}",
                    layer.input_dim()
                )));
            }
            width = layer.output_dim();
        }
        let expected_out = architecture.chunk * architecture.n_features * 2;
        if width != expected_out {
            return Err(ModelError::Invalid(format!(
                "final layer emits {width} values, expected chunk * n_features * 2 = {expected_out}"
            )));
        }

        Ok(Self {
            info: artifact.info.clone(),
            architecture,
            layers,
        })
    }

    pub fn load(path: &Path) -> Result<(Self, String), ArtifactError> {
        let loaded = read_artifact::<ChunkModelArtifact>(
            path,
            CHUNK_MODEL_FORMAT,
            MODEL_FORMAT_VERSION,
        )?;
        let model = Self::from_artifact(&loaded.body)
            .map_err(|err| ArtifactError::invalid(path, err.to_string()))?;
        Ok((model, loaded.fingerprint))
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }
}

impl ChunkPredictor for ChunkMlp {
    fn architecture(&self) -> ChunkArchitecture {
        self.architecture
    }

    fn predict_chunk(&self, window: ArrayView2<'_, f64>) -> Result<Array3<f64>, PredictError> {
        let arch = self.architecture;
        check_window(window, arch.lookback, arch.n_features)?;

        let mut activations: Array1<f64> = window.iter().copied().collect();
        for layer in &self.layers {
            activations = layer.forward(activations.view());
        }

        activations
            .into_shape_with_order((arch.chunk, arch.n_features, 2))
            .map_err(|err| PredictError::OutputShape(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Encoder + recurrent decoder predictor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceArchitecture {
    pub seq_len: usize,
    pub pred_len: usize,
    pub n_features: usize,
    pub d_model: usize,
}

impl SequenceArchitecture {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.seq_len < 2 {
            return Err(ModelError::Invalid(format!(
                "seq_len must be >= 2 to infer a sampling interval, got {}",
                self.seq_len
            )));
        }
        if self.pred_len == 0 || self.n_features == 0 || self.d_model == 0 {
            return Err(ModelError::Invalid(format!(
                "pred_len, n_features and d_model must be > 0, got {self:?}"
            )));
        }
        Ok(())
    }
}

pub trait SequencePredictor: Send + Sync + 'static {
    fn architecture(&self) -> SequenceArchitecture;

    /// Predicts `(pred_len, n_features)` from a `(seq_len, n_features)` window.
    fn predict_sequence(
        &self,
        window: ArrayView2<'_, f64>,
        cancel: &CancelFlag,
    ) -> Result<Array2<f64>, PredictError>;
}

/// PyTorch-layout GRU weights; gate blocks are ordered reset, update, new.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GruArtifact {
    pub weight_ih: Vec<Vec<f64>>,
    pub weight_hh: Vec<Vec<f64>>,
    pub bias_ih: Vec<f64>,
    pub bias_hh: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceModelArtifact {
    pub format: String,
    pub format_version: u32,
    #[serde(default)]
    pub info: ModelInfo,
    pub architecture: SequenceArchitecture,
    pub feature_names: Vec<String>,
    pub input_proj: DenseLayerArtifact,
    #[serde(default)]
    pub encoder: Vec<DenseLayerArtifact>,
    pub gru: GruArtifact,
    pub output_layer: DenseLayerArtifact,
    #[serde(default)]
    pub scaler: Option<ScalerParams>,
}

#[derive(Debug, Clone)]
struct GruCell {
    weight_ih: Array2<f64>,
    weight_hh: Array2<f64>,
    bias_ih: Array1<f64>,
    bias_hh: Array1<f64>,
    hidden: usize,
}

impl GruCell {
    fn from_artifact(gru: &GruArtifact, hidden: usize) -> Result<Self, ModelError> {
        let weight_ih = matrix_from_rows(&gru.weight_ih, "gru.weight_ih")?;
        let weight_hh = matrix_from_rows(&gru.weight_hh, "gru.weight_hh")?;
        for (name, matrix) in [("gru.weight_ih", &weight_ih), ("gru.weight_hh", &weight_hh)] {
            if matrix.dim() != (3 * hidden, hidden) {
                return Err(ModelError::Invalid(format!(
                    "{name}: shape {:?}, expected ({}, {hidden})",
                    matrix.dim(),
                    3 * hidden
                )));
            }
        }
        for (name, bias) in [("gru.bias_ih", &gru.bias_ih), ("gru.bias_hh", &gru.bias_hh)] {
            if bias.len() != 3 * hidden {
                return Err(ModelError::Invalid(format!(
                    "{name}: length {}, expected {}",
                    bias.len(),
                    3 * hidden
                )));
            }
        }

        Ok(Self {
            weight_ih,
            weight_hh,
            bias_ih: Array1::from(gru.bias_ih.clone()),
            bias_hh: Array1::from(gru.bias_hh.clone()),
            hidden,
        })
    }

    fn step(&self, x: ArrayView1<'_, f64>, h: ArrayView1<'_, f64>) -> Array1<f64> {
        let d = self.hidden;
        let gi = self.weight_ih.dot(&x) + &self.bias_ih;
        let gh = self.weight_hh.dot(&h) + &self.bias_hh;

        Array1::from_shape_fn(d, |j| {
            let reset = sigmoid(gi[j] + gh[j]);
            let update = sigmoid(gi[d + j] + gh[d + j]);
            let candidate = (gi[2 * d + j] + reset * gh[2 * d + j]).tanh();
            (1.0 - update) * candidate + update * h[j]
        })
    }
}

/// Encodes the lookback window once, then unrolls a GRU decoder one step at a
/// time, feeding each prediction back through the input projection.
#[derive(Debug, Clone)]
pub struct EncoderGru {
    info: ModelInfo,
    architecture: SequenceArchitecture,
    input_proj: DenseLayer,
    encoder: Vec<DenseLayer>,
    gru: GruCell,
    output_layer: DenseLayer,
    scaler: FeatureScaler,
}

impl EncoderGru {
    pub fn from_artifact(artifact: &SequenceModelArtifact) -> Result<Self, ModelError> {
        let arch = artifact.architecture;
        arch.validate()?;
        let (n, d) = (arch.n_features, arch.d_model);

        if artifact.feature_names.len() != n {
            return Err(ModelError::Invalid(format!(
                "{} feature names for n_features = {n}",
                artifact.feature_names.len()
            )));
        }

        let input_proj = DenseLayer::from_artifact(&artifact.input_proj, "input_proj")?;
        input_proj.expect_shape("input_proj", d, n)?;

        let encoder = artifact
            .encoder
            .iter()
            .enumerate()
            .map(|(idx, layer)| {
                let name = format!("encoder[{idx}]");
                let layer = DenseLayer::from_artifact(layer, &name)?;
                layer.expect_shape(&name, d, d)?;
                Ok(layer)
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        let gru = GruCell::from_artifact(&artifact.gru, d)?;

        let output_layer = DenseLayer::from_artifact(&artifact.output_layer, "output_layer")?;
        output_layer.expect_shape("output_layer", n, d)?;

        let scaler = match &artifact.scaler {
            Some(params) => FeatureScaler::new(
                artifact.feature_names.clone(),
                params.mean.clone(),
                params.scale.clone(),
            )
            .map_err(|err| ModelError::Invalid(err.to_string()))?,
            None => {
                let unique: HashSet<&String> = artifact.feature_names.iter().collect();
                if unique.len() != n {
                    return Err(ModelError::Invalid(
                        "feature names must be unique".to_string(),
                    ));
                }
                FeatureScaler::identity(artifact.feature_names.clone())
            }
        };

        Ok(Self {
            info: artifact.info.clone(),
            architecture: arch,
            input_proj,
            encoder,
            gru,
            output_layer,
            scaler,
        })
    }

    pub fn load(path: &Path) -> Result<(Self, String), ArtifactError> {
        let loaded = read_artifact::<SequenceModelArtifact>(
            path,
            SEQUENCE_MODEL_FORMAT,
            MODEL_FORMAT_VERSION,
        )?;
        let model = Self::from_artifact(&loaded.body)
            .map_err(|err| ArtifactError::invalid(path, err.to_string()))?;
        Ok((model, loaded.fingerprint))
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    pub fn feature_names(&self) -> &[String] {
        self.scaler.feature_names()
    }

    /// Scaler bundled with the artifact; identity when the model was trained on raw values.
    pub fn scaler(&self) -> &FeatureScaler {
        &self.scaler
    }
}

impl SequencePredictor for EncoderGru {
    fn architecture(&self) -> SequenceArchitecture {
        self.architecture
    }

    fn predict_sequence(
        &self,
        window: ArrayView2<'_, f64>,
        cancel: &CancelFlag,
    ) -> Result<Array2<f64>, PredictError> {
        let arch = self.architecture;
        check_window(window, arch.seq_len, arch.n_features)?;

        let mut encoded = self.input_proj.forward_rows(window);
        for layer in &self.encoder {
            encoded = layer.forward_rows(encoded.view());
        }

        let mut decoder_input = encoded.row(arch.seq_len - 1).to_owned();
        let mut hidden = Array1::zeros(arch.d_model);
        let mut out = Array2::zeros((arch.pred_len, arch.n_features));

        for step in 0..arch.pred_len {
            if cancel.is_cancelled() {
                return Err(PredictError::Cancelled);
            }
            hidden = self.gru.step(decoder_input.view(), hidden.view());
            let prediction = self.output_layer.forward(hidden.view());
            decoder_input = self.input_proj.forward(prediction.view());
            out.row_mut(step).assign(&prediction);
        }

        Ok(out)
    }
}

fn check_window(
    window: ArrayView2<'_, f64>,
    rows: usize,
    cols: usize,
) -> Result<(), PredictError> {
    if window.dim() != (rows, cols) {
        return Err(PredictError::InputShape {
            expected: (rows, cols),
            found: window.dim(),
        });
    }
    Ok(())
}

fn matrix_from_rows(rows: &[Vec<f64>], name: &str) -> Result<Array2<f64>, ModelError> {
    let n_rows = rows.len();
    let n_cols = rows.first().map(Vec::len).unwrap_or(0);
    if n_rows == 0 || n_cols == 0 {
        return Err(ModelError::Invalid(format!("{name}: empty weight matrix")));
    }
    if let Some(idx) = rows.iter().position(|row| row.len() != n_cols) {
        return Err(ModelError::Invalid(format!(
            "{name}: row {idx} has {} values, expected {n_cols}",
            rows[idx].len()
        )));
    }
    if rows.iter().flatten().any(|v| !v.is_finite()) {
        return Err(ModelError::Invalid(format!(
            "{name}: weights must be finite"
        )));
    }

    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((n_rows, n_cols), flat)
        .map_err(|err| ModelError::Invalid(format!("{name}: {err}")))
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn small_chunk_arch() -> ChunkArchitecture {
        ChunkArchitecture {
            lookback: 4,
            horizon: 4,
            chunk: 2,
            n_features: 2,
        }
    }

    fn persistence_model() -> ChunkMlp {
        let artifact = ChunkModelArtifact::persistence(small_chunk_arch(), ModelInfo::default());
        ChunkMlp::from_artifact(&artifact).expect("valid model")
    }

    fn zero_layer(out: usize, input: usize) -> DenseLayerArtifact {
        DenseLayerArtifact {
            weight: vec![vec![0.0; input]; out],
            bias: vec![0.0; out],
            activation: Activation::Linear,
        }
    }

    fn tiny_sequence_artifact() -> SequenceModelArtifact {
        SequenceModelArtifact {
            format: SEQUENCE_MODEL_FORMAT.to_string(),
            format_version: MODEL_FORMAT_VERSION,
            info: ModelInfo::default(),
            architecture: SequenceArchitecture {
                seq_len: 3,
                pred_len: 5,
                n_features: 1,
                d_model: 1,
            },
            feature_names: vec!["x".to_string()],
            input_proj: DenseLayerArtifact {
                weight: vec![vec![1.0]],
                bias: vec![0.0],
                activation: Activation::Linear,
            },
            encoder: Vec::new(),
            gru: GruArtifact {
                weight_ih: vec![vec![0.0]; 3],
                weight_hh: vec![vec![0.0]; 3],
                bias_ih: vec![0.0; 3],
                bias_hh: vec![0.0; 3],
            },
            output_layer: DenseLayerArtifact {
                weight: vec![vec![1.0]],
                bias: vec![0.0],
                activation: Activation::Linear,
            },
            scaler: None,
        }
    }

    #[test]
    fn horizon_must_be_a_multiple_of_chunk() {
        let arch = ChunkArchitecture {
            horizon: 5,
            ..small_chunk_arch()
        };
        let err = arch.validate().expect_err("5 is not a multiple of 2");
        assert!(err.to_string().contains("not a multiple"));
    }

    #[test]
    fn chunk_layer_widths_are_checked_against_architecture() {
        let mut artifact =
            ChunkModelArtifact::persistence(small_chunk_arch(), ModelInfo::default());
        assert!(ChunkMlp::from_artifact(&artifact).is_ok());

        artifact.layers = vec![zero_layer(8, 8), zero_layer(7, 8)];
        let err = ChunkMlp::from_artifact(&artifact).expect_err("wrong final width");
        assert!(err.to_string().contains("expected chunk * n_features * 2"));

        artifact.layers = vec![zero_layer(8, 9)];
        assert!(ChunkMlp::from_artifact(&artifact).is_err());
    }

    #[test]
    fn persistence_chunk_model_repeats_last_row() {
        let model = persistence_model();
        let window = array![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, -3.0]];

        let out = model.predict_chunk(window.view()).expect("predicts");

        assert_eq!(out.dim(), (2, 2, 2));
        for step in 0..2 {
            assert_eq!(out[[step, 0, 0]], 3.0);
            assert_eq!(out[[step, 1, 0]], -3.0);
            assert_eq!(out[[step, 0, 1]], 0.0);
        }
    }

    #[test]
    fn chunk_model_rejects_wrong_window_shape() {
        let model = persistence_model();
        let err = model
            .predict_chunk(Array2::zeros((3, 2)).view())
            .expect_err("short window");
        assert!(matches!(err, PredictError::InputShape { .. }));
    }

    #[test]
    fn gru_with_zero_gates_halves_toward_candidate() {
        // All gate pre-activations are zero: reset = update = 0.5, candidate = 0,
        // so every step halves the hidden state.
        let cell = GruCell::from_artifact(&tiny_sequence_artifact().gru, 1).expect("valid gru");
        let next = cell.step(array![5.0].view(), array![2.0].view());
        assert!((next[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn encoder_gru_emits_full_horizon() {
        let model = EncoderGru::from_artifact(&tiny_sequence_artifact()).expect("valid model");
        let window = array![[1.0], [2.0], [3.0]];

        let out = model
            .predict_sequence(window.view(), &CancelFlag::new())
            .expect("predicts");

        assert_eq!(out.dim(), (5, 1));
        assert!(out.iter().all(|v| v.is_finite()));
        assert_eq!(model.scaler(), &FeatureScaler::identity(vec!["x".to_string()]));
    }

    #[test]
    fn encoder_gru_stops_when_cancelled() {
        let model = EncoderGru::from_artifact(&tiny_sequence_artifact()).expect("valid model");
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = model
            .predict_sequence(array![[1.0], [2.0], [3.0]].view(), &cancel)
            .expect_err("cancelled");
        assert!(matches!(err, PredictError::Cancelled));
    }

    #[test]
    fn encoder_gru_validates_layer_shapes() {
        let mut artifact = tiny_sequence_artifact();
        artifact.output_layer.weight = vec![vec![1.0, 1.0]];
        let err = EncoderGru::from_artifact(&artifact).expect_err("bad output layer");
        assert!(err.to_string().contains("output_layer"));

        let mut artifact = tiny_sequence_artifact();
        artifact.gru.bias_hh = vec![0.0; 2];
        assert!(EncoderGru::from_artifact(&artifact).is_err());

        let mut artifact = tiny_sequence_artifact();
        artifact.feature_names = vec!["x".to_string(), "y".to_string()];
        assert!(EncoderGru::from_artifact(&artifact).is_err());
    }
}
