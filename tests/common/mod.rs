#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::Request,
    response::Response,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use ephemra::{
    Activation, ChunkArchitecture, ChunkMlp, ChunkModelArtifact, DenseLayerArtifact, EncoderGru,
    FeatureScaler, ForecastService, GeoModel, GruArtifact, MeoModel, ModelInfo,
    SequenceArchitecture, SequenceModelArtifact, ServiceLimits, MODEL_FORMAT_VERSION,
    SEQUENCE_MODEL_FORMAT,
};

pub const FEATURES: [&str; 4] = [
    "x_error (m)",
    "y_error (m)",
    "z_error (m)",
    "satclockerror (m)",
];

const BOUNDARY: &str = "ephemra-test-boundary";

pub fn feature_names() -> Vec<String> {
    FEATURES.iter().map(|name| name.to_string()).collect()
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

pub fn geo_arch() -> ChunkArchitecture {
    ChunkArchitecture {
        lookback: 96,
        horizon: 96,
        chunk: 16,
        n_features: FEATURES.len(),
    }
}

pub fn geo_info() -> ModelInfo {
    ModelInfo {
        model_name: "GEO-Transformer-X1".to_string(),
        version: "2.0".to_string(),
        model_type: "chunked forecaster".to_string(),
        ..ModelInfo::default()
    }
}

pub fn geo_scaler() -> FeatureScaler {
    FeatureScaler::new(
        feature_names(),
        vec![0.5, -1.0, 2.0, 0.1],
        vec![1.5, 2.0, 3.0, 0.2],
    )
    .expect("valid scaler")
}

pub fn persistence_geo_artifact() -> ChunkModelArtifact {
    ChunkModelArtifact::persistence(geo_arch(), geo_info())
}

pub fn geo_model() -> GeoModel {
    let mlp = ChunkMlp::from_artifact(&persistence_geo_artifact()).expect("valid model");
    GeoModel::new(
        Arc::new(mlp),
        geo_scaler(),
        geo_info(),
        "geo-model-fp".to_string(),
        "geo-scaler-fp".to_string(),
    )
    .expect("geo model matches scaler")
}

fn identity_layer(n: usize) -> DenseLayerArtifact {
    DenseLayerArtifact {
        weight: (0..n)
            .map(|row| (0..n).map(|col| if row == col { 1.0 } else { 0.0 }).collect())
            .collect(),
        bias: vec![0.0; n],
        activation: Activation::Linear,
    }
}

/// Identity projections around a GRU whose only signal is a candidate-gate bias,
/// so every step produces finite, non-trivial output.
pub fn meo_artifact() -> SequenceModelArtifact {
    let n = FEATURES.len();
    let mut bias_ih = vec![0.0; 3 * n];
    for value in &mut bias_ih[2 * n..] {
        *value = 0.5;
    }

    SequenceModelArtifact {
        format: SEQUENCE_MODEL_FORMAT.to_string(),
        format_version: MODEL_FORMAT_VERSION,
        info: ModelInfo {
            model_name: "MEO-Transformer-v2".to_string(),
            ..ModelInfo::default()
        },
        architecture: SequenceArchitecture {
            seq_len: 96,
            pred_len: 96,
            n_features: n,
            d_model: n,
        },
        feature_names: feature_names(),
        input_proj: identity_layer(n),
        encoder: vec![identity_layer(n)],
        gru: GruArtifact {
            weight_ih: vec![vec![0.0; n]; 3 * n],
            weight_hh: vec![vec![0.0; n]; 3 * n],
            bias_ih,
            bias_hh: vec![0.0; 3 * n],
        },
        output_layer: identity_layer(n),
        scaler: None,
    }
}

pub fn meo_model() -> MeoModel {
    let gru = EncoderGru::from_artifact(&meo_artifact()).expect("valid model");
    let scaler = gru.scaler().clone();
    let info = gru.info().clone();
    MeoModel::new(Arc::new(gru), scaler, info, "meo-model-fp".to_string())
        .expect("meo model matches scaler")
}

pub fn limits() -> ServiceLimits {
    ServiceLimits {
        max_concurrent_inferences: 2,
        inference_timeout: std::time::Duration::from_secs(20),
        max_upload_bytes: 4 * 1024 * 1024,
    }
}

pub fn service() -> Arc<ForecastService> {
    Arc::new(ForecastService::new(geo_model(), meo_model(), limits()))
}

/// Smooth synthetic error series, one row per `step`, skipping `skip` indices.
pub fn series_csv(rows: usize, step: ChronoDuration, skip: &[usize]) -> String {
    series_csv_with(rows, step, skip, |_, _, value| value)
}

/// Like [`series_csv`] but lets `edit(row, feature, value)` rewrite cells.
pub fn series_csv_with(
    rows: usize,
    step: ChronoDuration,
    skip: &[usize],
    edit: impl Fn(usize, usize, f64) -> f64,
) -> String {
    let mut out = format!("utc_time,{}\n", FEATURES.join(","));
    for row in 0..rows {
        if skip.contains(&row) {
            continue;
        }
        let ts = start_time() + step * row as i32;
        out.push_str(&ts.format("%Y-%m-%d %H:%M:%S%.f").to_string());
        for feature in 0..FEATURES.len() {
            let phase = row as f64 / 12.0 + feature as f64;
            let value = edit(row, feature, phase.sin() * (feature as f64 + 1.0));
            out.push_str(&format!(",{value}"));
        }
        out.push('\n');
    }
    out
}

pub fn multipart_request(uri: &str, field: &str, body: &[u8]) -> Request<Body> {
    let mut payload = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"upload.csv\"\r\nContent-Type: text/csv\r\n\r\n"
    )
    .into_bytes();
    payload.extend_from_slice(body);
    payload.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(payload))
        .expect("request should build")
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    serde_json::from_slice(&body).expect("body should be JSON")
}
