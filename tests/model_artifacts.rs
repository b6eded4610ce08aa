mod common;

use std::path::Path;

use ephemra::{
    write_artifact, ArtifactError, ChunkMlp, ChunkPredictor, EncoderGru, FeatureScaler,
    ForecastService, GeoModel, MeoModel, ScalerArtifact, SequencePredictor, ServiceConfig,
};
use tempfile::TempDir;

use common::{feature_names, limits, meo_artifact, persistence_geo_artifact};

fn write_geo_artifacts(dir: &Path, scaler_names: Vec<String>) -> ServiceConfig {
    let geo_model_path = dir.join("geo_model.json");
    let geo_scaler_path = dir.join("scaler.json");
    let meo_model_path = dir.join("meo_model.json");

    write_artifact(&geo_model_path, &persistence_geo_artifact()).expect("geo model written");
    let n = scaler_names.len();
    write_artifact(
        &geo_scaler_path,
        &ScalerArtifact::new(scaler_names, vec![0.0; n], vec![1.0; n]),
    )
    .expect("scaler written");
    write_artifact(&meo_model_path, &meo_artifact()).expect("meo model written");

    ServiceConfig {
        geo_model_path,
        geo_scaler_path,
        meo_model_path,
        limits: limits(),
        ..ServiceConfig::default()
    }
}

#[test]
fn service_loads_all_artifacts_and_reports_fingerprints() {
    let dir = TempDir::new().expect("temp dir");
    let config = write_geo_artifacts(dir.path(), feature_names());

    let service = ForecastService::load(&config).expect("artifacts load");
    let catalog = service.catalog();

    assert_eq!(catalog.geo.info.model_name, "GEO-Transformer-X1");
    assert_eq!(catalog.geo.fingerprint.len(), 64);
    assert_eq!(catalog.geo.scaler_fingerprint.as_ref().map(String::len), Some(64));
    assert_ne!(catalog.geo.fingerprint, catalog.meo.fingerprint);
    assert_eq!(catalog.meo.feature_names, feature_names());
}

#[test]
fn scaler_width_must_match_geo_model() {
    let dir = TempDir::new().expect("temp dir");
    let config = write_geo_artifacts(dir.path(), feature_names()[..3].to_vec());

    let err = GeoModel::load(&config.geo_model_path, &config.geo_scaler_path)
        .err()
        .expect("3-column scaler against 4-feature model");
    assert!(matches!(err, ArtifactError::Invalid { .. }));
    assert!(err.to_string().contains("scaler has 3"));
}

#[test]
fn missing_artifact_fails_startup() {
    let dir = TempDir::new().expect("temp dir");
    let mut config = write_geo_artifacts(dir.path(), feature_names());
    config.meo_model_path = dir.path().join("absent.json");

    let err = ForecastService::load(&config)
        .err()
        .expect("missing MEO artifact");
    assert!(matches!(err, ArtifactError::Io { .. }));
}

#[test]
fn swapped_artifact_formats_are_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let config = write_geo_artifacts(dir.path(), feature_names());

    let err = EncoderGru::load(&config.geo_model_path)
        .err()
        .expect("chunk artifact is not a sequence model");
    assert!(matches!(err, ArtifactError::UnsupportedFormat { .. }));

    let err = FeatureScaler::load(&config.meo_model_path)
        .err()
        .expect("sequence artifact is not a scaler");
    assert!(matches!(err, ArtifactError::UnsupportedFormat { .. }));
}

#[test]
fn horizon_not_multiple_of_chunk_fails_at_load() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("bad_geo.json");
    let mut artifact = persistence_geo_artifact();
    artifact.architecture.horizon = 90;
    write_artifact(&path, &artifact).expect("written");

    let err = ChunkMlp::load(&path).err().expect("90 is not a multiple of 16");
    assert!(matches!(err, ArtifactError::Invalid { .. }));
}

#[test]
fn sequence_artifact_shape_errors_name_the_layer() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("bad_meo.json");
    let mut artifact = meo_artifact();
    artifact.output_layer.weight.pop();
    artifact.output_layer.bias.pop();
    write_artifact(&path, &artifact).expect("written");

    let err = MeoModel::load(&path).err().expect("output layer too narrow");
    assert!(err.to_string().contains("output_layer"), "{err}");
}

#[test]
fn loaded_models_expose_architecture() {
    let dir = TempDir::new().expect("temp dir");
    let config = write_geo_artifacts(dir.path(), feature_names());

    let (geo, _) = ChunkMlp::load(&config.geo_model_path).expect("loads");
    assert_eq!(geo.architecture().chunk_count(), 6);

    let (meo, _) = EncoderGru::load(&config.meo_model_path).expect("loads");
    assert_eq!(meo.architecture().pred_len, 96);
    assert_eq!(meo.feature_names(), feature_names());
}
