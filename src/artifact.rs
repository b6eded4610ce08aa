//! Versioned JSON artifact files for predictors and scalers.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact {path} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact {path} is not valid JSON for its format: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("artifact {path} has format '{found}', expected '{expected}'")]
    UnsupportedFormat {
        path: PathBuf,
        expected: &'static str,
        found: String,
    },
    #[error("artifact {path} has format_version {found}, expected {expected}")]
    UnsupportedVersion {
        path: PathBuf,
        expected: u32,
        found: u32,
    },
    #[error("artifact {path} is invalid: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

impl ArtifactError {
    pub fn invalid(path: &Path, reason: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Common header every artifact file starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub format: String,
    pub format_version: u32,
}

/// A decoded artifact together with the sha256 of the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedArtifact<T> {
    pub path: PathBuf,
    pub fingerprint: String,
    pub body: T,
}

/// Reads `path`, checks the header against `format`/`version`, then decodes the body.
pub fn read_artifact<T: DeserializeOwned>(
    path: &Path,
    format: &'static str,
    version: u32,
) -> Result<LoadedArtifact<T>, ArtifactError> {
    let bytes = fs::read(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let header: ArtifactHeader =
        serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    if header.format != format {
        return Err(ArtifactError::UnsupportedFormat {
            path: path.to_path_buf(),
            expected: format,
            found: header.format,
        });
    }
    if header.format_version != version {
        return Err(ArtifactError::UnsupportedVersion {
            path: path.to_path_buf(),
            expected: version,
            found: header.format_version,
        });
    }

    let body: T = serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let fingerprint = sha256_hex(&bytes);

    info!(
        component = "artifact",
        event = "artifact.loaded",
        path = %path.display(),
        format,
        format_version = version,
        bytes = bytes.len(),
        fingerprint = %fingerprint
    );

    Ok(LoadedArtifact {
        path: path.to_path_buf(),
        fingerprint,
        body,
    })
}

/// Serializes `body` as pretty JSON to `path`.
pub fn write_artifact<T: Serialize>(path: &Path, body: &T) -> Result<(), ArtifactError> {
    let json = serde_json::to_vec_pretty(body).map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
