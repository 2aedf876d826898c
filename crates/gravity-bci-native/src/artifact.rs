//! Model artifact and configuration files
//!
//! Both are JSON. Loading validates the content, so a model or configuration
//! that comes back from here is safe to start a session with.

use std::fs;
use std::path::{Path, PathBuf};

use gravity_bci_core::{BciConfig, Model, PipelineError};
use thiserror::Error;
use tracing::info;

/// Artifact I/O errors
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Reading or writing the file failed
    #[error("{path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The model could not be serialized
    #[error("Failed to serialize model: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The file parsed but is not usable
    #[error("{path}: {source}")]
    Invalid {
        /// File involved
        path: PathBuf,
        /// Validation failure
        #[source]
        source: PipelineError,
    },
}

/// Artifact result type
pub type ArtifactResult<T> = Result<T, ArtifactError>;

fn read(path: &Path) -> ArtifactResult<String> {
    fs::read_to_string(path).map_err(|source| ArtifactError::Io { path: path.to_path_buf(), source })
}

/// Load and validate a model artifact.
pub fn load_model(path: impl AsRef<Path>) -> ArtifactResult<Model> {
    let path = path.as_ref();
    let model = Model::from_json(&read(path)?)
        .map_err(|source| ArtifactError::Invalid { path: path.to_path_buf(), source })?;
    info!(
        "Loaded model {} ({} channels, {} features)",
        path.display(),
        model.channel_count(),
        model.feature_dim()
    );
    Ok(model)
}

/// Write a model artifact as pretty JSON.
pub fn save_model(path: impl AsRef<Path>, model: &Model) -> ArtifactResult<()> {
    let path = path.as_ref();
    let json = model.to_json()?;
    fs::write(path, json).map_err(|source| ArtifactError::Io { path: path.to_path_buf(), source })?;
    info!("Saved model to {}", path.display());
    Ok(())
}

/// Load and validate a session configuration.
pub fn load_config(path: impl AsRef<Path>) -> ArtifactResult<BciConfig> {
    let path = path.as_ref();
    BciConfig::from_json(&read(path)?).map_err(|source| ArtifactError::Invalid { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::training::Trainer;
    use crate::simulation::{SyntheticEeg, SyntheticEegConfig, TrialProtocol};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gravity-bci-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_model_save_load() {
        let protocol = TrialProtocol { trials_per_class: 4, ..TrialProtocol::default() };
        let recording = SyntheticEeg::new(SyntheticEegConfig::default(), 11).record(&protocol);
        let model = Trainer::new(BciConfig::default()).unwrap().fit(&recording).unwrap();

        let path = temp_path("model.json");
        save_model(&path, &model).unwrap();
        let loaded = load_model(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded.feature_names, model.feature_names);
        assert_eq!(loaded.signal, model.signal);
        assert_eq!(loaded.csp.filters.len(), model.csp.filters.len());
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = load_model(temp_path("does-not-exist.json")).unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));
        assert!(err.to_string().contains("does-not-exist.json"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let path = temp_path("bad-config.json");
        fs::write(&path, r#"{ "passband": { "low_hz": 30.0, "high_hz": 8.0 } }"#).unwrap();
        let result = load_config(&path);
        fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ArtifactError::Invalid { source: PipelineError::InvalidConfig { .. }, .. })));
    }
}
