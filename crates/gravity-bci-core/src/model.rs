//! Offline-fitted model artifact
//!
//! A [`Model`] bundles everything the live pipeline needs to reproduce the
//! training-time signal path: signal geometry, AR settings, the CSP projection,
//! the ordered feature names and the classifier parameters. It is serialized
//! as JSON and never mutated after loading.

use serde::{Deserialize, Serialize};

use crate::config::{ArMethod, ClassifierKind, SignalConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::types::FeatureLayout;

/// Artifact schema version written by this crate
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// CSP spatial filters, one row per component, ranked by class separation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CspProjection {
    /// Filter rows (`components × channels`)
    pub filters: Vec<Vec<f64>>,
    /// Generalized eigenvalue of each row (MI variance share, in [0, 1])
    pub eigenvalues: Vec<f64>,
}

impl CspProjection {
    /// Number of spatial components
    pub fn components(&self) -> usize {
        self.filters.len()
    }
}

/// Parameters of the fitted classifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierParams {
    /// Linear discriminant: `margin = w·x + b`, positive favours MI
    Lda {
        /// Weight vector
        weights: Vec<f64>,
        /// Bias
        bias: f64,
    },
    /// Nearest class mean on standardized features
    NearestMean {
        /// REST centroid
        rest_mean: Vec<f64>,
        /// MI centroid
        mi_mean: Vec<f64>,
        /// Per-feature standard deviation used for scaling
        scale: Vec<f64>,
    },
}

impl ClassifierParams {
    /// Feature dimensionality expected by the classifier
    pub fn input_dim(&self) -> usize {
        match self {
            Self::Lda { weights, .. } => weights.len(),
            Self::NearestMean { rest_mean, .. } => rest_mean.len(),
        }
    }

    /// Family of the classifier
    pub fn kind(&self) -> ClassifierKind {
        match self {
            Self::Lda { .. } => ClassifierKind::Lda,
            Self::NearestMean { .. } => ClassifierKind::NearestMean,
        }
    }

    fn validate(&self) -> PipelineResult<()> {
        match self {
            Self::Lda { weights, bias } => {
                if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
                    return Err(PipelineError::model_incompatible("non-finite LDA parameters"));
                }
            }
            Self::NearestMean { rest_mean, mi_mean, scale } => {
                let dim = rest_mean.len();
                if mi_mean.len() != dim || scale.len() != dim {
                    return Err(PipelineError::model_incompatible(
                        "nearest-mean centroids and scale differ in length",
                    ));
                }
                if scale.iter().any(|s| !(*s > 0.0)) {
                    return Err(PipelineError::model_incompatible("non-positive feature scale"));
                }
            }
        }
        Ok(())
    }
}

/// AR settings recorded at training time.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArSettings {
    /// AR model order
    pub order: usize,
    /// AR estimator
    pub method: ArMethod,
}

/// Training-time bookkeeping stored alongside the parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    /// Windows labelled REST
    pub rest_windows: usize,
    /// Windows labelled MI
    pub mi_windows: usize,
    /// Windows dropped (mixed labels or degenerate data)
    pub discarded_windows: usize,
    /// Accuracy on the training windows
    pub training_accuracy: f64,
    /// Blocked k-fold accuracy, when enough windows were available
    pub cross_validation_accuracy: Option<f64>,
}

/// Immutable, offline-fitted model artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Schema version (`MODEL_FORMAT_VERSION`)
    pub format_version: u32,
    /// Signal geometry used at training time
    pub signal: SignalConfig,
    /// AR settings
    pub ar: ArSettings,
    /// Variance below which a window was treated as degenerate (µV²)
    pub min_channel_variance: f64,
    /// CSP spatial filters
    pub csp: CspProjection,
    /// Ordered feature names
    pub feature_names: Vec<String>,
    /// Classifier parameters
    pub classifier: ClassifierParams,
    /// Training statistics
    pub summary: TrainingSummary,
}

impl Model {
    /// Number of channels the model was trained on
    pub fn channel_count(&self) -> usize {
        self.signal.channel_count()
    }

    /// Feature dimensionality
    pub fn feature_dim(&self) -> usize {
        self.feature_names.len()
    }

    /// Layout derived from the model's own geometry
    #[must_use]
    pub fn feature_layout(&self) -> FeatureLayout {
        FeatureLayout::new(self.csp.components(), &self.signal.channel_labels, self.ar.order)
    }

    /// Check internal consistency of a freshly loaded artifact.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(PipelineError::model_incompatible(format!(
                "unsupported format_version {} (expected {MODEL_FORMAT_VERSION})",
                self.format_version
            )));
        }
        self.signal.validate()?;

        let channels = self.channel_count();
        if self.csp.components() == 0 || self.csp.components() > channels {
            return Err(PipelineError::model_incompatible(format!(
                "{} CSP components for {channels} channels",
                self.csp.components()
            )));
        }
        if self.csp.eigenvalues.len() != self.csp.components() {
            return Err(PipelineError::model_incompatible("CSP eigenvalue count differs from filters"));
        }
        if let Some(row) = self.csp.filters.iter().find(|row| row.len() != channels) {
            return Err(PipelineError::model_incompatible(format!(
                "CSP filter has {} weights for {channels} channels",
                row.len()
            )));
        }
        if self.ar.order == 0 || self.signal.window_samples() <= 2 * self.ar.order {
            return Err(PipelineError::model_incompatible(format!("unusable AR order {}", self.ar.order)));
        }

        let layout = self.feature_layout();
        if layout.names() != self.feature_names.as_slice() {
            return Err(PipelineError::model_incompatible(
                "stored feature order does not match the CSP/AR layout",
            ));
        }
        if self.classifier.input_dim() != layout.len() {
            return Err(PipelineError::DimensionMismatch {
                expected: layout.len(),
                actual: self.classifier.input_dim(),
            });
        }
        self.classifier.validate()
    }

    /// Fail fast when the live stream does not match the training montage.
    ///
    /// `channel_labels` is `None` when the source does not report labels; only
    /// the count is checked then.
    pub fn check_compatible(
        &self,
        channel_count: usize,
        channel_labels: Option<&[String]>,
        sample_rate_hz: f64,
    ) -> PipelineResult<()> {
        if channel_count != self.channel_count() {
            return Err(PipelineError::model_incompatible(format!(
                "model has {} channels, stream has {channel_count}",
                self.channel_count()
            )));
        }
        if let Some(labels) = channel_labels {
            if labels != self.signal.channel_labels.as_slice() {
                return Err(PipelineError::model_incompatible(format!(
                    "channel order {:?} differs from model order {:?}",
                    labels, self.signal.channel_labels
                )));
            }
        }
        if (sample_rate_hz - self.signal.sample_rate_hz).abs() > 1e-6 {
            return Err(PipelineError::model_incompatible(format!(
                "model trained at {} Hz, stream runs at {sample_rate_hz} Hz",
                self.signal.sample_rate_hz
            )));
        }
        Ok(())
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse and validate an artifact
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        let model: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::model_incompatible(format!("malformed artifact: {e}")))?;
        model.validate()?;
        Ok(model)
    }
}
