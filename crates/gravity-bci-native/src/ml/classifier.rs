//! Classifier adapters
//!
//! Any model family implementing [`Classifier`] can drive the pipeline. Two
//! families are provided:
//!
//! - [`LinearDiscriminant`]: shrinkage LDA, confidence = sigmoid of the margin
//! - [`NearestMean`]: standardized nearest centroid, confidence = softmax of
//!   negative distances
//!
//! [`ClassifierAdapter`] wraps a boxed classifier with the model's feature
//! layout fingerprint and rejects mismatching vectors.

use gravity_bci_core::{
    ClassifierParams, FeatureVector, MindState, Model, PipelineError, PipelineResult, Prediction,
};
use nalgebra::{DMatrix, DVector};

use super::training::{TrainingError, TrainingResult};

/// Inference contract of a fitted binary classifier.
pub trait Classifier: Send + Sync {
    /// Expected feature dimensionality
    fn input_dim(&self) -> usize;

    /// Classify a feature slice of length `input_dim()`
    fn classify(&self, features: &[f64]) -> Prediction;

    /// Serializable parameters
    fn params(&self) -> ClassifierParams;

    /// Validate dimensionality, then classify.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if the vector length differs from `input_dim()`.
    fn predict(&self, features: &[f64]) -> PipelineResult<Prediction> {
        if features.len() != self.input_dim() {
            return Err(PipelineError::DimensionMismatch { expected: self.input_dim(), actual: features.len() });
        }
        Ok(self.classify(features))
    }
}

/// Instantiate the classifier described by stored parameters.
pub trait BuildClassifier {
    /// Build a boxed classifier
    fn build(&self) -> Box<dyn Classifier>;
}

impl BuildClassifier for ClassifierParams {
    fn build(&self) -> Box<dyn Classifier> {
        match self {
            Self::Lda { weights, bias } => Box::new(LinearDiscriminant { weights: weights.clone(), bias: *bias }),
            Self::NearestMean { rest_mean, mi_mean, scale } => Box::new(NearestMean {
                rest_mean: rest_mean.clone(),
                mi_mean: mi_mean.clone(),
                scale: scale.clone(),
            }),
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn prediction_from_probability(p_mi: f64, margin: f64) -> Prediction {
    if p_mi >= 0.5 {
        Prediction::new(MindState::MotorImagery, p_mi, margin)
    } else {
        Prediction::new(MindState::Rest, 1.0 - p_mi, margin)
    }
}

#[allow(clippy::cast_precision_loss)]
fn class_mean(rows: &[Vec<f64>], dim: usize) -> DVector<f64> {
    let mut mean = DVector::<f64>::zeros(dim);
    for row in rows {
        mean += DVector::from_column_slice(row);
    }
    mean / rows.len().max(1) as f64
}

fn check_training_set(rest: &[Vec<f64>], mi: &[Vec<f64>]) -> TrainingResult<usize> {
    if rest.len() < 2 {
        return Err(TrainingError::InsufficientWindows { state: MindState::Rest, got: rest.len(), need: 2 });
    }
    if mi.len() < 2 {
        return Err(TrainingError::InsufficientWindows { state: MindState::MotorImagery, got: mi.len(), need: 2 });
    }
    let dim = rest[0].len();
    if let Some(row) = rest.iter().chain(mi).find(|row| row.len() != dim) {
        return Err(TrainingError::Pipeline(PipelineError::DimensionMismatch { expected: dim, actual: row.len() }));
    }
    Ok(dim)
}

// ============================================================================
// Linear Discriminant
// ============================================================================

/// Shrinkage linear discriminant analysis.
///
/// `margin = w·x + b` with `w = Σ⁻¹(μ_mi − μ_rest)` and `b = −w·(μ_mi + μ_rest)/2`,
/// where Σ is the pooled within-class covariance shrunk toward `tr(Σ)/d · I`.
/// Under the shared-Gaussian assumption the margin is the posterior log-odds.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearDiscriminant {
    weights: Vec<f64>,
    bias: f64,
}

impl LinearDiscriminant {
    /// Fit on REST and MI feature rows.
    ///
    /// # Errors
    ///
    /// `InsufficientWindows` with fewer than two rows per class, or
    /// `SingularMatrix` if the shrunk covariance cannot be inverted.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(rest: &[Vec<f64>], mi: &[Vec<f64>], shrinkage: f64) -> TrainingResult<Self> {
        let dim = check_training_set(rest, mi)?;
        let mu_rest = class_mean(rest, dim);
        let mu_mi = class_mean(mi, dim);

        let mut scatter = DMatrix::<f64>::zeros(dim, dim);
        for (rows, mu) in [(rest, &mu_rest), (mi, &mu_mi)] {
            for row in rows {
                let d = DVector::from_column_slice(row) - mu;
                scatter += &d * d.transpose();
            }
        }
        let dof = (rest.len() + mi.len() - 2).max(1) as f64;
        let pooled = scatter / dof;

        let nu = pooled.trace() / dim as f64;
        let target = DMatrix::<f64>::identity(dim, dim) * nu;
        let shrunk = pooled * (1.0 - shrinkage) + target * shrinkage;

        let cholesky = shrunk.cholesky().ok_or(TrainingError::SingularMatrix { matrix: "LDA covariance" })?;
        let w = cholesky.solve(&(&mu_mi - &mu_rest));
        let bias = -w.dot(&(&mu_mi + &mu_rest)) / 2.0;

        Ok(Self { weights: w.iter().copied().collect(), bias })
    }

    /// Signed decision value
    pub fn margin(&self, features: &[f64]) -> f64 {
        self.weights.iter().zip(features).map(|(w, x)| w * x).sum::<f64>() + self.bias
    }
}

impl Classifier for LinearDiscriminant {
    fn input_dim(&self) -> usize {
        self.weights.len()
    }

    fn classify(&self, features: &[f64]) -> Prediction {
        let margin = self.margin(features);
        prediction_from_probability(sigmoid(margin), margin)
    }

    fn params(&self) -> ClassifierParams {
        ClassifierParams::Lda { weights: self.weights.clone(), bias: self.bias }
    }
}

// ============================================================================
// Nearest Class Mean
// ============================================================================

/// Nearest centroid on features standardized by the pooled per-feature
/// standard deviation.
#[derive(Clone, Debug, PartialEq)]
pub struct NearestMean {
    rest_mean: Vec<f64>,
    mi_mean: Vec<f64>,
    scale: Vec<f64>,
}

impl NearestMean {
    /// Fit on REST and MI feature rows
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(rest: &[Vec<f64>], mi: &[Vec<f64>]) -> TrainingResult<Self> {
        let dim = check_training_set(rest, mi)?;
        let mu_rest = class_mean(rest, dim);
        let mu_mi = class_mean(mi, dim);

        let dof = (rest.len() + mi.len() - 2).max(1) as f64;
        let scale = (0..dim)
            .map(|j| {
                let ss: f64 = rest.iter().map(|r| (r[j] - mu_rest[j]).powi(2)).sum::<f64>()
                    + mi.iter().map(|r| (r[j] - mu_mi[j]).powi(2)).sum::<f64>();
                (ss / dof).sqrt().max(1e-12)
            })
            .collect();

        Ok(Self { rest_mean: mu_rest.iter().copied().collect(), mi_mean: mu_mi.iter().copied().collect(), scale })
    }

    fn distance(&self, features: &[f64], centroid: &[f64]) -> f64 {
        features
            .iter()
            .zip(centroid)
            .zip(&self.scale)
            .map(|((x, c), s)| ((x - c) / s).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

impl Classifier for NearestMean {
    fn input_dim(&self) -> usize {
        self.rest_mean.len()
    }

    fn classify(&self, features: &[f64]) -> Prediction {
        let d_rest = self.distance(features, &self.rest_mean);
        let d_mi = self.distance(features, &self.mi_mean);
        // softmax over (-d_rest, -d_mi)
        let margin = d_rest - d_mi;
        prediction_from_probability(sigmoid(margin), margin)
    }

    fn params(&self) -> ClassifierParams {
        ClassifierParams::NearestMean {
            rest_mean: self.rest_mean.clone(),
            mi_mean: self.mi_mean.clone(),
            scale: self.scale.clone(),
        }
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Classifier bound to the feature layout it was trained on.
pub struct ClassifierAdapter {
    inner: Box<dyn Classifier>,
    layout_fingerprint: u64,
}

impl ClassifierAdapter {
    /// Wrap a classifier with the fingerprint of its training layout
    #[must_use]
    pub fn new(inner: Box<dyn Classifier>, layout_fingerprint: u64) -> Self {
        Self { inner, layout_fingerprint }
    }

    /// Adapter for a model's classifier and feature layout
    #[must_use]
    pub fn from_model(model: &Model) -> Self {
        Self::new(model.classifier.build(), model.feature_layout().fingerprint())
    }

    /// Expected dimensionality
    pub fn input_dim(&self) -> usize {
        self.inner.input_dim()
    }

    /// Classify one feature vector.
    ///
    /// # Errors
    ///
    /// - `DimensionMismatch` on a wrong vector length
    /// - `ModelIncompatible` if the vector follows a different feature order
    pub fn predict(&self, features: &FeatureVector) -> PipelineResult<Prediction> {
        if features.len() != self.inner.input_dim() {
            return Err(PipelineError::DimensionMismatch { expected: self.inner.input_dim(), actual: features.len() });
        }
        if features.layout_fingerprint() != self.layout_fingerprint {
            return Err(PipelineError::model_incompatible(format!(
                "feature layout {:016x} differs from model layout {:016x}",
                features.layout_fingerprint(),
                self.layout_fingerprint
            )));
        }
        self.inner.predict(features.as_slice())
    }
}

impl std::fmt::Debug for ClassifierAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierAdapter")
            .field("input_dim", &self.inner.input_dim())
            .field("layout_fingerprint", &format_args!("{:016x}", self.layout_fingerprint))
            .finish()
    }
}
