//! Feature extraction, classification and offline training
//!
//! Features are CSP log-variances followed by per-channel AR coefficients;
//! classifiers plug in behind the [`classifier::Classifier`] trait.

pub mod autoregressive;
pub mod classifier;
pub mod csp;
pub mod features;
pub mod training;

pub use classifier::{BuildClassifier, Classifier, ClassifierAdapter, LinearDiscriminant, NearestMean};
pub use features::FeatureExtractor;
pub use training::{evaluate, EvaluationReport, Trainer, TrainingError, TrainingResult};
