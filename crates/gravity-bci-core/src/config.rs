//! Session configuration
//!
//! [`BciConfig`] is the flat, user-facing configuration surface loaded from
//! JSON. The pipeline consumes three projections of it:
//!
//! - [`SignalConfig`]: sample rate, channel order, window/stride and passband
//!   (stored verbatim in the model artifact),
//! - [`FeatureConfig`]: AR and CSP settings,
//! - [`SmoothingConfig`]: decision smoother parameters.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Default electrode montage (10-20 positions over the motor cortex)
pub const DEFAULT_CHANNELS: [&str; 8] = ["C3", "C4", "Cz", "FC3", "FC4", "CP3", "CP4", "Pz"];

// ============================================================================
// Enumerations
// ============================================================================

/// Bandpass edges in Hz.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Passband {
    /// High-pass corner (Hz)
    pub low_hz: f64,
    /// Low-pass corner (Hz)
    pub high_hz: f64,
}

impl Default for Passband {
    fn default() -> Self {
        Self { low_hz: 8.0, high_hz: 30.0 }
    }
}

/// Autoregressive coefficient estimator.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArMethod {
    /// Ordinary least squares on the lagged design matrix
    #[default]
    LeastSquares,
    /// Burg's maximum-entropy recursion
    Burg,
}

/// Classifier family fitted by the trainer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Shrinkage linear discriminant analysis
    #[default]
    Lda,
    /// Nearest class mean on standardized features
    NearestMean,
}

// ============================================================================
// Full Configuration
// ============================================================================

/// Complete session configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BciConfig {
    /// Nominal sample rate (Hz)
    pub sample_rate_hz: f64,
    /// Channel labels in stream order
    pub channel_labels: Vec<String>,
    /// Analysis window length (ms)
    pub window_length_ms: u32,
    /// Step between consecutive windows (ms)
    pub stride_ms: u32,
    /// Bandpass edges
    pub passband: Passband,
    /// Biquad sections per high-pass and per low-pass half
    pub filter_sections: usize,
    /// AR model order per channel
    pub ar_order: usize,
    /// AR estimator
    pub ar_method: ArMethod,
    /// Number of CSP components kept
    pub csp_components: usize,
    /// Channel variance (µV²) below which a window is degenerate
    pub min_channel_variance: f64,
    /// Smoother history length K
    pub smoothing_window_k: usize,
    /// Fraction of the last K predictions required to flip
    pub smoothing_majority_fraction: f64,
    /// Minimum mean confidence required to flip
    pub confidence_threshold: f64,
    /// Ticks that must pass after a flip before the next one
    pub min_dwell_ticks: u32,
    /// Consecutive skipped ticks that raise a data-quality warning
    pub max_consecutive_skipped_ticks: u32,
    /// Timeout of a single blocking source read (ms)
    pub acquisition_timeout_ms: u32,
    /// Silence after which the source counts as disconnected (ms)
    pub max_source_gap_ms: u32,
    /// Classifier family used by the trainer
    pub classifier: ClassifierKind,
    /// LDA covariance shrinkage toward a scaled identity, in [0, 1]
    pub lda_shrinkage: f64,
    /// Folds of blocked cross-validation run by the trainer
    pub cv_folds: usize,
}

impl Default for BciConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 250.0,
            channel_labels: DEFAULT_CHANNELS.iter().map(|s| (*s).to_string()).collect(),
            window_length_ms: 1000,
            stride_ms: 250,
            passband: Passband::default(),
            filter_sections: 2,
            ar_order: 6,
            ar_method: ArMethod::LeastSquares,
            csp_components: 4,
            min_channel_variance: 1e-9,
            smoothing_window_k: 3,
            smoothing_majority_fraction: 0.67,
            confidence_threshold: 0.6,
            min_dwell_ticks: 0,
            max_consecutive_skipped_ticks: 5,
            acquisition_timeout_ms: 500,
            max_source_gap_ms: 5000,
            classifier: ClassifierKind::Lda,
            lda_shrinkage: 0.1,
            cv_folds: 5,
        }
    }
}

impl BciConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::invalid_config(format!("malformed configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Number of channels
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channel_labels.len()
    }

    /// Signal-path projection
    #[must_use]
    pub fn signal(&self) -> SignalConfig {
        SignalConfig {
            sample_rate_hz: self.sample_rate_hz,
            channel_labels: self.channel_labels.clone(),
            window_length_ms: self.window_length_ms,
            stride_ms: self.stride_ms,
            passband: self.passband,
            filter_sections: self.filter_sections,
        }
    }

    /// Feature-extraction projection
    #[must_use]
    pub fn features(&self) -> FeatureConfig {
        FeatureConfig {
            ar_order: self.ar_order,
            ar_method: self.ar_method,
            csp_components: self.csp_components,
            min_channel_variance: self.min_channel_variance,
        }
    }

    /// Smoother projection
    #[must_use]
    pub fn smoothing(&self) -> SmoothingConfig {
        SmoothingConfig {
            window_k: self.smoothing_window_k,
            majority_fraction: self.smoothing_majority_fraction,
            confidence_threshold: self.confidence_threshold,
            min_dwell_ticks: self.min_dwell_ticks,
        }
    }

    /// Validate every field, returning the first problem found.
    pub fn validate(&self) -> PipelineResult<()> {
        let signal = self.signal();
        signal.validate()?;
        self.features().validate(&signal)?;
        self.smoothing().validate()?;

        if self.max_consecutive_skipped_ticks == 0 {
            return Err(PipelineError::invalid_config(
                "max_consecutive_skipped_ticks must be at least 1",
            ));
        }
        if self.acquisition_timeout_ms == 0 {
            return Err(PipelineError::invalid_config("acquisition_timeout_ms must be positive"));
        }
        if self.max_source_gap_ms < self.acquisition_timeout_ms {
            return Err(PipelineError::invalid_config(format!(
                "max_source_gap_ms ({}) is shorter than acquisition_timeout_ms ({})",
                self.max_source_gap_ms, self.acquisition_timeout_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.lda_shrinkage) {
            return Err(PipelineError::invalid_config(format!(
                "lda_shrinkage {} outside [0, 1]",
                self.lda_shrinkage
            )));
        }
        if self.cv_folds < 2 {
            return Err(PipelineError::invalid_config("cv_folds must be at least 2"));
        }
        Ok(())
    }
}

// ============================================================================
// Projections
// ============================================================================

/// Signal-path parameters shared by training and live inference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Nominal sample rate (Hz)
    pub sample_rate_hz: f64,
    /// Channel labels in stream order
    pub channel_labels: Vec<String>,
    /// Analysis window length (ms)
    pub window_length_ms: u32,
    /// Step between windows (ms)
    pub stride_ms: u32,
    /// Bandpass edges
    pub passband: Passband,
    /// Biquad sections per half
    pub filter_sections: usize,
}

impl SignalConfig {
    /// Number of channels
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channel_labels.len()
    }

    /// Samples per window
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn window_samples(&self) -> usize {
        (f64::from(self.window_length_ms) * self.sample_rate_hz / 1000.0).round() as usize
    }

    /// Samples per stride; fractional when the stride does not land on a
    /// sample boundary (62.5 at 250 Hz / 250 ms).
    pub fn stride_samples(&self) -> f64 {
        f64::from(self.stride_ms) * self.sample_rate_hz / 1000.0
    }

    /// Nyquist frequency (Hz)
    pub fn nyquist_hz(&self) -> f64 {
        self.sample_rate_hz / 2.0
    }

    /// Validate rate, montage, window geometry and passband.
    pub fn validate(&self) -> PipelineResult<()> {
        if !self.sample_rate_hz.is_finite() || self.sample_rate_hz <= 0.0 {
            return Err(PipelineError::invalid_config(format!(
                "sample_rate_hz must be positive, got {}",
                self.sample_rate_hz
            )));
        }
        if self.channel_labels.is_empty() {
            return Err(PipelineError::invalid_config("at least one channel is required"));
        }
        for (i, label) in self.channel_labels.iter().enumerate() {
            if self.channel_labels[..i].contains(label) {
                return Err(PipelineError::invalid_config(format!("duplicate channel label {label}")));
            }
        }
        if self.window_length_ms == 0 || self.stride_ms == 0 {
            return Err(PipelineError::invalid_config("window_length_ms and stride_ms must be positive"));
        }
        if self.stride_ms > self.window_length_ms {
            return Err(PipelineError::invalid_config(format!(
                "stride_ms ({}) exceeds window_length_ms ({})",
                self.stride_ms, self.window_length_ms
            )));
        }
        if self.stride_samples() < 1.0 {
            return Err(PipelineError::invalid_config("stride is shorter than one sample"));
        }
        if self.filter_sections == 0 {
            return Err(PipelineError::invalid_config("filter_sections must be at least 1"));
        }

        let Passband { low_hz, high_hz } = self.passband;
        if low_hz <= 0.0 || !low_hz.is_finite() {
            return Err(PipelineError::invalid_config(format!("passband low_hz {low_hz} must be positive")));
        }
        if low_hz >= high_hz {
            return Err(PipelineError::invalid_config(format!(
                "passband low_hz {low_hz} must be below high_hz {high_hz}"
            )));
        }
        if high_hz >= self.nyquist_hz() {
            return Err(PipelineError::invalid_config(format!(
                "passband high_hz {high_hz} at or above Nyquist {} Hz",
                self.nyquist_hz()
            )));
        }
        Ok(())
    }
}

/// Feature-extraction parameters.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// AR model order
    pub ar_order: usize,
    /// AR estimator
    pub ar_method: ArMethod,
    /// CSP components kept
    pub csp_components: usize,
    /// Degenerate-window variance threshold (µV²)
    pub min_channel_variance: f64,
}

impl FeatureConfig {
    /// Validate against the signal geometry
    pub fn validate(&self, signal: &SignalConfig) -> PipelineResult<()> {
        if self.ar_order == 0 {
            return Err(PipelineError::invalid_config("ar_order must be at least 1"));
        }
        if signal.window_samples() <= 2 * self.ar_order {
            return Err(PipelineError::invalid_config(format!(
                "window of {} samples too short for AR order {}",
                signal.window_samples(),
                self.ar_order
            )));
        }
        if self.csp_components == 0 || self.csp_components > signal.channel_count() {
            return Err(PipelineError::invalid_config(format!(
                "csp_components {} must be within 1..={}",
                self.csp_components,
                signal.channel_count()
            )));
        }
        if !(self.min_channel_variance >= 0.0) {
            return Err(PipelineError::invalid_config("min_channel_variance must be non-negative"));
        }
        Ok(())
    }
}

/// Shortfall of the enforced majority below the configured one that still
/// counts as exact (covers 0.67 written for two thirds).
pub const ROUNDING_SLACK: f64 = 0.01;

/// Decision smoother parameters.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// History length K
    pub window_k: usize,
    /// Fraction of K needed to flip
    pub majority_fraction: f64,
    /// Minimum mean confidence of the supporting votes
    pub confidence_threshold: f64,
    /// Ticks to wait after a flip before flipping again
    pub min_dwell_ticks: u32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        BciConfig::default().smoothing()
    }
}

impl SmoothingConfig {
    /// Votes required to flip: `round(fraction × K)` clamped to `1..=K`.
    ///
    /// Rounding to the nearest vote can land below the configured fraction:
    /// 0.67 of 3 needs 2 votes (0.667), and 0.65 of 5 needs only 3 (0.6).
    /// [`effective_fraction`](Self::effective_fraction) reports the ratio
    /// actually enforced.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn required_votes(&self) -> usize {
        let raw = (self.majority_fraction * self.window_k as f64).round() as usize;
        raw.clamp(1, self.window_k.max(1))
    }

    /// `required_votes / K`, the majority actually enforced
    #[allow(clippy::cast_precision_loss)]
    pub fn effective_fraction(&self) -> f64 {
        self.required_votes() as f64 / self.window_k.max(1) as f64
    }

    /// Whether rounding relaxes the majority by more than `ROUNDING_SLACK`.
    pub fn rounds_below_fraction(&self) -> bool {
        self.effective_fraction() < self.majority_fraction - ROUNDING_SLACK
    }

    /// Validate ranges
    pub fn validate(&self) -> PipelineResult<()> {
        if self.window_k == 0 {
            return Err(PipelineError::invalid_config("smoothing_window_k must be at least 1"));
        }
        if !(self.majority_fraction > 0.0 && self.majority_fraction <= 1.0) {
            return Err(PipelineError::invalid_config(format!(
                "smoothing_majority_fraction {} outside (0, 1]",
                self.majority_fraction
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(PipelineError::invalid_config(format!(
                "confidence_threshold {} outside [0, 1]",
                self.confidence_threshold
            )));
        }
        Ok(())
    }
}
