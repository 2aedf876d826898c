//! Feature extraction for motor-imagery classification
//!
//! Produces the fixed-order vector `[csp log-variances..., ar coefficients...]`
//! from a filtered window. The layout fingerprint travels with every vector so
//! the classifier can refuse features computed under a different layout.

use gravity_bci_core::{
    CspProjection, FeatureLayout, FeatureVector, Model, PipelineError, PipelineResult, Window,
};

use super::autoregressive::{variance, ArEstimator};
use super::csp::log_variance_features;

/// Reject a window if any channel's variance is at or below `min_variance`.
///
/// # Errors
///
/// `DegenerateWindow` naming the first offending channel.
pub fn check_channel_variance(window: &Window, min_variance: f64) -> PipelineResult<()> {
    check_recent_variance(window, window.len(), min_variance)
}

/// Like [`check_channel_variance`], restricted to the newest `recent` samples
/// of each channel.
pub fn check_recent_variance(window: &Window, recent: usize, min_variance: f64) -> PipelineResult<()> {
    let from = window.len().saturating_sub(recent);
    for (channel, samples) in window.channels().enumerate() {
        let var = variance(&samples[from..]);
        if !(var > min_variance) {
            return Err(PipelineError::DegenerateWindow { channel, variance: var, threshold: min_variance });
        }
    }
    Ok(())
}

/// CSP + AR feature extractor
#[derive(Clone, Debug)]
pub struct FeatureExtractor {
    csp: CspProjection,
    ar: ArEstimator,
    min_channel_variance: f64,
    channel_count: usize,
    layout: FeatureLayout,
    fingerprint: u64,
}

impl FeatureExtractor {
    /// Create an extractor for the given montage.
    ///
    /// # Errors
    ///
    /// `ModelIncompatible` if a CSP filter does not have one weight per channel.
    pub fn new(
        csp: CspProjection,
        channel_labels: &[String],
        ar: ArEstimator,
        min_channel_variance: f64,
    ) -> PipelineResult<Self> {
        let channel_count = channel_labels.len();
        if csp.filters.iter().any(|row| row.len() != channel_count) {
            return Err(PipelineError::model_incompatible(format!(
                "CSP filters do not match {channel_count} channels"
            )));
        }
        let layout = FeatureLayout::new(csp.components(), channel_labels, ar.order());
        let fingerprint = layout.fingerprint();
        Ok(Self { csp, ar, min_channel_variance, channel_count, layout, fingerprint })
    }

    /// Extractor reproducing a model's training-time features
    pub fn from_model(model: &Model) -> PipelineResult<Self> {
        Self::new(
            model.csp.clone(),
            &model.signal.channel_labels,
            ArEstimator::from(model.ar),
            model.min_channel_variance,
        )
    }

    /// Ordered feature names
    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    /// Fingerprint stamped on every produced vector
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Feature dimensionality
    pub fn feature_count(&self) -> usize {
        self.layout.len()
    }

    /// Extract features from a filtered window.
    ///
    /// # Errors
    ///
    /// - `ChannelCountMismatch` if the window width differs from the montage
    /// - `DegenerateWindow` if a channel is (near) flat
    pub fn extract(&self, window: &Window) -> PipelineResult<FeatureVector> {
        if window.channel_count() != self.channel_count {
            return Err(PipelineError::ChannelCountMismatch {
                expected: self.channel_count,
                actual: window.channel_count(),
            });
        }
        check_channel_variance(window, self.min_channel_variance)?;

        let mut values = Vec::with_capacity(self.layout.len());
        values.extend(log_variance_features(&self.csp, window));
        for (channel, samples) in window.channels().enumerate() {
            values.extend(self.ar.fit(channel, samples, self.min_channel_variance)?);
        }

        debug_assert_eq!(values.len(), self.layout.len());
        Ok(FeatureVector::new(values, self.fingerprint))
    }
}
