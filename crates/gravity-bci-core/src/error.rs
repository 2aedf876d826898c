//! Error types for the Gravity BCI pipeline
//!
//! [`PipelineError`] is the single taxonomy shared by every stage. Errors are
//! split into two families:
//!
//! - per-tick recoverable errors (insufficient data, degenerate window, source
//!   gap) which the live loop absorbs by skipping the tick and retaining the
//!   previous control state, and
//! - fatal errors (invalid configuration, dimension mismatch, incompatible
//!   model, disconnected source) which abort session start or end the session.
//!
//! [`DataQualityWarning`] is not an error: it is surfaced out-of-band once too
//! many consecutive ticks have been skipped, and the session keeps running.

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ControlState;

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Errors produced by the signal, feature and decision pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// Not enough samples have been pushed to fill the requested window
    #[error("Insufficient data: {available}/{required} samples")]
    InsufficientData {
        /// Number of samples available
        available: u64,
        /// Number of samples required
        required: u64,
    },

    /// Configuration rejected at session start
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the issue
        reason: String,
    },

    /// A channel has (near) zero variance, e.g. a flatlined electrode
    #[error("Degenerate window: channel {channel} variance {variance:.3e} below {threshold:.3e}")]
    DegenerateWindow {
        /// Index of the offending channel
        channel: usize,
        /// Measured variance (µV²)
        variance: f64,
        /// Minimum accepted variance (µV²)
        threshold: f64,
    },

    /// Feature vector shape does not match the loaded model
    #[error("Dimension mismatch: model expects {expected} features, got {actual}")]
    DimensionMismatch {
        /// Dimensionality expected by the model
        expected: usize,
        /// Dimensionality received
        actual: usize,
    },

    /// Model artifact cannot be used with this session
    #[error("Model incompatible: {reason}")]
    ModelIncompatible {
        /// Description of the incompatibility
        reason: String,
    },

    /// A sample does not carry one value per session channel
    #[error("Channel count mismatch: expected {expected}, got {actual}")]
    ChannelCountMismatch {
        /// Session channel count
        expected: usize,
        /// Channel count of the offending sample
        actual: usize,
    },

    /// No new samples arrived since the previous tick
    #[error("No new samples since the previous tick")]
    SourceGap,

    /// The EEG source went away for good
    #[error("EEG source disconnected: {reason}")]
    SourceDisconnected {
        /// Description reported by the source
        reason: String,
    },
}

impl PipelineError {
    /// Create an [`PipelineError::InvalidConfig`] from any message.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig { reason: reason.into() }
    }

    /// Create a [`PipelineError::ModelIncompatible`] from any message.
    pub fn model_incompatible(reason: impl Into<String>) -> Self {
        Self::ModelIncompatible { reason: reason.into() }
    }

    /// Whether the live loop may absorb this error by skipping the tick.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.skip_reason().is_some()
    }

    /// The skip reason recorded when this error is absorbed by the live loop.
    #[must_use]
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::InsufficientData { .. } => Some(SkipReason::InsufficientData),
            Self::DegenerateWindow { channel, .. } => {
                Some(SkipReason::DegenerateWindow { channel: *channel })
            }
            Self::SourceGap => Some(SkipReason::SourceGap),
            _ => None,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

// ============================================================================
// Skipped Ticks and Quality Warnings
// ============================================================================

/// Why a tick produced no decision.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    /// The buffer does not hold a full window yet
    InsufficientData,
    /// A channel flatlined
    DegenerateWindow {
        /// Index of the offending channel
        channel: usize,
    },
    /// No samples arrived since the previous tick (source timeout)
    SourceGap,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data"),
            Self::DegenerateWindow { channel } => write!(f, "flat channel {channel}"),
            Self::SourceGap => write!(f, "source gap"),
        }
    }
}

/// Raised once the number of consecutive skipped ticks reaches the configured
/// threshold. The session continues in the retained control state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataQualityWarning {
    /// Consecutive skipped ticks at the time of the warning
    pub consecutive_skipped: u32,
    /// Configured threshold (`max_consecutive_skipped_ticks`)
    pub threshold: u32,
    /// Reason of the most recent skip
    pub last_reason: SkipReason,
    /// Control state the game keeps seeing while data is bad
    pub retained: ControlState,
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} consecutive ticks skipped (threshold {}), last: {}; holding {}",
            self.consecutive_skipped,
            self.threshold,
            self.last_reason,
            self.retained.state.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(PipelineError::InsufficientData { available: 3, required: 250 }.is_recoverable());
        assert!(PipelineError::SourceGap.is_recoverable());
        assert!(PipelineError::DegenerateWindow { channel: 2, variance: 0.0, threshold: 1e-9 }
            .is_recoverable());

        assert!(!PipelineError::invalid_config("high_hz above Nyquist").is_recoverable());
        assert!(!PipelineError::DimensionMismatch { expected: 52, actual: 40 }.is_recoverable());
        assert!(!PipelineError::model_incompatible("channel order").is_recoverable());
        assert!(!PipelineError::SourceDisconnected { reason: "eof".into() }.is_recoverable());
    }

    #[test]
    fn test_skip_reason_carries_channel() {
        let err = PipelineError::DegenerateWindow { channel: 5, variance: 0.0, threshold: 1e-9 };
        assert_eq!(err.skip_reason(), Some(SkipReason::DegenerateWindow { channel: 5 }));
    }

    #[test]
    fn test_error_messages() {
        let err = PipelineError::DimensionMismatch { expected: 52, actual: 40 };
        assert_eq!(err.to_string(), "Dimension mismatch: model expects 52 features, got 40");
    }
}
