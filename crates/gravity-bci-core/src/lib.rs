//! Gravity BCI Core - shared types for the motor-imagery control pipeline
//!
//! This crate holds everything that is pure data or pure logic: the sample and
//! window types, configuration, the error taxonomy, the model artifact schema
//! and the decision smoother. Signal processing, I/O and concurrency live in
//! `gravity-bci-native`.
//!
//! # Modules
//!
//! - [`types`]: Samples, windows, predictions, control state, feature layout
//! - [`config`]: Session configuration and its validated projections
//! - [`error`]: Pipeline error taxonomy and data-quality warnings
//! - [`model`]: Offline-fitted model artifact
//! - [`smoother`]: Hysteresis over per-window predictions
//!
//! # Example
//!
//! ```rust
//! use gravity_bci_core::{DecisionSmoother, MindState, Prediction, SmoothingConfig};
//!
//! let mut smoother = DecisionSmoother::new(SmoothingConfig::default());
//! let mi = Prediction::new(MindState::MotorImagery, 0.9, 2.0);
//!
//! smoother.update(&mi);
//! let step = smoother.update(&mi);
//! assert!(step.flipped);
//! assert!(step.control.is_airborne());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod model;
pub mod smoother;
pub mod types;

// Re-export commonly used types at crate root
pub use config::{
    ArMethod, BciConfig, ClassifierKind, FeatureConfig, Passband, SignalConfig, SmoothingConfig,
};
pub use error::{DataQualityWarning, PipelineError, PipelineResult, SkipReason};
pub use model::{ArSettings, ClassifierParams, CspProjection, Model, TrainingSummary, MODEL_FORMAT_VERSION};
pub use smoother::{DecisionSmoother, SmootherStep};
pub use types::{ControlState, FeatureLayout, FeatureVector, MindState, Prediction, Sample, Window};
