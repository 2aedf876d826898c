//! Gravity BCI Native - host signal processing, classification and live runtime
//!
//! This crate turns a multi-channel EEG stream into a debounced binary
//! control signal (REST vs motor imagery):
//! - Ring buffer, bandpass filtering with carried state, window cadence
//! - CSP log-variance and autoregressive features
//! - Linear discriminant / nearest-mean classifiers and the offline trainer
//! - The tick-by-tick pipeline and the tokio live session
//! - Replay, synthetic and LSL sample sources
//!
//! # Modules
//!
//! - [`processing`]: Ring buffer, filters, windowing
//! - [`ml`]: Features, classifiers, training and evaluation
//! - [`session`]: Live loop controller and async session
//! - [`bridge`]: Sample sources (replay, synthetic, LSL)
//! - [`simulation`]: Synthetic motor-imagery EEG
//!
//! # Example
//!
//! ```rust,ignore
//! use gravity_bci_native::{Session, SyntheticSource, artifact};
//!
//! let model = artifact::load_model("model.json")?;
//! let session = Session::new(model, config)?;
//! let handle = session.start(source)?;
//! let control = handle.control();
//!
//! // once per rendered frame
//! if control.is_airborne() { /* thrust */ }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod artifact;
pub mod bridge;
pub mod ml;
pub mod processing;
pub mod recording;
pub mod session;
pub mod simulation;

// Re-export key types
pub use bridge::{LslSource, ReplaySource, SampleSource, SourceError, SourceRead, SyntheticSource};
pub use ml::{evaluate, EvaluationReport, Trainer, TrainingError};
pub use recording::LabeledRecording;
pub use session::{
    ControlReader, Pipeline, PipelineSettings, Session, SessionError, SessionEvent, SessionHandle, SessionSummary,
    TickOutcome, TickReport,
};
pub use simulation::{SyntheticEeg, SyntheticEegConfig, TrialProtocol};
