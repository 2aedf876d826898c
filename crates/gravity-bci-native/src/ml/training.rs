//! Offline trainer and evaluation
//!
//! The trainer windows a labeled recording through the same [`SignalChain`]
//! and [`WindowSchedule`] as the live pipeline, keeps windows whose samples
//! all share one label, fits CSP on the filtered windows, extracts CSP + AR
//! features and fits the configured classifier. Blocked k-fold
//! cross-validation (contiguous folds with a purge gap around the test block)
//! estimates accuracy without leaking overlapping windows.

use gravity_bci_core::{
    ArSettings, BciConfig, ClassifierKind, CspProjection, MindState, Model, PipelineError, TrainingSummary,
    Window, MODEL_FORMAT_VERSION,
};
use thiserror::Error;
use tracing::{debug, info};

use super::autoregressive::ArEstimator;
use super::classifier::{Classifier, LinearDiscriminant, NearestMean};
use super::csp::fit_csp;
use super::features::{check_channel_variance, FeatureExtractor};
use crate::processing::windowing::{SignalChain, WindowSchedule};
use crate::recording::LabeledRecording;
use crate::session::controller::{Pipeline, PipelineSettings, TickOutcome};

/// Training errors
#[derive(Error, Debug)]
pub enum TrainingError {
    /// Too few usable windows of one class
    #[error("Not enough {state} windows: got {got}, need {need}")]
    InsufficientWindows {
        /// Class lacking data
        state: MindState,
        /// Windows available
        got: usize,
        /// Windows required
        need: usize,
    },

    /// Samples and labels differ in length
    #[error("Recording has {samples} samples but {labels} labels")]
    LabelCountMismatch {
        /// Number of samples
        samples: usize,
        /// Number of labels
        labels: usize,
    },

    /// Data width differs from the montage
    #[error("Channel mismatch: expected {expected}, got {actual}")]
    ChannelMismatch {
        /// Expected channel count
        expected: usize,
        /// Actual channel count
        actual: usize,
    },

    /// More CSP components requested than channels
    #[error("Cannot keep {components} CSP components from {channels} channels")]
    InvalidComponents {
        /// Requested components
        components: usize,
        /// Available channels
        channels: usize,
    },

    /// A matrix that must be positive definite is not
    #[error("{matrix} is singular")]
    SingularMatrix {
        /// Which matrix
        matrix: &'static str,
    },

    /// Pipeline error raised while windowing or extracting features
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Result type for training operations
pub type TrainingResult<T> = Result<T, TrainingError>;

/// A filtered window with its class
#[derive(Clone, Debug)]
struct LabeledWindow {
    filtered: Window,
    state: MindState,
}

/// CSP, extractor and classifier fitted on one training set
struct FittedModel {
    csp: CspProjection,
    extractor: FeatureExtractor,
    classifier: Box<dyn Classifier>,
    discarded: usize,
}

impl FittedModel {
    /// `(correct, scored)` on a set of windows; degenerate windows are not scored
    fn score<'a>(&self, windows: impl IntoIterator<Item = &'a LabeledWindow>) -> TrainingResult<(usize, usize)> {
        let mut correct = 0;
        let mut scored = 0;
        for window in windows {
            let features = match self.extractor.extract(&window.filtered) {
                Ok(features) => features,
                Err(PipelineError::DegenerateWindow { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            let prediction = self.classifier.predict(features.as_slice())?;
            scored += 1;
            correct += usize::from(prediction.state == window.state);
        }
        Ok((correct, scored))
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}

/// Fits [`Model`] artifacts from labeled recordings.
#[derive(Clone, Debug)]
pub struct Trainer {
    config: BciConfig,
}

impl Trainer {
    /// Create a trainer.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn new(config: BciConfig) -> TrainingResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use
    pub fn config(&self) -> &BciConfig {
        &self.config
    }

    /// The configuration with the recording's montage and sample rate.
    fn config_for(&self, recording: &LabeledRecording) -> TrainingResult<BciConfig> {
        let config = BciConfig {
            channel_labels: recording.channel_labels().to_vec(),
            sample_rate_hz: recording.sample_rate_hz(),
            ..self.config.clone()
        };
        config.validate()?;
        Ok(config)
    }

    /// Fit a model on a recording.
    ///
    /// # Errors
    ///
    /// - `InsufficientWindows` when a class has fewer than two clean windows
    /// - `SingularMatrix` when CSP or LDA cannot be fitted
    /// - `Pipeline` for configuration problems
    pub fn fit(&self, recording: &LabeledRecording) -> TrainingResult<Model> {
        let config = self.config_for(recording)?;
        let (windows, mixed) = collect_windows(&config, recording)?;

        let rest_windows = windows.iter().filter(|w| w.state == MindState::Rest).count();
        let mi_windows = windows.len() - rest_windows;
        info!(
            rest = rest_windows,
            mi = mi_windows,
            discarded = mixed,
            "Collected training windows from {:.1} s of data",
            recording.duration_s()
        );

        let fitted = fit_windows(&config, windows.iter())?;
        let (correct, scored) = fitted.score(&windows)?;
        let training_accuracy = ratio(correct, scored);
        let cross_validation_accuracy = cross_validate(&config, &windows)?;

        info!(
            training_accuracy,
            cross_validation_accuracy = cross_validation_accuracy.unwrap_or(f64::NAN),
            "Model fitted"
        );

        let signal = config.signal();
        let model = Model {
            format_version: MODEL_FORMAT_VERSION,
            signal,
            ar: ArSettings { order: config.ar_order, method: config.ar_method },
            min_channel_variance: config.min_channel_variance,
            feature_names: fitted.extractor.layout().names().to_vec(),
            classifier: fitted.classifier.params(),
            csp: fitted.csp,
            summary: TrainingSummary {
                rest_windows,
                mi_windows,
                discarded_windows: mixed + fitted.discarded,
                training_accuracy,
                cross_validation_accuracy,
            },
        };
        model.validate()?;
        Ok(model)
    }
}

/// Window a recording at live cadence, keeping single-label, non-flat windows.
/// Returns the windows and the number discarded.
fn collect_windows(config: &BciConfig, recording: &LabeledRecording) -> TrainingResult<(Vec<LabeledWindow>, usize)> {
    let signal = config.signal();
    let mut chain = SignalChain::new(&signal)?;
    let mut schedule = WindowSchedule::from_signal(&signal);

    let mut windows = Vec::new();
    let mut discarded = 0;
    for sample in recording.samples() {
        chain.push(sample)?;
        if !schedule.poll(chain.total_pushed()) {
            continue;
        }
        let window = chain.next_window()?;
        let span = window.raw.start_index()..window.raw.end_index();
        match recording.span_label(span) {
            Some(state) if check_channel_variance(&window.raw, config.min_channel_variance).is_ok() => {
                windows.push(LabeledWindow { filtered: window.filtered, state });
            }
            _ => discarded += 1,
        }
    }
    Ok((windows, discarded))
}

/// Fit CSP, features and classifier on a set of windows.
fn fit_windows<'a>(
    config: &BciConfig,
    windows: impl Iterator<Item = &'a LabeledWindow> + Clone,
) -> TrainingResult<FittedModel> {
    let rest: Vec<&Window> = windows.clone().filter(|w| w.state == MindState::Rest).map(|w| &w.filtered).collect();
    let mi: Vec<&Window> =
        windows.clone().filter(|w| w.state == MindState::MotorImagery).map(|w| &w.filtered).collect();
    for (state, got) in [(MindState::Rest, rest.len()), (MindState::MotorImagery, mi.len())] {
        if got < 2 {
            return Err(TrainingError::InsufficientWindows { state, got, need: 2 });
        }
    }

    let csp = fit_csp(&rest, &mi, config.csp_components)?;
    let extractor = FeatureExtractor::new(
        csp.clone(),
        &config.channel_labels,
        ArEstimator::new(config.ar_order, config.ar_method),
        config.min_channel_variance,
    )?;

    let mut rest_rows = Vec::new();
    let mut mi_rows = Vec::new();
    let mut discarded = 0;
    for window in windows {
        match extractor.extract(&window.filtered) {
            Ok(features) => match window.state {
                MindState::Rest => rest_rows.push(features.into_values()),
                MindState::MotorImagery => mi_rows.push(features.into_values()),
            },
            Err(PipelineError::DegenerateWindow { channel, .. }) => {
                debug!(channel, "Discarding degenerate training window");
                discarded += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let classifier: Box<dyn Classifier> = match config.classifier {
        ClassifierKind::Lda => Box::new(LinearDiscriminant::fit(&rest_rows, &mi_rows, config.lda_shrinkage)?),
        ClassifierKind::NearestMean => Box::new(NearestMean::fit(&rest_rows, &mi_rows)?),
    };

    Ok(FittedModel { csp, extractor, classifier, discarded })
}

/// Blocked k-fold accuracy; `None` if no fold could be evaluated.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn cross_validate(config: &BciConfig, windows: &[LabeledWindow]) -> TrainingResult<Option<f64>> {
    let folds = config.cv_folds;
    let n = windows.len();
    if n < 2 * folds {
        debug!(windows = n, folds, "Too few windows for cross-validation");
        return Ok(None);
    }

    let signal = config.signal();
    let purge = (signal.window_samples() as f64 / signal.stride_samples()).ceil() as usize;

    let mut correct = 0;
    let mut scored = 0;
    for fold in 0..folds {
        let start = fold * n / folds;
        let end = (fold + 1) * n / folds;
        let train = windows
            .iter()
            .enumerate()
            .filter(|(i, _)| *i + purge < start || *i >= end + purge)
            .map(|(_, w)| w);

        match fit_windows(config, train) {
            Ok(fitted) => {
                let (c, s) = fitted.score(&windows[start..end])?;
                correct += c;
                scored += s;
            }
            Err(e @ (TrainingError::InsufficientWindows { .. } | TrainingError::SingularMatrix { .. })) => {
                debug!(fold, "Skipping fold: {e}");
            }
            Err(e) => return Err(e),
        }
    }

    Ok((scored > 0).then(|| ratio(correct, scored)))
}

// ============================================================================
// Evaluation
// ============================================================================

/// Accuracy of a model replayed through the live pipeline.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvaluationReport {
    /// Ticks run
    pub ticks: u64,
    /// Decided ticks whose window carried a single label
    pub scored_windows: usize,
    /// Raw per-window accuracy on scored windows
    pub raw_accuracy: f64,
    /// Accuracy of the smoothed control state on scored windows
    pub smoothed_accuracy: f64,
    /// Ticks skipped after warm-up
    pub skipped_ticks: u64,
    /// Control-state flips
    pub flips: u64,
}

/// Replay a labeled recording through the live pipeline.
///
/// # Errors
///
/// `ModelIncompatible` if the recording montage differs from the model;
/// other non-recoverable pipeline errors.
pub fn evaluate(
    model: &Model,
    recording: &LabeledRecording,
    settings: PipelineSettings,
) -> TrainingResult<EvaluationReport> {
    model.check_compatible(
        recording.channel_count(),
        Some(recording.channel_labels()),
        recording.sample_rate_hz(),
    )?;
    let mut pipeline = Pipeline::new(model, settings)?;

    let mut report = EvaluationReport::default();
    let mut raw_correct = 0;
    let mut smoothed_correct = 0;
    let ticks = pipeline.run_offline(recording.samples(), |tick| {
        match &tick.outcome {
            TickOutcome::Decided { prediction, .. } => {
                let label = tick.window.clone().and_then(|span| recording.span_label(span));
                if let Some(label) = label {
                    report.scored_windows += 1;
                    raw_correct += usize::from(prediction.state == label);
                    smoothed_correct += usize::from(tick.control.state == label);
                }
            }
            TickOutcome::Skipped { consecutive, .. } if *consecutive > 0 => report.skipped_ticks += 1,
            TickOutcome::Skipped { .. } => {}
        }
    })?;

    report.ticks = ticks;
    report.raw_accuracy = ratio(raw_correct, report.scored_windows);
    report.smoothed_accuracy = ratio(smoothed_correct, report.scored_windows);
    report.flips = pipeline.control_state().flips;
    Ok(report)
}
