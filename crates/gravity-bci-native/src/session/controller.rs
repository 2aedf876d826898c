//! Live loop controller
//!
//! [`Pipeline`] owns every stage (ring buffer, filter state, feature
//! extractor, classifier, smoother) and runs one tick at a time:
//!
//! ```text
//! read_window → bandpass (carried state) → quality gate → CSP + AR
//!             → classifier → smoother → ControlState
//! ```
//!
//! Recoverable failures skip the tick and keep the previous control state;
//! only configuration, model and channel errors escape [`Pipeline::tick`].

use std::ops::Range;

use gravity_bci_core::{
    BciConfig, ControlState, DataQualityWarning, DecisionSmoother, Model, PipelineError, PipelineResult,
    Prediction, Sample, SkipReason, SmootherStep, SmoothingConfig,
};
use tracing::{debug, info, warn};

use crate::ml::classifier::ClassifierAdapter;
use crate::ml::features::{check_recent_variance, FeatureExtractor};
use crate::processing::windowing::{SignalChain, WindowSchedule};

/// Runtime knobs that are not part of the model.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    /// Decision smoother parameters
    pub smoothing: SmoothingConfig,
    /// Consecutive skips that raise a data-quality warning
    pub max_consecutive_skipped_ticks: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&BciConfig::default())
    }
}

impl From<&BciConfig> for PipelineSettings {
    fn from(config: &BciConfig) -> Self {
        Self { smoothing: config.smoothing(), max_consecutive_skipped_ticks: config.max_consecutive_skipped_ticks }
    }
}

/// What happened during one tick.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// A prediction was made and fed to the smoother
    Decided {
        /// Raw per-window prediction
        prediction: Prediction,
        /// Smoother update
        step: SmootherStep,
    },
    /// The tick produced no decision; the control state was retained
    Skipped {
        /// Why the tick was skipped
        reason: SkipReason,
        /// Consecutive skipped ticks, including this one
        consecutive: u32,
        /// Raised when `consecutive` reaches the configured threshold
        warning: Option<DataQualityWarning>,
    },
}

/// Result of one tick.
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    /// Tick number, starting at 0
    pub tick: u64,
    /// Absolute sample span of the analysed window, if one was read
    pub window: Option<Range<u64>>,
    /// Decision or skip
    pub outcome: TickOutcome,
    /// Control state after the tick
    pub control: ControlState,
}

impl TickReport {
    /// Whether the smoother flipped on this tick
    pub fn flipped(&self) -> bool {
        matches!(self.outcome, TickOutcome::Decided { step, .. } if step.flipped)
    }
}

/// Synchronous signal-to-decision pipeline.
#[derive(Debug)]
pub struct Pipeline {
    chain: SignalChain,
    extractor: FeatureExtractor,
    classifier: ClassifierAdapter,
    smoother: DecisionSmoother,
    schedule: WindowSchedule,
    recent_samples: usize,
    min_channel_variance: f64,
    max_skipped: u32,
    consecutive_skipped: u32,
    warmed_up: bool,
    last_tick_total: Option<u64>,
    ticks: u64,
}

impl Pipeline {
    /// Build a pipeline for a validated model.
    ///
    /// # Errors
    ///
    /// `InvalidConfig`, `ModelIncompatible` or `DimensionMismatch` if the
    /// model or settings are unusable.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(model: &Model, settings: PipelineSettings) -> PipelineResult<Self> {
        model.validate()?;
        settings.smoothing.validate()?;
        let smoothing = settings.smoothing;
        if smoothing.rounds_below_fraction() {
            warn!(
                "Majority {} of K={} rounds to {} votes; flips need only {:.2} of recent predictions",
                smoothing.majority_fraction,
                smoothing.window_k,
                smoothing.required_votes(),
                smoothing.effective_fraction()
            );
        }
        if settings.max_consecutive_skipped_ticks == 0 {
            return Err(PipelineError::invalid_config("max_consecutive_skipped_ticks must be at least 1"));
        }

        let extractor = FeatureExtractor::from_model(model)?;
        let classifier = ClassifierAdapter::from_model(model);
        if classifier.input_dim() != extractor.feature_count() {
            return Err(PipelineError::DimensionMismatch {
                expected: classifier.input_dim(),
                actual: extractor.feature_count(),
            });
        }

        let signal = &model.signal;
        let recent_samples = (signal.stride_samples().round() as usize).clamp(2, signal.window_samples());
        Ok(Self {
            chain: SignalChain::new(signal)?,
            extractor,
            classifier,
            smoother: DecisionSmoother::new(settings.smoothing),
            schedule: WindowSchedule::from_signal(signal),
            recent_samples,
            min_channel_variance: model.min_channel_variance,
            max_skipped: settings.max_consecutive_skipped_ticks,
            consecutive_skipped: 0,
            warmed_up: false,
            last_tick_total: None,
            ticks: 0,
        })
    }

    /// Push one sample into the ring buffer.
    ///
    /// # Errors
    ///
    /// `ChannelCountMismatch` for a sample of the wrong width.
    #[inline]
    pub fn ingest(&mut self, sample: &Sample) -> PipelineResult<()> {
        self.chain.push(sample)
    }

    /// Push a chunk of samples in order
    pub fn ingest_chunk(&mut self, samples: &[Sample]) -> PipelineResult<()> {
        samples.iter().try_for_each(|s| self.chain.push(s))
    }

    /// Current smoothed control state
    #[inline]
    pub fn control_state(&self) -> ControlState {
        self.smoother.control_state()
    }

    /// Samples received so far
    #[inline]
    pub fn total_samples(&self) -> u64 {
        self.chain.total_pushed()
    }

    /// Whether samples arrived since the previous tick
    pub fn has_new_samples(&self) -> bool {
        self.last_tick_total != Some(self.chain.total_pushed())
    }

    /// Current run of skipped ticks
    pub fn consecutive_skipped(&self) -> u32 {
        self.consecutive_skipped
    }

    /// Ticks run so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one tick on the newest window.
    ///
    /// # Errors
    ///
    /// Only non-recoverable errors (model/dimension mismatch); recoverable
    /// ones are reported as [`TickOutcome::Skipped`].
    pub fn tick(&mut self) -> PipelineResult<TickReport> {
        let tick = self.ticks;
        self.ticks += 1;

        let mut window = None;
        let result = self.process(&mut window);
        let outcome = match result {
            Ok((prediction, step)) => {
                self.consecutive_skipped = 0;
                if step.flipped {
                    info!(
                        tick,
                        state = %step.control.state,
                        confidence = step.control.confidence,
                        "Control state flipped"
                    );
                }
                TickOutcome::Decided { prediction, step }
            }
            Err(err) => {
                let Some(reason) = err.skip_reason() else {
                    return Err(err);
                };
                self.skip(tick, reason, &err)
            }
        };

        Ok(TickReport { tick, window, outcome, control: self.control_state() })
    }

    fn process(&mut self, window_span: &mut Option<Range<u64>>) -> PipelineResult<(Prediction, SmootherStep)> {
        let total = self.chain.total_pushed();
        if self.last_tick_total == Some(total) {
            return Err(PipelineError::SourceGap);
        }
        self.last_tick_total = Some(total);

        let window = self.chain.next_window()?;
        self.warmed_up = true;
        *window_span = Some(window.raw.start_index()..window.raw.end_index());

        check_recent_variance(&window.raw, self.recent_samples, self.min_channel_variance)?;
        let features = self.extractor.extract(&window.filtered)?;
        let prediction = self.classifier.predict(&features)?;
        let step = self.smoother.update(&prediction);
        Ok((prediction, step))
    }

    fn skip(&mut self, tick: u64, reason: SkipReason, err: &PipelineError) -> TickOutcome {
        // filling the first window is expected and not a quality problem
        if reason == SkipReason::InsufficientData && !self.warmed_up {
            debug!(tick, "Waiting for first full window: {err}");
            return TickOutcome::Skipped { reason, consecutive: 0, warning: None };
        }

        self.consecutive_skipped = self.consecutive_skipped.saturating_add(1);
        debug!(tick, consecutive = self.consecutive_skipped, "Tick skipped: {err}");

        let warning = (self.consecutive_skipped == self.max_skipped).then(|| {
            let warning = DataQualityWarning {
                consecutive_skipped: self.consecutive_skipped,
                threshold: self.max_skipped,
                last_reason: reason,
                retained: self.control_state(),
            };
            warn!(tick, "Data quality warning: {warning}");
            warning
        });

        TickOutcome::Skipped { reason, consecutive: self.consecutive_skipped, warning }
    }

    /// Feed samples and tick at sample-count cadence (tick `k` once
    /// `window + round(k × stride)` samples have arrived), calling `on_tick`
    /// after every tick. Returns the number of ticks run.
    ///
    /// # Errors
    ///
    /// Stops at the first non-recoverable error.
    pub fn run_offline<'a, I, F>(&mut self, samples: I, mut on_tick: F) -> PipelineResult<u64>
    where
        I: IntoIterator<Item = &'a Sample>,
        F: FnMut(&TickReport),
    {
        let mut ticks = 0;
        for sample in samples {
            self.ingest(sample)?;
            if self.schedule.poll(self.chain.total_pushed()) {
                let report = self.tick()?;
                on_tick(&report);
                ticks += 1;
            }
        }
        Ok(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gravity_bci_core::{
        ArMethod, ArSettings, ClassifierParams, CspProjection, FeatureLayout, MindState, TrainingSummary,
        MODEL_FORMAT_VERSION,
    };

    /// Two-channel model whose LDA says MI whenever the first CSP feature
    /// (log-variance of C3) exceeds zero.
    fn model() -> Model {
        let config = BciConfig {
            channel_labels: vec!["C3".into(), "C4".into()],
            csp_components: 1,
            ar_order: 2,
            ..BciConfig::default()
        };
        let layout = FeatureLayout::new(1, &config.channel_labels, 2);
        let mut weights = vec![0.0; layout.len()];
        weights[0] = 4.0;
        Model {
            format_version: MODEL_FORMAT_VERSION,
            signal: config.signal(),
            ar: ArSettings { order: 2, method: ArMethod::LeastSquares },
            min_channel_variance: 1e-9,
            csp: CspProjection { filters: vec![vec![1.0, 0.0]], eigenvalues: vec![0.9] },
            feature_names: layout.names().to_vec(),
            classifier: ClassifierParams::Lda { weights, bias: 0.0 },
            summary: TrainingSummary::default(),
        }
    }

    fn sample(i: u64, amplitude: f64, flat_c4: bool) -> Sample {
        let t = i as f64 / 250.0;
        let c3 = amplitude * (2.0 * std::f64::consts::PI * 12.0 * t).sin();
        let c4 = if flat_c4 { 0.0 } else { (2.0 * std::f64::consts::PI * 17.0 * t).sin() };
        Sample::new(t, vec![c3, c4])
    }

    #[test]
    fn test_warmup_skips_do_not_count() {
        let mut pipeline = Pipeline::new(&model(), PipelineSettings::default()).unwrap();
        for i in 0..100 {
            pipeline.ingest(&sample(i, 5.0, false)).unwrap();
        }
        let report = pipeline.tick().unwrap();
        assert!(matches!(
            report.outcome,
            TickOutcome::Skipped { reason: SkipReason::InsufficientData, consecutive: 0, .. }
        ));
        assert!(report.window.is_none());
    }

    #[test]
    fn test_source_gap_skips_tick() {
        let mut pipeline = Pipeline::new(&model(), PipelineSettings::default()).unwrap();
        for i in 0..300 {
            pipeline.ingest(&sample(i, 5.0, false)).unwrap();
        }
        assert!(matches!(pipeline.tick().unwrap().outcome, TickOutcome::Decided { .. }));
        let report = pipeline.tick().unwrap();
        assert!(matches!(report.outcome, TickOutcome::Skipped { reason: SkipReason::SourceGap, consecutive: 1, .. }));
        assert!(!pipeline.has_new_samples());
    }

    #[test]
    fn test_strong_rhythm_flips_to_mi() {
        let mut pipeline = Pipeline::new(&model(), PipelineSettings::default()).unwrap();
        let samples: Vec<Sample> = (0..1000).map(|i| sample(i, 5.0, false)).collect();
        let mut flips = 0;
        let ticks = pipeline.run_offline(&samples, |r| flips += u32::from(r.flipped())).unwrap();
        assert_eq!(ticks, 13);
        assert_eq!(flips, 1);
        assert_eq!(pipeline.control_state().state, MindState::MotorImagery);
    }

    #[test]
    fn test_wrong_width_is_fatal() {
        let mut pipeline = Pipeline::new(&model(), PipelineSettings::default()).unwrap();
        let err = pipeline.ingest(&Sample::new(0.0, vec![1.0; 3])).unwrap_err();
        assert_eq!(err, PipelineError::ChannelCountMismatch { expected: 2, actual: 3 });
    }

    #[test]
    fn test_flatline_holds_state_and_warns_once() {
        let settings = PipelineSettings { max_consecutive_skipped_ticks: 3, ..PipelineSettings::default() };
        let mut pipeline = Pipeline::new(&model(), settings).unwrap();
        let mut next = 0u64;
        let mut feed = |pipeline: &mut Pipeline, count: u64, flat: bool| {
            for _ in 0..count {
                pipeline.ingest(&sample(next, 5.0, flat)).unwrap();
                next += 1;
            }
        };

        feed(&mut pipeline, 250, false);
        pipeline.tick().unwrap();
        let before = pipeline.control_state();

        let mut warnings = 0;
        for _ in 0..5 {
            feed(&mut pipeline, 63, true);
            let report = pipeline.tick().unwrap();
            assert_eq!(report.control, before);
            if let TickOutcome::Skipped { warning: Some(_), .. } = report.outcome {
                warnings += 1;
            }
        }
        assert_eq!(warnings, 1);
        assert_eq!(pipeline.consecutive_skipped(), 5);

        feed(&mut pipeline, 63, false);
        assert!(matches!(pipeline.tick().unwrap().outcome, TickOutcome::Decided { .. }));
        assert_eq!(pipeline.consecutive_skipped(), 0);
    }
}
