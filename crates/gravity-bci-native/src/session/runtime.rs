//! Async live session
//!
//! Two tasks per session:
//!
//! ```text
//! spawn_blocking: SampleSource::read_chunk ──mpsc──► pipeline task (interval = stride)
//!                                                     ├─ watch  → ControlReader (game)
//!                                                     └─ mpsc   → SessionEvent
//! ```
//!
//! The pipeline task owns the [`Pipeline`]; stop requests are only observed
//! while it waits for the next tick.

use std::time::{Duration, Instant};

use gravity_bci_core::{
    BciConfig, ControlState, DataQualityWarning, MindState, Model, PipelineError, PipelineResult, Sample,
    SkipReason,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::controller::{Pipeline, PipelineSettings, TickOutcome, TickReport};
use crate::bridge::source::{SampleSource, SourceError, SourceRead, SourceResult};

const SAMPLE_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Session failures
#[derive(Debug, Error)]
pub enum SessionError {
    /// The pipeline stopped on a fatal error
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A session task panicked or was cancelled
    #[error("Session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Out-of-band notifications for the game and the operator.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The control state flipped
    Flipped {
        /// Tick of the flip
        tick: u64,
        /// New control state
        control: ControlState,
    },
    /// A tick produced no decision
    Skipped {
        /// Skipped tick
        tick: u64,
        /// Why
        reason: SkipReason,
        /// Current run of skipped ticks
        consecutive: u32,
    },
    /// Too many consecutive ticks were skipped
    QualityWarning(DataQualityWarning),
    /// A source read timed out
    SourceStalled {
        /// Time since the last sample (ms)
        silent_ms: u64,
    },
    /// The source ran out of data
    SourceEnded,
    /// The source disconnected; the session ends with an error
    SourceDisconnected {
        /// Description reported by the source
        reason: String,
    },
}

/// Counters reported when a session ends
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSummary {
    /// Ticks run
    pub ticks: u64,
    /// Ticks that produced a decision
    pub decided: u64,
    /// Ticks skipped
    pub skipped: u64,
    /// Control flips
    pub flips: u64,
    /// Data-quality warnings raised
    pub warnings: u64,
    /// Control state when the session ended
    pub final_control: ControlState,
}

impl SessionSummary {
    fn record(&mut self, report: &TickReport) {
        self.ticks += 1;
        match &report.outcome {
            TickOutcome::Decided { step, .. } => {
                self.decided += 1;
                if step.flipped {
                    self.flips += 1;
                }
            }
            TickOutcome::Skipped { warning, .. } => {
                self.skipped += 1;
                if warning.is_some() {
                    self.warnings += 1;
                }
            }
        }
        self.final_control = report.control;
    }
}

// ============================================================================
// Game-facing reader
// ============================================================================

/// Cheap, cloneable view of the current control state.
///
/// Poll [`ControlReader::current_control_state`] once per rendered frame.
/// Confidence and tick counters are refreshed every tick, but receivers are
/// only notified when the mental state flips.
#[derive(Clone, Debug)]
pub struct ControlReader {
    rx: watch::Receiver<ControlState>,
}

impl ControlReader {
    /// Latest published control state
    pub fn current_control_state(&self) -> ControlState {
        *self.rx.borrow()
    }

    /// Latest published mental state
    pub fn current_state(&self) -> MindState {
        self.rx.borrow().state
    }

    /// Whether the game should apply upward thrust
    pub fn is_airborne(&self) -> bool {
        self.rx.borrow().is_airborne()
    }

    /// Wait for the next flip of the mental state and return the control
    /// state it produced; `None` once the session ended.
    ///
    /// Ticks that keep the state do not wake this. Flips that happen while
    /// nobody is waiting are coalesced into the latest value.
    pub async fn changed(&mut self) -> Option<ControlState> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

// ============================================================================
// Session
// ============================================================================

/// A validated model and configuration, ready to run against a source.
#[derive(Debug, Clone)]
pub struct Session {
    model: Model,
    config: BciConfig,
}

impl Session {
    /// Validate the configuration and the model.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` or `ModelIncompatible`.
    pub fn new(model: Model, config: BciConfig) -> PipelineResult<Self> {
        config.validate()?;
        model.validate()?;
        if model.signal != config.signal() {
            warn!("Signal settings in the configuration differ from the model; using the model's");
        }
        Ok(Self { model, config })
    }

    /// The model driving this session
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Check the source against the model and spawn the session tasks.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `ModelIncompatible` when the source's channel count, order or rate
    /// differ from the model.
    pub fn start<S>(self, source: S) -> PipelineResult<SessionHandle>
    where
        S: SampleSource + 'static,
    {
        let labels = source.channel_labels();
        self.model
            .check_compatible(source.channel_count(), labels.as_deref(), source.sample_rate_hz())?;

        let pipeline = Pipeline::new(&self.model, PipelineSettings::from(&self.config))?;
        let stride = Duration::from_secs_f64(f64::from(self.model.signal.stride_ms) / 1000.0);
        let read_timeout = Duration::from_millis(u64::from(self.config.acquisition_timeout_ms));
        let max_gap = Duration::from_millis(u64::from(self.config.max_source_gap_ms));

        let (samples_tx, samples_rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (control_tx, control_rx) = watch::channel(pipeline.control_state());
        let (stop_tx, stop_rx) = watch::channel(false);

        info!(
            "Starting session: {} channels @ {} Hz, window {} ms, stride {} ms",
            self.model.channel_count(),
            self.model.signal.sample_rate_hz,
            self.model.signal.window_length_ms,
            self.model.signal.stride_ms
        );

        let acquisition = {
            let events = events_tx.clone();
            let stop = stop_rx.clone();
            let acquisition = Acquisition { samples: samples_tx, events, stop, read_timeout, max_gap };
            tokio::task::spawn_blocking(move || acquisition.run(source))
        };
        let pipeline = tokio::spawn(run_pipeline(pipeline, samples_rx, control_tx, events_tx, stop_rx, stride));

        Ok(SessionHandle {
            control: ControlReader { rx: control_rx },
            events: Some(events_rx),
            stop_tx,
            pipeline,
            acquisition,
        })
    }
}

/// Handle to a running session
#[derive(Debug)]
pub struct SessionHandle {
    control: ControlReader,
    events: Option<mpsc::Receiver<SessionEvent>>,
    stop_tx: watch::Sender<bool>,
    pipeline: JoinHandle<PipelineResult<SessionSummary>>,
    acquisition: JoinHandle<SourceResult<()>>,
}

impl SessionHandle {
    /// A reader for the game loop
    pub fn control(&self) -> ControlReader {
        self.control.clone()
    }

    /// Take the event stream; `None` if already taken.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.take()
    }

    /// Ask both tasks to stop at their next boundary.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Whether the pipeline task has finished
    pub fn is_finished(&self) -> bool {
        self.pipeline.is_finished()
    }

    /// Wait for the pipeline to end (source exhausted, stop requested or a
    /// fatal error), then shut down acquisition.
    ///
    /// # Errors
    ///
    /// The fatal pipeline error, `SourceDisconnected` when the source went
    /// away, or a task failure.
    pub async fn join(self) -> Result<SessionSummary, SessionError> {
        let pipeline_result = self.pipeline.await?;
        self.stop_tx.send_replace(true);
        let acquisition_result = self.acquisition.await?;

        let summary = pipeline_result?;
        acquisition_result.map_err(PipelineError::from)?;
        info!(
            ticks = summary.ticks,
            flips = summary.flips,
            skipped = summary.skipped,
            "Session finished in state {}",
            summary.final_control.state
        );
        Ok(summary)
    }

    /// Stop, then [`SessionHandle::join`]
    pub async fn shutdown(self) -> Result<SessionSummary, SessionError> {
        self.stop();
        self.join().await
    }
}

// ============================================================================
// Tasks
// ============================================================================

struct Acquisition {
    samples: mpsc::Sender<Vec<Sample>>,
    events: mpsc::Sender<SessionEvent>,
    stop: watch::Receiver<bool>,
    read_timeout: Duration,
    max_gap: Duration,
}

impl Acquisition {
    fn run<S: SampleSource>(self, mut source: S) -> SourceResult<()> {
        let result = self.read_loop(&mut source);
        match &result {
            Ok(()) => debug!("Acquisition stopped"),
            Err(e) => {
                error!("Acquisition failed: {}", e);
                self.emit(SessionEvent::SourceDisconnected { reason: e.to_string() });
            }
        }
        result
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_loop<S: SampleSource>(&self, source: &mut S) -> SourceResult<()> {
        let mut last_data = Instant::now();
        let mut stalled = false;

        while !*self.stop.borrow() {
            match source.read_chunk(self.read_timeout)? {
                SourceRead::Samples(chunk) => {
                    if stalled {
                        info!("Source resumed after {} ms", last_data.elapsed().as_millis());
                    }
                    last_data = Instant::now();
                    stalled = false;
                    if self.samples.blocking_send(chunk).is_err() {
                        // pipeline gone
                        return Ok(());
                    }
                }
                SourceRead::Timeout => {
                    let silent = last_data.elapsed();
                    if !stalled {
                        stalled = true;
                        warn!("No samples for {} ms", silent.as_millis());
                        self.emit(SessionEvent::SourceStalled { silent_ms: silent.as_millis() as u64 });
                    }
                    if silent >= self.max_gap {
                        return Err(SourceError::Disconnected {
                            reason: format!("no samples for {} ms", silent.as_millis()),
                        });
                    }
                }
                SourceRead::EndOfStream => {
                    info!("Source reached end of stream");
                    self.emit(SessionEvent::SourceEnded);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.try_send(event).is_err() {
            debug!("Session event dropped");
        }
    }
}

async fn run_pipeline(
    mut pipeline: Pipeline,
    mut samples: mpsc::Receiver<Vec<Sample>>,
    control: watch::Sender<ControlState>,
    events: mpsc::Sender<SessionEvent>,
    mut stop: watch::Receiver<bool>,
    stride: Duration,
) -> PipelineResult<SessionSummary> {
    let mut interval = tokio::time::interval(stride);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    interval.tick().await;

    let mut summary = SessionSummary { final_control: pipeline.control_state(), ..SessionSummary::default() };
    let mut source_closed = false;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    info!("Stop requested");
                    break;
                }
                continue;
            }
        }

        loop {
            match samples.try_recv() {
                Ok(chunk) => pipeline.ingest_chunk(&chunk)?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    source_closed = true;
                    break;
                }
            }
        }
        if source_closed && !pipeline.has_new_samples() {
            break;
        }

        let report = pipeline.tick()?;
        summary.record(&report);
        control.send_if_modified(|current| {
            let flipped = current.state != report.control.state;
            *current = report.control;
            flipped
        });
        for event in tick_events(&report) {
            if events.try_send(event).is_err() {
                debug!(tick = report.tick, "Session event dropped");
            }
        }
    }

    summary.final_control = pipeline.control_state();
    Ok(summary)
}

fn tick_events(report: &TickReport) -> Vec<SessionEvent> {
    match &report.outcome {
        TickOutcome::Decided { step, .. } if step.flipped => {
            vec![SessionEvent::Flipped { tick: report.tick, control: step.control }]
        }
        TickOutcome::Decided { .. } => Vec::new(),
        TickOutcome::Skipped { reason, consecutive, warning } => {
            let mut out = vec![SessionEvent::Skipped { tick: report.tick, reason: *reason, consecutive: *consecutive }];
            if let Some(warning) = warning {
                out.push(SessionEvent::QualityWarning(warning.clone()));
            }
            out
        }
    }
}
