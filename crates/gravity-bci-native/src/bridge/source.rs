//! Blocking EEG sample sources
//!
//! A [`SampleSource`] is read from the acquisition thread. Every read is
//! bounded by a timeout so the thread can observe a stop request and measure
//! silence on the stream.

use std::time::{Duration, Instant};

use gravity_bci_core::{MindState, PipelineError, Sample};
use thiserror::Error;

use crate::recording::LabeledRecording;
use crate::simulation::SyntheticEeg;

/// Source errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// The stream is gone and will not come back
    #[error("Source disconnected: {reason}")]
    Disconnected {
        /// What the transport reported
        reason: String,
    },

    /// I/O failure on the underlying transport
    #[error("Source I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent something we cannot decode
    #[error("Source protocol error: {0}")]
    Protocol(String),
}

/// Source result type
pub type SourceResult<T> = Result<T, SourceError>;

impl From<SourceError> for PipelineError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Disconnected { reason } => Self::SourceDisconnected { reason },
            other => Self::SourceDisconnected { reason: other.to_string() },
        }
    }
}

/// Outcome of one bounded read
#[derive(Clone, Debug, PartialEq)]
pub enum SourceRead {
    /// One or more samples, oldest first
    Samples(Vec<Sample>),
    /// Nothing arrived within the timeout
    Timeout,
    /// The source is exhausted (replay finished)
    EndOfStream,
}

/// A multi-channel EEG stream read from a blocking thread.
pub trait SampleSource: Send {
    /// Values per sample
    fn channel_count(&self) -> usize;

    /// Channel labels in stream order, when the source reports them
    fn channel_labels(&self) -> Option<Vec<String>>;

    /// Nominal sample rate (Hz)
    fn sample_rate_hz(&self) -> f64;

    /// Read whatever is available, waiting at most `timeout`.
    fn read_chunk(&mut self, timeout: Duration) -> SourceResult<SourceRead>;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn channel_count(&self) -> usize {
        (**self).channel_count()
    }

    fn channel_labels(&self) -> Option<Vec<String>> {
        (**self).channel_labels()
    }

    fn sample_rate_hz(&self) -> f64 {
        (**self).sample_rate_hz()
    }

    fn read_chunk(&mut self, timeout: Duration) -> SourceResult<SourceRead> {
        (**self).read_chunk(timeout)
    }
}

// ============================================================================
// Real-time pacing
// ============================================================================

/// Releases samples at the nominal rate, measured from the first read.
#[derive(Debug)]
struct Pacer {
    sample_rate_hz: f64,
    started: Option<Instant>,
}

impl Pacer {
    fn new(sample_rate_hz: f64) -> Self {
        Self { sample_rate_hz, started: None }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn due(&mut self) -> u64 {
        let started = *self.started.get_or_insert_with(Instant::now);
        (started.elapsed().as_secs_f64() * self.sample_rate_hz).floor() as u64
    }

    /// Total samples due, sleeping up to `timeout` if none beyond `emitted` are.
    #[allow(clippy::cast_precision_loss)]
    fn wait_for(&mut self, emitted: u64, timeout: Duration) -> u64 {
        let due = self.due();
        if due > emitted {
            return due;
        }
        let next_at = Duration::from_secs_f64((emitted + 1) as f64 / self.sample_rate_hz);
        let elapsed = self.started.map_or(Duration::ZERO, |s| s.elapsed());
        std::thread::sleep(next_at.saturating_sub(elapsed).min(timeout));
        self.due()
    }
}

// ============================================================================
// Replay
// ============================================================================

/// Replays a recorded session, either as fast as it is read or paced to the
/// recording's sample rate.
#[derive(Debug)]
pub struct ReplaySource {
    channel_labels: Vec<String>,
    sample_rate_hz: f64,
    samples: Vec<Sample>,
    position: usize,
    chunk_size: usize,
    pacer: Option<Pacer>,
}

impl ReplaySource {
    /// Replay raw samples
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(channel_labels: Vec<String>, sample_rate_hz: f64, samples: Vec<Sample>) -> Self {
        let chunk_size = (sample_rate_hz / 25.0).round().max(1.0) as usize;
        Self { channel_labels, sample_rate_hz, samples, position: 0, chunk_size, pacer: None }
    }

    /// Replay a labelled recording (labels are ignored)
    pub fn from_recording(recording: &LabeledRecording) -> Self {
        Self::new(
            recording.channel_labels().to_vec(),
            recording.sample_rate_hz(),
            recording.samples().to_vec(),
        )
    }

    /// Release samples at the nominal rate instead of all at once
    #[must_use]
    pub fn paced(mut self) -> Self {
        self.pacer = Some(Pacer::new(self.sample_rate_hz));
        self
    }

    /// Maximum samples per unpaced read
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Samples not yet read
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }
}

impl SampleSource for ReplaySource {
    fn channel_count(&self) -> usize {
        self.channel_labels.len()
    }

    fn channel_labels(&self) -> Option<Vec<String>> {
        Some(self.channel_labels.clone())
    }

    fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_chunk(&mut self, timeout: Duration) -> SourceResult<SourceRead> {
        if self.position >= self.samples.len() {
            return Ok(SourceRead::EndOfStream);
        }

        let end = match self.pacer.as_mut() {
            Some(pacer) => {
                let due = pacer.wait_for(self.position as u64, timeout) as usize;
                due.min(self.samples.len())
            }
            None => (self.position + self.chunk_size).min(self.samples.len()),
        };
        if end <= self.position {
            return Ok(SourceRead::Timeout);
        }

        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(SourceRead::Samples(chunk))
    }
}

// ============================================================================
// Synthetic
// ============================================================================

/// Endless synthetic stream alternating MI and REST blocks.
#[derive(Debug)]
pub struct SyntheticSource {
    eeg: SyntheticEeg,
    block_samples: u64,
    emitted: u64,
    pacer: Option<Pacer>,
    chunk_size: usize,
}

impl SyntheticSource {
    /// Alternate REST and MI every `block_ms`, paced to real time.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(eeg: SyntheticEeg, block_ms: u32) -> Self {
        let fs = eeg.sample_rate_hz();
        let block_samples = (f64::from(block_ms) * fs / 1000.0).round().max(1.0) as u64;
        let chunk_size = (fs / 25.0).round().max(1.0) as usize;
        Self { eeg, block_samples, emitted: 0, pacer: Some(Pacer::new(fs)), chunk_size }
    }

    /// Produce a fixed chunk per read without waiting
    #[must_use]
    pub fn unpaced(mut self) -> Self {
        self.pacer = None;
        self
    }

    /// State of the next sample to be generated
    pub fn current_state(&self) -> MindState {
        if (self.emitted / self.block_samples) % 2 == 0 {
            MindState::Rest
        } else {
            MindState::MotorImagery
        }
    }

    /// Samples generated so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl SampleSource for SyntheticSource {
    fn channel_count(&self) -> usize {
        self.eeg.channel_labels().len()
    }

    fn channel_labels(&self) -> Option<Vec<String>> {
        Some(self.eeg.channel_labels().to_vec())
    }

    fn sample_rate_hz(&self) -> f64 {
        self.eeg.sample_rate_hz()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_chunk(&mut self, timeout: Duration) -> SourceResult<SourceRead> {
        let count = match self.pacer.as_mut() {
            Some(pacer) => {
                let due = pacer.wait_for(self.emitted, timeout);
                due.saturating_sub(self.emitted) as usize
            }
            None => self.chunk_size,
        };
        if count == 0 {
            return Ok(SourceRead::Timeout);
        }

        let mut chunk = Vec::with_capacity(count);
        for _ in 0..count {
            let state = self.current_state();
            chunk.push(self.eeg.next_sample(state));
            self.emitted += 1;
        }
        Ok(SourceRead::Samples(chunk))
    }
}
