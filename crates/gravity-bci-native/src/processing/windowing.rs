//! Window cadence and the shared raw-to-filtered signal chain
//!
//! [`WindowSchedule`] decides when a window is due from the number of samples
//! received, which keeps a fractional stride (62.5 samples at 250 Hz / 250 ms)
//! drift-free. [`SignalChain`] couples the ring buffer with the bandpass
//! filter and its carried state; both the trainer and the live pipeline read
//! windows through it so training and inference see identical signals.
//!
//! Every sample is filtered as it is pushed, so a burst of several windows
//! between two reads still leaves the filter continuous.

use gravity_bci_core::{PipelineResult, Sample, SignalConfig, Window};

use super::filters::{BandpassFilter, FilterState};
use super::ring_buffer::RingBuffer;

/// Tick cadence in sample counts.
///
/// Tick `k` is due once `window + round(k × stride)` samples have arrived.
#[derive(Clone, Debug)]
pub struct WindowSchedule {
    window_samples: usize,
    stride_samples: f64,
    next_tick: u64,
}

impl WindowSchedule {
    /// Create a schedule starting at tick 0
    #[must_use]
    pub fn new(window_samples: usize, stride_samples: f64) -> Self {
        Self { window_samples, stride_samples, next_tick: 0 }
    }

    /// Schedule for a signal configuration
    #[must_use]
    pub fn from_signal(signal: &SignalConfig) -> Self {
        Self::new(signal.window_samples(), signal.stride_samples())
    }

    /// Sample count at which tick `k` becomes due
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn due_at(&self, tick: u64) -> u64 {
        self.window_samples as u64 + (tick as f64 * self.stride_samples).round() as u64
    }

    /// Index of the next tick
    pub fn next_tick(&self) -> u64 {
        self.next_tick
    }

    /// Consume the next tick if `total_samples` reached its due count.
    pub fn poll(&mut self, total_samples: u64) -> bool {
        if total_samples >= self.due_at(self.next_tick) {
            self.next_tick += 1;
            true
        } else {
            false
        }
    }

    /// Number of windows a recording of `total_samples` yields
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn window_count(&self, total_samples: u64) -> u64 {
        if total_samples < self.window_samples as u64 {
            return 0;
        }
        let spare = (total_samples - self.window_samples as u64) as f64;
        // largest k with round(k * stride) <= spare
        let mut k = (spare / self.stride_samples).floor() as u64 + 1;
        while k > 0 && self.due_at(k) > total_samples {
            k -= 1;
        }
        k + 1
    }
}

/// A window before and after bandpass filtering.
#[derive(Clone, Debug)]
pub struct FilteredWindow {
    /// Raw samples as read from the ring buffer
    pub raw: Window,
    /// Bandpass-filtered samples
    pub filtered: Window,
}

/// Ring buffer + bandpass filter + carried filter state.
#[derive(Clone, Debug)]
pub struct SignalChain {
    buffer: RingBuffer,
    filter: BandpassFilter,
    state: FilterState,
    window_samples: usize,
}

impl SignalChain {
    /// Build the chain for a signal configuration.
    ///
    /// The buffer retains two windows so a slow reader never loses the span
    /// it is about to read.
    pub fn new(signal: &SignalConfig) -> PipelineResult<Self> {
        signal.validate()?;
        let window_samples = signal.window_samples();
        let channels = signal.channel_count();
        let filter = BandpassFilter::from_signal(signal)?;
        Ok(Self {
            buffer: RingBuffer::new(channels, 2 * window_samples)?,
            state: filter.initial_state(channels, window_samples),
            filter,
            window_samples,
        })
    }

    /// Append one sample and run it through the filter
    #[inline]
    pub fn push(&mut self, sample: &Sample) -> PipelineResult<()> {
        self.buffer.push(sample)?;
        self.filter.advance(&mut self.state, &sample.values)
    }

    /// Samples pushed so far
    #[inline]
    pub fn total_pushed(&self) -> u64 {
        self.buffer.total_pushed()
    }

    /// Samples per window
    #[inline]
    pub fn window_samples(&self) -> usize {
        self.window_samples
    }

    /// Number of channels
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.buffer.channel_count()
    }

    /// Read the newest window with its filtered counterpart.
    ///
    /// The filtered samples come from the history built up at push time; the
    /// state is only committed when both steps succeed.
    pub fn next_window(&mut self) -> PipelineResult<FilteredWindow> {
        let raw = self.buffer.read_window(self.window_samples, 0)?;
        let (filtered, state) = self.filter.apply(&raw, &self.state)?;
        self.state = state;
        Ok(FilteredWindow { raw, filtered })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gravity_bci_core::{BciConfig, PipelineError};

    #[test]
    fn test_fractional_stride_cadence() {
        let schedule = WindowSchedule::new(250, 62.5);
        assert_eq!(schedule.due_at(0), 250);
        assert_eq!(schedule.due_at(1), 313);
        assert_eq!(schedule.due_at(2), 375);
        assert_eq!(schedule.due_at(4), 500);
        assert_eq!(schedule.window_count(2500), 37);
        assert_eq!(schedule.window_count(249), 0);
        assert_eq!(schedule.window_count(250), 1);
    }

    #[test]
    fn test_poll_counts_ticks() {
        let mut schedule = WindowSchedule::new(250, 62.5);
        let ticks = (1..=2500u64).filter(|&n| schedule.poll(n)).count();
        assert_eq!(ticks, 37);
        assert_eq!(schedule.next_tick(), 37);
    }

    #[test]
    fn test_signal_chain_requires_full_window() {
        let config = BciConfig::default();
        let mut chain = SignalChain::new(&config.signal()).unwrap();
        for i in 0..249 {
            chain.push(&Sample::new(f64::from(i) / 250.0, vec![1.0; 8])).unwrap();
        }
        assert!(matches!(chain.next_window(), Err(PipelineError::InsufficientData { .. })));

        chain.push(&Sample::new(1.0, vec![1.0; 8])).unwrap();
        let window = chain.next_window().unwrap();
        assert_eq!(window.raw.len(), 250);
        assert_eq!(window.filtered.channel_count(), 8);
    }

    #[test]
    fn test_burst_between_reads_keeps_filter_continuous() {
        let config = BciConfig { channel_labels: vec!["C3".into()], ..BciConfig::default() };
        let mut chain = SignalChain::new(&config.signal()).unwrap();
        let filter = BandpassFilter::from_signal(&config.signal()).unwrap();

        let signal: Vec<f64> = (0..900)
            .map(|i| (2.0 * std::f64::consts::PI * 12.0 * f64::from(i) / 250.0).sin() + 5.0)
            .collect();
        let reference = filter.filter_signal(&signal);

        for (i, &x) in signal[..500].iter().enumerate() {
            chain.push(&Sample::new(i as f64 / 250.0, vec![x])).unwrap();
        }
        chain.next_window().unwrap();

        // more than a full window arrives before the next read
        for (i, &x) in signal.iter().enumerate().skip(500) {
            chain.push(&Sample::new(i as f64 / 250.0, vec![x])).unwrap();
        }
        let window = chain.next_window().unwrap();
        assert_eq!(window.filtered.start_index(), 650);

        for (a, b) in window.filtered.channel(0).iter().zip(&reference[650..900]) {
            assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
    }
}
