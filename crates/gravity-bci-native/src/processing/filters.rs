//! Digital filters for EEG processing
//!
//! Causal Butterworth bandpass built from cascaded second-order sections
//! (transposed direct form II). The filter itself is immutable once designed;
//! all memory lives in an explicit [`FilterState`] that the caller threads
//! through [`BandpassFilter::apply`], so overlapping windows are filtered as
//! one continuous stream.

use std::collections::VecDeque;
use std::f64::consts::PI;

use gravity_bci_core::{Passband, PipelineError, PipelineResult, SignalConfig, Window};

/// Second-order section coefficients, normalized so that `a0 = 1`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BiquadCoeffs {
    /// Numerator coefficients [b0, b1, b2]
    pub b: [f64; 3],
    /// Denominator coefficients [a1, a2]
    pub a: [f64; 2],
}

impl BiquadCoeffs {
    /// Second-order lowpass with quality factor `q` (bilinear transform)
    #[must_use]
    pub fn lowpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);

        Self {
            b: [k2 * norm, 2.0 * k2 * norm, k2 * norm],
            a: [2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        }
    }

    /// Second-order highpass with quality factor `q` (bilinear transform)
    #[must_use]
    pub fn highpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);

        Self {
            b: [norm, -2.0 * norm, norm],
            a: [2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        }
    }

    /// Process one sample through this section
    #[inline]
    pub fn process(&self, delay: &mut BiquadState, input: f64) -> f64 {
        let output = self.b[0] * input + delay.z1;
        delay.z1 = self.b[1] * input - self.a[0] * output + delay.z2;
        delay.z2 = self.b[2] * input - self.a[1] * output;
        output
    }
}

/// Delay line of one second-order section
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BiquadState {
    z1: f64,
    z2: f64,
}

/// Quality factors of the second-order sections of a Butterworth filter of
/// order `2 * sections`.
#[allow(clippy::cast_precision_loss)]
fn butterworth_q(sections: usize) -> Vec<f64> {
    let order = (2 * sections) as f64;
    (0..sections)
        .map(|k| {
            let theta = (2.0 * k as f64 + 1.0) * PI / (2.0 * order);
            1.0 / (2.0 * theta.cos())
        })
        .collect()
}

// ============================================================================
// Filter State
// ============================================================================

/// Per-channel filter memory carried between windows.
///
/// Holds the delay lines of every section, the absolute index of the next
/// sample that has not been filtered, and the filtered output of the most
/// recent `history_len` samples so overlapping windows reuse it.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterState {
    delays: Vec<Vec<BiquadState>>,
    history: Vec<VecDeque<f64>>,
    history_len: usize,
    next_index: u64,
}

impl FilterState {
    /// Zeroed state for `channel_count` channels
    #[must_use]
    pub fn new(channel_count: usize, sections: usize, history_len: usize) -> Self {
        Self {
            delays: vec![vec![BiquadState::default(); sections]; channel_count],
            history: vec![VecDeque::with_capacity(history_len); channel_count],
            history_len,
            next_index: 0,
        }
    }

    /// Absolute index of the next unfiltered sample
    #[inline]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    fn channel_count(&self) -> usize {
        self.delays.len()
    }

    fn history_start(&self) -> u64 {
        let retained = self.history.first().map_or(0, VecDeque::len);
        self.next_index - retained as u64
    }

    fn clear(&mut self, next_index: u64) {
        for delays in &mut self.delays {
            delays.fill(BiquadState::default());
        }
        for history in &mut self.history {
            history.clear();
        }
        self.next_index = next_index;
    }
}

// ============================================================================
// Bandpass Filter
// ============================================================================

/// Butterworth bandpass: `sections` highpass biquads at `low_hz` followed by
/// `sections` lowpass biquads at `high_hz`.
#[derive(Clone, Debug)]
pub struct BandpassFilter {
    sections: Vec<BiquadCoeffs>,
    sample_rate: f64,
    passband: Passband,
}

impl BandpassFilter {
    /// Design the filter.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the passband is empty, non-positive, or reaches
    /// the Nyquist frequency.
    pub fn new(sample_rate: f64, passband: Passband, sections: usize) -> PipelineResult<Self> {
        let Passband { low_hz, high_hz } = passband;
        if !(sample_rate > 0.0) {
            return Err(PipelineError::invalid_config("sample rate must be positive"));
        }
        if high_hz >= sample_rate / 2.0 {
            return Err(PipelineError::invalid_config(format!(
                "passband upper edge {high_hz} Hz at or above Nyquist {} Hz",
                sample_rate / 2.0
            )));
        }
        if !(low_hz > 0.0) || low_hz >= high_hz {
            return Err(PipelineError::invalid_config(format!(
                "invalid passband {low_hz}-{high_hz} Hz"
            )));
        }
        if sections == 0 {
            return Err(PipelineError::invalid_config("bandpass needs at least one section"));
        }

        let qs = butterworth_q(sections);
        let mut coeffs: Vec<BiquadCoeffs> =
            qs.iter().map(|&q| BiquadCoeffs::highpass(sample_rate, low_hz, q)).collect();
        coeffs.extend(qs.iter().map(|&q| BiquadCoeffs::lowpass(sample_rate, high_hz, q)));

        Ok(Self { sections: coeffs, sample_rate, passband })
    }

    /// Design from the signal configuration
    pub fn from_signal(signal: &SignalConfig) -> PipelineResult<Self> {
        Self::new(signal.sample_rate_hz, signal.passband, signal.filter_sections)
    }

    /// Sample rate the coefficients were designed for
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Passband edges
    pub fn passband(&self) -> Passband {
        self.passband
    }

    /// Zeroed state sized for this filter, retaining `history_len` filtered
    /// samples per channel (normally one window length).
    #[must_use]
    pub fn initial_state(&self, channel_count: usize, history_len: usize) -> FilterState {
        FilterState::new(channel_count, self.sections.len(), history_len)
    }

    #[inline]
    fn step(&self, delays: &mut [BiquadState], input: f64) -> f64 {
        self.sections
            .iter()
            .zip(delays.iter_mut())
            .fold(input, |x, (section, delay)| section.process(delay, x))
    }

    /// Filter a window, returning the filtered window and the advanced state.
    ///
    /// Only samples at or after `state.next_index()` are run through the
    /// sections; the overlap with earlier windows is taken from the stored
    /// history. A window that does not connect to the state (a gap, or a
    /// span older than the history) restarts the filter from zero at the
    /// window start.
    ///
    /// # Errors
    ///
    /// `ChannelCountMismatch` if the window width differs from the state.
    #[allow(clippy::cast_possible_truncation)]
    pub fn apply(&self, window: &Window, state: &FilterState) -> PipelineResult<(Window, FilterState)> {
        if window.channel_count() != state.channel_count() {
            return Err(PipelineError::ChannelCountMismatch {
                expected: state.channel_count(),
                actual: window.channel_count(),
            });
        }

        let mut next = state.clone();
        if next.history_len < window.len() {
            next.history_len = window.len();
        }
        let connected = window.start_index() <= next.next_index
            && window.start_index() >= next.history_start()
            && window.end_index() >= next.next_index;
        if !connected {
            next.clear(window.start_index());
        }

        let first_new = (next.next_index - window.start_index()) as usize;
        for (ch, samples) in window.channels().enumerate() {
            let delays = &mut next.delays[ch];
            let history = &mut next.history[ch];
            for &x in &samples[first_new..] {
                let y = self.step(delays, x);
                if history.len() == next.history_len {
                    history.pop_front();
                }
                history.push_back(y);
            }
        }
        next.next_index = window.end_index();

        let skip = (window.start_index() - next.history_start()) as usize;
        let mut data = Vec::with_capacity(window.len() * window.channel_count());
        for history in &next.history {
            data.extend(history.iter().skip(skip).take(window.len()));
        }

        let filtered = Window::from_channel_major(
            window.start_index(),
            window.channel_count(),
            data,
            window.first_timestamp_s(),
            window.last_timestamp_s(),
        );
        Ok((filtered, next))
    }

    /// Filter the sample at `state.next_index()` in place, appending its
    /// output to the retained history.
    ///
    /// Feeding every sample through here keeps the state continuous however
    /// many samples arrive between two [`apply`](Self::apply) calls.
    ///
    /// # Errors
    ///
    /// `ChannelCountMismatch` if `values` differs from the state width; the
    /// state is left untouched.
    pub fn advance(&self, state: &mut FilterState, values: &[f64]) -> PipelineResult<()> {
        if values.len() != state.channel_count() {
            return Err(PipelineError::ChannelCountMismatch {
                expected: state.channel_count(),
                actual: values.len(),
            });
        }
        let history_len = state.history_len;
        for ((delays, history), &x) in state.delays.iter_mut().zip(&mut state.history).zip(values) {
            let y = self.step(delays, x);
            if history.len() == history_len {
                history.pop_front();
            }
            history.push_back(y);
        }
        state.next_index += 1;
        Ok(())
    }

    /// Filter one continuous single-channel signal from a zero state.
    #[must_use]
    pub fn filter_signal(&self, signal: &[f64]) -> Vec<f64> {
        let mut delays = vec![BiquadState::default(); self.sections.len()];
        signal.iter().map(|&x| self.step(&mut delays, x)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 250.0;

    fn sine(freq: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / FS).sin()).collect()
    }

    fn amplitude(signal: &[f64]) -> f64 {
        let rms = (signal.iter().map(|x| x * x).sum::<f64>() / signal.len() as f64).sqrt();
        rms * 2f64.sqrt()
    }

    fn bandpass() -> BandpassFilter {
        BandpassFilter::new(FS, Passband { low_hz: 8.0, high_hz: 30.0 }, 2).unwrap()
    }

    /// Filter `signal` as overlapping windows of `len` samples every `stride`
    /// samples, carrying state, and stitch the newest stride of each output.
    fn filter_windowed(filter: &BandpassFilter, signal: &[f64], len: usize, stride: usize) -> Vec<f64> {
        let mut state = filter.initial_state(1, len);
        let mut out = Vec::new();
        let mut end = len;
        while end <= signal.len() {
            let start = end - len;
            let window = Window::from_channels(start as u64, &[signal[start..end].to_vec()]);
            let (filtered, next) = filter.apply(&window, &state).unwrap();
            let fresh = if out.is_empty() { len } else { stride };
            out.extend_from_slice(&filtered.channel(0)[len - fresh..]);
            state = next;
            end += stride;
        }
        out
    }

    #[test]
    fn test_nyquist_rejected() {
        let result = BandpassFilter::new(FS, Passband { low_hz: 8.0, high_hz: 125.0 }, 2);
        assert!(matches!(result, Err(PipelineError::InvalidConfig { .. })));
        assert!(BandpassFilter::new(FS, Passband { low_hz: 0.0, high_hz: 30.0 }, 2).is_err());
        assert!(BandpassFilter::new(FS, Passband { low_hz: 30.0, high_hz: 8.0 }, 2).is_err());
    }

    #[test]
    fn test_butterworth_q_single_section() {
        let q = butterworth_q(1);
        assert!((q[0] - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn test_in_band_preserved_out_of_band_attenuated() {
        let filter = bandpass();
        let settle = 500;
        let n = 2500;

        let in_band = filter_windowed(&filter, &sine(15.0, n), 250, 50);
        assert!((amplitude(&in_band[settle..]) - 1.0).abs() < 0.05);

        for freq in [2.0, 70.0] {
            let out = filter_windowed(&filter, &sine(freq, n), 250, 50);
            assert!(amplitude(&out[settle..]) < 0.1, "{freq} Hz not attenuated");
        }
    }

    #[test]
    fn test_carried_state_matches_continuous_stream() {
        let filter = bandpass();
        let signal: Vec<f64> =
            sine(12.0, 1500).iter().zip(sine(3.0, 1500)).map(|(a, b)| a + 0.5 * b).collect();

        let continuous = filter.filter_signal(&signal);
        let windowed = filter_windowed(&filter, &signal, 250, 50);

        assert_eq!(windowed.len(), continuous.len());
        for (a, b) in windowed.iter().zip(&continuous) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_isolated_windows_differ_from_carried_state() {
        let filter = bandpass();
        let signal = sine(12.0, 600);

        let first = Window::from_channels(0, &[signal[..250].to_vec()]);
        let second = Window::from_channels(125, &[signal[125..375].to_vec()]);

        let (_, carried_state) = filter.apply(&first, &filter.initial_state(1, 250)).unwrap();
        let (carried, _) = filter.apply(&second, &carried_state).unwrap();
        let (isolated, _) = filter.apply(&second, &filter.initial_state(1, 250)).unwrap();

        let head_diff: f64 = carried.channel(0)[..50]
            .iter()
            .zip(&isolated.channel(0)[..50])
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(head_diff > 0.1, "edge transient not visible: {head_diff}");

        let reference = filter.filter_signal(&signal[..375]);
        for (a, b) in carried.channel(0).iter().zip(&reference[125..]) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_repeated_window_is_stable() {
        let filter = bandpass();
        let window = Window::from_channels(0, &[sine(10.0, 250)]);
        let (a, state) = filter.apply(&window, &filter.initial_state(1, 250)).unwrap();
        let (b, state2) = filter.apply(&window, &state).unwrap();
        assert_eq!(a, b);
        assert_eq!(state, state2);
    }

    #[test]
    fn test_advance_then_apply_reads_history() {
        let filter = bandpass();
        let signal = sine(12.0, 400);
        let mut state = filter.initial_state(1, 250);
        for &x in &signal {
            filter.advance(&mut state, &[x]).unwrap();
        }
        assert_eq!(state.next_index(), 400);

        let window = Window::from_channels(150, &[signal[150..].to_vec()]);
        let (filtered, after) = filter.apply(&window, &state).unwrap();
        assert_eq!(after, state);

        let reference = filter.filter_signal(&signal);
        for (a, b) in filtered.channel(0).iter().zip(&reference[150..]) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!(filter.advance(&mut state, &[1.0, 2.0]).is_err());
        assert_eq!(state.next_index(), 400);
    }
}
