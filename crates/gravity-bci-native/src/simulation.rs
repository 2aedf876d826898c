//! Synthetic motor-imagery EEG
//!
//! Generates class-separated multi-channel data for tests, benchmarks, the
//! `simulate` command and the synthetic live source. Three latent sources are
//! mixed into every channel with fixed random weights:
//!
//! | Source     | Rhythm      | REST   | MI              |
//! |------------|-------------|--------|-----------------|
//! | motor mu   | ~11 Hz      | strong | desynchronized  |
//! | motor beta | ~22 Hz      | weak   | enhanced        |
//! | background | ~9.5 Hz     | constant in both classes |
//!
//! plus white sensor noise. Amplitudes are jittered once per second.

use std::f64::consts::PI;

use gravity_bci_core::config::DEFAULT_CHANNELS;
use gravity_bci_core::{MindState, Sample};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::recording::LabeledRecording;

/// Draw from N(0, 1) (Box-Muller)
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

// ============================================================================
// Trial Protocol
// ============================================================================

/// Cue-based acquisition protocol: balanced, shuffled MI and REST trials
/// separated by an unrecorded ready/set countdown.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TrialProtocol {
    /// Trials of each class
    pub trials_per_class: usize,
    /// Recorded duration of one trial (ms)
    pub trial_duration_ms: u32,
    /// Countdown between trials, not recorded (ms)
    pub inter_trial_ms: u32,
}

impl Default for TrialProtocol {
    fn default() -> Self {
        Self { trials_per_class: 10, trial_duration_ms: 3000, inter_trial_ms: 2000 }
    }
}

impl TrialProtocol {
    /// Shuffled, balanced trial labels
    pub fn schedule<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<MindState> {
        let mut labels: Vec<MindState> = MindState::ALL
            .iter()
            .flat_map(|&state| std::iter::repeat(state).take(self.trials_per_class))
            .collect();
        labels.shuffle(rng);
        labels
    }

    /// Total number of trials
    pub fn trial_count(&self) -> usize {
        2 * self.trials_per_class
    }

    /// Samples recorded per trial
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn trial_samples(&self, sample_rate_hz: f64) -> usize {
        (f64::from(self.trial_duration_ms) * sample_rate_hz / 1000.0).round() as usize
    }

    /// Samples elapsing during the countdown
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn inter_trial_samples(&self, sample_rate_hz: f64) -> usize {
        (f64::from(self.inter_trial_ms) * sample_rate_hz / 1000.0).round() as usize
    }

    /// Wall-clock session length including countdowns (seconds)
    #[allow(clippy::cast_precision_loss)]
    pub fn session_duration_s(&self) -> f64 {
        let per_trial = f64::from(self.trial_duration_ms + self.inter_trial_ms) / 1000.0;
        per_trial * self.trial_count() as f64
    }
}

// ============================================================================
// Generator
// ============================================================================

/// Amplitudes (µV) and frequencies of the synthetic sources.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticEegConfig {
    /// Sample rate (Hz)
    pub sample_rate_hz: f64,
    /// Channel labels
    pub channel_labels: Vec<String>,
    /// Mu rhythm frequency (Hz)
    pub mu_hz: f64,
    /// Beta rhythm frequency (Hz)
    pub beta_hz: f64,
    /// Background alpha frequency (Hz)
    pub background_hz: f64,
    /// Mu amplitude at rest
    pub rest_mu_uv: f64,
    /// Mu amplitude during motor imagery
    pub mi_mu_uv: f64,
    /// Beta amplitude at rest
    pub rest_beta_uv: f64,
    /// Beta amplitude during motor imagery
    pub mi_beta_uv: f64,
    /// Background amplitude
    pub background_uv: f64,
    /// Standard deviation of white sensor noise
    pub noise_uv: f64,
    /// Relative amplitude jitter redrawn every second, in [0, 1)
    pub amplitude_jitter: f64,
}

impl Default for SyntheticEegConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 250.0,
            channel_labels: DEFAULT_CHANNELS.iter().map(|s| (*s).to_string()).collect(),
            mu_hz: 11.0,
            beta_hz: 22.0,
            background_hz: 9.5,
            rest_mu_uv: 10.0,
            mi_mu_uv: 3.0,
            rest_beta_uv: 2.0,
            mi_beta_uv: 5.0,
            background_uv: 6.0,
            noise_uv: 3.0,
            amplitude_jitter: 0.2,
        }
    }
}

const SOURCES: usize = 3;

/// Seeded synthetic EEG generator.
#[derive(Clone, Debug)]
pub struct SyntheticEeg {
    config: SyntheticEegConfig,
    rng: StdRng,
    mixing: Vec<[f64; SOURCES]>,
    phases: [f64; SOURCES],
    gains: [f64; SOURCES],
    sample_index: u64,
}

impl SyntheticEeg {
    /// Create a generator; the same seed yields the same data.
    #[must_use]
    pub fn new(config: SyntheticEegConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mixing = (0..config.channel_labels.len())
            .map(|_| std::array::from_fn(|_| rng.gen_range(0.2..1.0)))
            .collect();
        let phases = std::array::from_fn(|_| rng.gen_range(0.0..2.0 * PI));
        Self { config, rng, mixing, phases, gains: [1.0; SOURCES], sample_index: 0 }
    }

    /// Channel labels
    pub fn channel_labels(&self) -> &[String] {
        &self.config.channel_labels
    }

    /// Sample rate (Hz)
    pub fn sample_rate_hz(&self) -> f64 {
        self.config.sample_rate_hz
    }

    /// Generator configuration
    pub fn config(&self) -> &SyntheticEegConfig {
        &self.config
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn advance(&mut self) {
        let fs = self.config.sample_rate_hz;
        let freqs = [self.config.mu_hz, self.config.beta_hz, self.config.background_hz];
        for (phase, freq) in self.phases.iter_mut().zip(freqs) {
            *phase = (*phase + 2.0 * PI * freq / fs + 0.02 * standard_normal(&mut self.rng)) % (2.0 * PI);
        }

        self.sample_index += 1;
        let per_second = fs.round().max(1.0) as u64;
        if self.sample_index % per_second == 0 {
            let jitter = self.config.amplitude_jitter;
            for gain in &mut self.gains {
                *gain = 1.0 + jitter * self.rng.gen_range(-1.0..1.0);
            }
        }
    }

    /// Generate the next sample for the given mental state.
    #[allow(clippy::cast_precision_loss)]
    pub fn next_sample(&mut self, state: MindState) -> Sample {
        let c = &self.config;
        let (mu, beta) = match state {
            MindState::Rest => (c.rest_mu_uv, c.rest_beta_uv),
            MindState::MotorImagery => (c.mi_mu_uv, c.mi_beta_uv),
        };
        let amplitudes = [mu, beta, c.background_uv];
        let sources: [f64; SOURCES] =
            std::array::from_fn(|i| amplitudes[i] * self.gains[i] * self.phases[i].sin());

        let noise_uv = c.noise_uv;
        let timestamp_s = self.sample_index as f64 / c.sample_rate_hz;
        let mut values = Vec::with_capacity(self.mixing.len());
        for weights in &self.mixing {
            let mixed: f64 = weights.iter().zip(&sources).map(|(w, s)| w * s).sum();
            values.push(mixed + noise_uv * standard_normal(&mut self.rng));
        }

        self.advance();
        Sample::new(timestamp_s, values)
    }

    /// Let `samples` sample periods pass without producing output.
    pub fn skip(&mut self, samples: usize) {
        for _ in 0..samples {
            self.advance();
        }
    }

    /// Generate a block of samples in one state
    pub fn block(&mut self, state: MindState, samples: usize) -> Vec<Sample> {
        (0..samples).map(|_| self.next_sample(state)).collect()
    }

    /// Record a full protocol session: shuffled trials, countdowns skipped.
    pub fn record(&mut self, protocol: &TrialProtocol) -> LabeledRecording {
        let fs = self.config.sample_rate_hz;
        let trial = protocol.trial_samples(fs);
        let pause = protocol.inter_trial_samples(fs);
        let schedule = protocol.schedule(&mut self.rng);

        let mut samples = Vec::with_capacity(trial * schedule.len());
        let mut labels = Vec::with_capacity(trial * schedule.len());
        for state in schedule {
            self.skip(pause);
            samples.extend(self.block(state, trial));
            labels.extend(std::iter::repeat(state).take(trial));
        }
        LabeledRecording::from_parts(self.config.channel_labels.clone(), fs, samples, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_is_balanced_and_shuffled() {
        let protocol = TrialProtocol::default();
        let mut rng = StdRng::seed_from_u64(42);
        let schedule = protocol.schedule(&mut rng);

        assert_eq!(schedule.len(), 20);
        assert_eq!(schedule.iter().filter(|s| **s == MindState::MotorImagery).count(), 10);
        let sorted: Vec<MindState> = MindState::ALL.iter().flat_map(|&s| std::iter::repeat(s).take(10)).collect();
        assert_ne!(schedule, sorted);
        assert!((protocol.session_duration_s() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_same_seed_same_data() {
        let a = SyntheticEeg::new(SyntheticEegConfig::default(), 9).block(MindState::Rest, 50);
        let b = SyntheticEeg::new(SyntheticEegConfig::default(), 9).block(MindState::Rest, 50);
        assert_eq!(a, b);
        assert_eq!(a[0].channel_count(), 8);
    }

    #[test]
    fn test_mi_reduces_mu_power() {
        let mut eeg = SyntheticEeg::new(SyntheticEegConfig { noise_uv: 0.0, ..SyntheticEegConfig::default() }, 1);
        let power = |samples: &[Sample]| samples.iter().flat_map(|s| &s.values).map(|v| v * v).sum::<f64>();
        let rest = eeg.block(MindState::Rest, 1000);
        let mi = eeg.block(MindState::MotorImagery, 1000);
        assert!(power(&rest) > power(&mi));
    }

    #[test]
    fn test_recording_layout() {
        let protocol = TrialProtocol { trials_per_class: 2, ..TrialProtocol::default() };
        let recording = SyntheticEeg::new(SyntheticEegConfig::default(), 5).record(&protocol);
        assert_eq!(recording.len(), 4 * 750);
        assert_eq!(recording.class_counts(), (1500, 1500));
        assert_eq!(recording.channel_labels()[0], "C3");
    }
}
