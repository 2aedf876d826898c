//! Decision smoother
//!
//! Debounces the per-window [`Prediction`] stream into the [`ControlState`]
//! the game reads. A flip needs `required_votes()` of the last K predictions
//! to name the opposite state, with their mean confidence at or above the
//! threshold. The history starts filled with REST, so a session never opens
//! in MI.

use std::collections::VecDeque;

use crate::config::SmoothingConfig;
use crate::types::{ControlState, MindState, Prediction};

/// Result of feeding one prediction into the smoother.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SmootherStep {
    /// Control state after the update
    pub control: ControlState,
    /// Whether this update flipped the state
    pub flipped: bool,
}

/// Hysteresis state machine over `{REST, MI}`.
#[derive(Clone, Debug)]
pub struct DecisionSmoother {
    config: SmoothingConfig,
    required_votes: usize,
    history: VecDeque<Prediction>,
    control: ControlState,
}

impl DecisionSmoother {
    /// Create a smoother in REST
    #[must_use]
    pub fn new(config: SmoothingConfig) -> Self {
        let mut smoother = Self {
            config,
            required_votes: config.required_votes(),
            history: VecDeque::with_capacity(config.window_k.max(1)),
            control: ControlState::default(),
        };
        smoother.reset();
        smoother
    }

    /// Return to the initial REST state with a REST-filled history.
    pub fn reset(&mut self) {
        self.history.clear();
        self.history
            .extend(std::iter::repeat(Prediction::new(MindState::Rest, 0.0, 0.0)).take(self.config.window_k.max(1)));
        self.control = ControlState::default();
    }

    /// Current control state
    #[inline]
    pub fn control_state(&self) -> ControlState {
        self.control
    }

    /// Votes needed for a flip
    #[inline]
    pub fn required_votes(&self) -> usize {
        self.required_votes
    }

    /// Feed one prediction and apply the transition rule.
    pub fn update(&mut self, prediction: &Prediction) -> SmootherStep {
        if self.history.len() >= self.config.window_k.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(*prediction);
        self.control.ticks_since_flip = self.control.ticks_since_flip.saturating_add(1);

        let target = self.control.state.opposite();
        let (votes, confidence) = self.support(target);
        let dwell_elapsed = self.control.ticks_since_flip >= u64::from(self.config.min_dwell_ticks);

        let flipped = dwell_elapsed
            && votes >= self.required_votes
            && confidence >= self.config.confidence_threshold;

        if flipped {
            self.control.state = target;
            self.control.ticks_since_flip = 0;
            self.control.flips += 1;
        }
        self.control.confidence = self.support(self.control.state).1;

        SmootherStep { control: self.control, flipped }
    }

    /// Vote count and mean confidence of the history entries naming `state`.
    #[allow(clippy::cast_precision_loss)]
    fn support(&self, state: MindState) -> (usize, f64) {
        let (votes, sum) = self
            .history
            .iter()
            .filter(|p| p.state == state)
            .fold((0usize, 0.0), |(n, sum), p| (n + 1, sum + p.confidence));
        let mean = if votes == 0 { 0.0 } else { sum / votes as f64 };
        (votes, mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mi(confidence: f64) -> Prediction {
        Prediction::new(MindState::MotorImagery, confidence, 1.0)
    }

    fn rest(confidence: f64) -> Prediction {
        Prediction::new(MindState::Rest, confidence, -1.0)
    }

    fn smoother() -> DecisionSmoother {
        DecisionSmoother::new(SmoothingConfig {
            window_k: 3,
            majority_fraction: 0.67,
            confidence_threshold: 0.6,
            min_dwell_ticks: 0,
        })
    }

    #[test]
    fn test_flips_once_on_sustained_mi() {
        let mut smoother = smoother();
        let flips: Vec<bool> = (0..5).map(|_| smoother.update(&mi(0.9)).flipped).collect();

        assert_eq!(flips, vec![false, true, false, false, false]);
        let control = smoother.control_state();
        assert_eq!(control.state, MindState::MotorImagery);
        assert_eq!(control.flips, 1);
        assert_eq!(control.ticks_since_flip, 3);
        assert!((control.confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_isolated_mi_does_not_flip() {
        let mut smoother = smoother();
        for p in [rest(0.9), rest(0.9), mi(0.95), rest(0.9), rest(0.9)] {
            assert!(!smoother.update(&p).flipped);
        }
        assert_eq!(smoother.control_state().state, MindState::Rest);
        assert_eq!(smoother.control_state().flips, 0);
    }

    #[test]
    fn test_low_confidence_majority_does_not_flip() {
        let mut smoother = smoother();
        for _ in 0..5 {
            smoother.update(&mi(0.55));
        }
        assert_eq!(smoother.control_state().state, MindState::Rest);
    }

    #[test]
    fn test_symmetric_return_to_rest() {
        let mut smoother = smoother();
        smoother.update(&mi(0.9));
        smoother.update(&mi(0.9));
        assert!(smoother.control_state().is_airborne());

        assert!(!smoother.update(&rest(0.8)).flipped);
        assert!(smoother.update(&rest(0.8)).flipped);
        assert_eq!(smoother.control_state().state, MindState::Rest);
        assert_eq!(smoother.control_state().flips, 2);
    }

    #[test]
    fn test_min_dwell_delays_flip() {
        let mut smoother = DecisionSmoother::new(SmoothingConfig {
            window_k: 3,
            majority_fraction: 0.67,
            confidence_threshold: 0.6,
            min_dwell_ticks: 4,
        });
        let flips: Vec<bool> = (0..5).map(|_| smoother.update(&mi(0.9)).flipped).collect();
        assert_eq!(flips, vec![false, false, false, true, false]);
    }

    #[test]
    fn test_reset_restores_rest() {
        let mut smoother = smoother();
        smoother.update(&mi(0.9));
        smoother.update(&mi(0.9));
        smoother.reset();
        assert_eq!(smoother.control_state(), ControlState::default());
        assert!(!smoother.update(&mi(0.9)).flipped);
    }
}
