//! Core types for the Gravity BCI pipeline
//!
//! This module provides the plain data that flows between stages:
//! - [`Sample`]: one timestamped multi-channel EEG frame
//! - [`Window`]: immutable channel-major snapshot of consecutive samples
//! - [`MindState`], [`Prediction`]: per-window classifier output
//! - [`ControlState`]: the debounced signal exposed to the game
//! - [`FeatureLayout`], [`FeatureVector`]: ordered features and their fingerprint

use core::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Samples and Windows
// ============================================================================

/// One multi-channel EEG frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Acquisition timestamp in seconds (source clock)
    pub timestamp_s: f64,
    /// Channel values in µV, in session channel order
    pub values: Vec<f64>,
}

impl Sample {
    /// Create a new sample
    #[must_use]
    pub fn new(timestamp_s: f64, values: Vec<f64>) -> Self {
        Self { timestamp_s, values }
    }

    /// Number of channels carried by this sample
    #[inline]
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.values.len()
    }
}

/// Immutable snapshot of consecutive samples.
///
/// Data is stored channel-major: `channel(c)` is one contiguous slice of
/// `len()` values. `start_index` is the absolute index (since session start)
/// of the first sample, which lets the filter stage recognise samples it has
/// already processed when windows overlap.
#[derive(Clone, Debug, PartialEq)]
pub struct Window {
    start_index: u64,
    len: usize,
    channel_count: usize,
    data: Vec<f64>,
    first_timestamp_s: f64,
    last_timestamp_s: f64,
}

impl Window {
    /// Build a window from channel-major data.
    ///
    /// `data.len()` must be a multiple of `channel_count`.
    #[must_use]
    pub fn from_channel_major(
        start_index: u64,
        channel_count: usize,
        data: Vec<f64>,
        first_timestamp_s: f64,
        last_timestamp_s: f64,
    ) -> Self {
        debug_assert!(channel_count > 0 && data.len() % channel_count == 0);
        let len = if channel_count == 0 { 0 } else { data.len() / channel_count };
        Self { start_index, len, channel_count, data, first_timestamp_s, last_timestamp_s }
    }

    /// Build a window from one vector per channel (all of equal length).
    ///
    /// Timestamps are left at zero; intended for offline use and tests.
    #[must_use]
    pub fn from_channels(start_index: u64, channels: &[Vec<f64>]) -> Self {
        let data: Vec<f64> = channels.iter().flatten().copied().collect();
        Self::from_channel_major(start_index, channels.len(), data, 0.0, 0.0)
    }

    /// Absolute index of the first sample
    #[inline]
    pub fn start_index(&self) -> u64 {
        self.start_index
    }

    /// Absolute index one past the last sample
    #[inline]
    pub fn end_index(&self) -> u64 {
        self.start_index + self.len as u64
    }

    /// Number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the window holds no samples
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of channels
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Samples of one channel.
    ///
    /// # Panics
    ///
    /// Panics if `channel >= channel_count()`.
    #[inline]
    pub fn channel(&self, channel: usize) -> &[f64] {
        &self.data[channel * self.len..(channel + 1) * self.len]
    }

    /// Iterate over channels in order
    pub fn channels(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.len.max(1)).take(self.channel_count)
    }

    /// Raw channel-major storage
    #[inline]
    pub fn as_channel_major(&self) -> &[f64] {
        &self.data
    }

    /// Timestamp of the first sample (seconds)
    #[inline]
    pub fn first_timestamp_s(&self) -> f64 {
        self.first_timestamp_s
    }

    /// Timestamp of the last sample (seconds)
    #[inline]
    pub fn last_timestamp_s(&self) -> f64 {
        self.last_timestamp_s
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// Binary mental state decoded from EEG.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MindState {
    /// Relaxed, no imagined movement
    #[default]
    Rest,
    /// Motor imagery
    MotorImagery,
}

impl MindState {
    /// Both states, REST first
    pub const ALL: [Self; 2] = [Self::Rest, Self::MotorImagery];

    /// Label code used in recordings (0 = REST, 1 = MI)
    #[must_use]
    pub const fn label(self) -> u8 {
        match self {
            Self::Rest => 0,
            Self::MotorImagery => 1,
        }
    }

    /// Parse a recording label code
    #[must_use]
    pub const fn from_label(label: u8) -> Option<Self> {
        match label {
            0 => Some(Self::Rest),
            1 => Some(Self::MotorImagery),
            _ => None,
        }
    }

    /// The other state
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Rest => Self::MotorImagery,
            Self::MotorImagery => Self::Rest,
        }
    }

    /// Short display name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rest => "REST",
            Self::MotorImagery => "MI",
        }
    }
}

impl fmt::Display for MindState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier output for one window.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted state
    pub state: MindState,
    /// Probability of the predicted state, in [0.5, 1.0] for binary models
    pub confidence: f64,
    /// Signed decision value; positive favours MI
    pub margin: f64,
}

impl Prediction {
    /// Create a prediction
    #[must_use]
    pub fn new(state: MindState, confidence: f64, margin: f64) -> Self {
        Self { state, confidence, margin }
    }
}

/// Debounced control signal read by the game once per frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlState {
    /// Current smoothed state
    pub state: MindState,
    /// Mean confidence of the recent predictions supporting `state`
    pub confidence: f64,
    /// Processed ticks since the last flip (or since session start)
    pub ticks_since_flip: u64,
    /// Number of flips so far
    pub flips: u64,
}

impl ControlState {
    /// Whether the game character should be airborne.
    ///
    /// Motor imagery keeps the player in the air, rest lets gravity win.
    #[inline]
    pub fn is_airborne(&self) -> bool {
        self.state == MindState::MotorImagery
    }
}

// ============================================================================
// Features
// ============================================================================

/// Ordered names of the feature vector entries.
///
/// The order is `csp[0]..csp[m-1]` followed by `ar[<channel>][1..=p]` for each
/// channel in session order. Training and inference must agree on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureLayout {
    names: Vec<String>,
}

impl FeatureLayout {
    /// Layout for `csp_components` CSP features and order-`ar_order` AR
    /// coefficients on each labelled channel.
    #[must_use]
    pub fn new(csp_components: usize, channel_labels: &[String], ar_order: usize) -> Self {
        let mut names = Vec::with_capacity(csp_components + channel_labels.len() * ar_order);
        names.extend((0..csp_components).map(|i| format!("csp[{i}]")));
        for label in channel_labels {
            names.extend((1..=ar_order).map(|lag| format!("ar[{label}][{lag}]")));
        }
        Self { names }
    }

    /// Rebuild a layout from stored names
    #[must_use]
    pub fn from_names(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Feature names in order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Dimensionality
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the layout is empty
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// 64-bit FNV-1a hash of the ordered names.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut hash = OFFSET;
        for name in &self.names {
            // 0xff never occurs in UTF-8, so it separates names unambiguously
            for byte in name.bytes().chain(core::iter::once(0xff)) {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(PRIME);
            }
        }
        hash
    }
}

/// Feature values for one window, tagged with the layout they follow.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector {
    values: Vec<f64>,
    layout_fingerprint: u64,
}

impl FeatureVector {
    /// Wrap feature values produced under the given layout fingerprint
    #[must_use]
    pub fn new(values: Vec<f64>, layout_fingerprint: u64) -> Self {
        Self { values, layout_fingerprint }
    }

    /// Feature values
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Dimensionality
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the vector is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fingerprint of the layout the values follow
    #[inline]
    pub fn layout_fingerprint(&self) -> u64 {
        self.layout_fingerprint
    }

    /// Consume into the raw values
    #[must_use]
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_window_channel_major_access() {
        let window = Window::from_channels(10, &[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert_eq!(window.len(), 3);
        assert_eq!(window.channel_count(), 2);
        assert_eq!(window.channel(1), &[4.0, 5.0, 6.0]);
        assert_eq!(window.end_index(), 13);
        assert_eq!(window.channels().count(), 2);
    }

    #[test]
    fn test_mind_state_labels() {
        assert_eq!(MindState::from_label(1), Some(MindState::MotorImagery));
        assert_eq!(MindState::from_label(7), None);
        assert_eq!(MindState::Rest.opposite(), MindState::MotorImagery);
        assert!(!ControlState::default().is_airborne());
    }

    #[test]
    fn test_feature_layout_order() {
        let layout = FeatureLayout::new(2, &labels(&["C3", "C4"]), 2);
        assert_eq!(
            layout.names(),
            &["csp[0]", "csp[1]", "ar[C3][1]", "ar[C3][2]", "ar[C4][1]", "ar[C4][2]"]
        );
    }

    #[test]
    fn test_fingerprint_sensitive_to_channel_order() {
        let a = FeatureLayout::new(4, &labels(&["C3", "C4", "Cz"]), 6);
        let b = FeatureLayout::new(4, &labels(&["C4", "C3", "Cz"]), 6);
        let c = FeatureLayout::new(4, &labels(&["C3", "C4", "Cz"]), 6);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), c.fingerprint());
    }
}
