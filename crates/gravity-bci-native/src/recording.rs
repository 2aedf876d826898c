//! Labeled EEG recordings used for training, evaluation and replay

use std::ops::Range;

use gravity_bci_core::{MindState, Sample};

use crate::ml::training::{TrainingError, TrainingResult};

/// A continuous recording with one class label per sample.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledRecording {
    channel_labels: Vec<String>,
    sample_rate_hz: f64,
    samples: Vec<Sample>,
    labels: Vec<MindState>,
}

impl LabeledRecording {
    /// Empty recording for the given montage
    #[must_use]
    pub fn empty(channel_labels: Vec<String>, sample_rate_hz: f64) -> Self {
        Self { channel_labels, sample_rate_hz, samples: Vec::new(), labels: Vec::new() }
    }

    /// Build a recording, checking that every sample has one label and one
    /// value per channel.
    pub fn new(
        channel_labels: Vec<String>,
        sample_rate_hz: f64,
        samples: Vec<Sample>,
        labels: Vec<MindState>,
    ) -> TrainingResult<Self> {
        if samples.len() != labels.len() {
            return Err(TrainingError::LabelCountMismatch { samples: samples.len(), labels: labels.len() });
        }
        if let Some(bad) = samples.iter().find(|s| s.channel_count() != channel_labels.len()) {
            return Err(TrainingError::ChannelMismatch {
                expected: channel_labels.len(),
                actual: bad.channel_count(),
            });
        }
        Ok(Self { channel_labels, sample_rate_hz, samples, labels })
    }

    /// Assemble from parts the caller produced consistently.
    pub(crate) fn from_parts(
        channel_labels: Vec<String>,
        sample_rate_hz: f64,
        samples: Vec<Sample>,
        labels: Vec<MindState>,
    ) -> Self {
        debug_assert_eq!(samples.len(), labels.len());
        Self { channel_labels, sample_rate_hz, samples, labels }
    }

    /// Append one labelled sample.
    pub fn push(&mut self, sample: Sample, label: MindState) -> TrainingResult<()> {
        if sample.channel_count() != self.channel_labels.len() {
            return Err(TrainingError::ChannelMismatch {
                expected: self.channel_labels.len(),
                actual: sample.channel_count(),
            });
        }
        self.samples.push(sample);
        self.labels.push(label);
        Ok(())
    }

    /// Channel labels in stream order
    pub fn channel_labels(&self) -> &[String] {
        &self.channel_labels
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channel_labels.len()
    }

    /// Nominal sample rate (Hz)
    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    /// Samples in order
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Per-sample labels
    pub fn labels(&self) -> &[MindState] {
        &self.labels
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the recording is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_s(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate_hz
    }

    /// The label shared by every sample in `span`, or `None` when the span is
    /// mixed or out of range.
    #[allow(clippy::cast_possible_truncation)]
    pub fn span_label(&self, span: Range<u64>) -> Option<MindState> {
        let labels = self.labels.get(span.start as usize..span.end as usize)?;
        let (first, rest) = labels.split_first()?;
        rest.iter().all(|l| l == first).then_some(*first)
    }

    /// Split into two recordings at sample `at`.
    #[must_use]
    pub fn split_at(&self, at: usize) -> (Self, Self) {
        let at = at.min(self.samples.len());
        let head = Self {
            channel_labels: self.channel_labels.clone(),
            sample_rate_hz: self.sample_rate_hz,
            samples: self.samples[..at].to_vec(),
            labels: self.labels[..at].to_vec(),
        };
        let tail = Self {
            channel_labels: self.channel_labels.clone(),
            sample_rate_hz: self.sample_rate_hz,
            samples: self.samples[at..].to_vec(),
            labels: self.labels[at..].to_vec(),
        };
        (head, tail)
    }

    /// Count of samples per class `(rest, mi)`
    pub fn class_counts(&self) -> (usize, usize) {
        let mi = self.labels.iter().filter(|l| **l == MindState::MotorImagery).count();
        (self.labels.len() - mi, mi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> LabeledRecording {
        let samples = (0..6).map(|i| Sample::new(f64::from(i), vec![0.0, 1.0])).collect();
        let labels = vec![
            MindState::Rest,
            MindState::Rest,
            MindState::Rest,
            MindState::MotorImagery,
            MindState::MotorImagery,
            MindState::MotorImagery,
        ];
        LabeledRecording::new(vec!["C3".into(), "C4".into()], 250.0, samples, labels).unwrap()
    }

    #[test]
    fn test_span_label() {
        let rec = recording();
        assert_eq!(rec.span_label(0..3), Some(MindState::Rest));
        assert_eq!(rec.span_label(3..6), Some(MindState::MotorImagery));
        assert_eq!(rec.span_label(2..5), None);
        assert_eq!(rec.span_label(4..9), None);
    }

    #[test]
    fn test_label_count_checked() {
        let result = LabeledRecording::new(vec!["C3".into()], 250.0, vec![Sample::new(0.0, vec![1.0])], vec![]);
        assert!(matches!(result, Err(TrainingError::LabelCountMismatch { samples: 1, labels: 0 })));
    }

    #[test]
    fn test_split_and_counts() {
        let (head, tail) = recording().split_at(4);
        assert_eq!(head.len(), 4);
        assert_eq!(tail.class_counts(), (0, 2));
        assert_eq!(head.class_counts(), (3, 1));
    }
}
