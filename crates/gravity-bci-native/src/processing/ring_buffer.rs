//! Fixed-capacity multi-channel sample store
//!
//! Samples are stored sample-major in a flat slab and addressed by their
//! absolute index modulo capacity. `push` never allocates; `read_window`
//! copies the requested span out into an immutable channel-major [`Window`].

use gravity_bci_core::{PipelineError, PipelineResult, Sample, Window};

/// Ring buffer over the most recent `capacity` samples.
#[derive(Clone, Debug)]
pub struct RingBuffer {
    channel_count: usize,
    capacity: usize,
    data: Vec<f64>,
    timestamps: Vec<f64>,
    /// Slot the next sample is written to
    write_cursor: usize,
    /// Samples pushed since creation (absolute index of the next sample)
    total_pushed: u64,
}

impl RingBuffer {
    /// Create an empty buffer.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `channel_count` or `capacity` is zero.
    pub fn new(channel_count: usize, capacity: usize) -> PipelineResult<Self> {
        if channel_count == 0 || capacity == 0 {
            return Err(PipelineError::invalid_config(format!(
                "ring buffer needs channels and capacity, got {channel_count} x {capacity}"
            )));
        }
        Ok(Self {
            channel_count,
            capacity,
            data: vec![0.0; channel_count * capacity],
            timestamps: vec![0.0; capacity],
            write_cursor: 0,
            total_pushed: 0,
        })
    }

    /// Number of channels per sample
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Maximum number of retained samples
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples pushed since creation
    #[inline]
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    /// Samples currently retained
    #[allow(clippy::cast_possible_truncation)]
    pub fn len(&self) -> usize {
        self.total_pushed.min(self.capacity as u64) as usize
    }

    /// Whether nothing has been pushed yet
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total_pushed == 0
    }

    /// Append a sample, overwriting the oldest once full.
    ///
    /// # Errors
    ///
    /// `ChannelCountMismatch` if the sample width differs; the buffer is left
    /// untouched.
    pub fn push(&mut self, sample: &Sample) -> PipelineResult<()> {
        self.push_values(sample.timestamp_s, &sample.values)
    }

    /// Append raw channel values with a timestamp.
    pub fn push_values(&mut self, timestamp_s: f64, values: &[f64]) -> PipelineResult<()> {
        if values.len() != self.channel_count {
            return Err(PipelineError::ChannelCountMismatch {
                expected: self.channel_count,
                actual: values.len(),
            });
        }
        let offset = self.write_cursor * self.channel_count;
        self.data[offset..offset + self.channel_count].copy_from_slice(values);
        self.timestamps[self.write_cursor] = timestamp_s;

        self.write_cursor = (self.write_cursor + 1) % self.capacity;
        self.total_pushed += 1;
        Ok(())
    }

    /// Snapshot `length` samples ending `stride_offset` samples before the
    /// newest one (offset 0 = most recent window).
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the span can never fit in the buffer
    /// - `InsufficientData` if not enough samples have been pushed yet
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_window(&self, length: usize, stride_offset: usize) -> PipelineResult<Window> {
        let span = length + stride_offset;
        if length == 0 || span > self.capacity {
            return Err(PipelineError::invalid_config(format!(
                "window of {length} samples at offset {stride_offset} exceeds buffer capacity {}",
                self.capacity
            )));
        }
        if self.total_pushed < span as u64 {
            return Err(PipelineError::InsufficientData {
                available: self.total_pushed,
                required: span as u64,
            });
        }

        let start_index = self.total_pushed - span as u64;
        let capacity = self.capacity as u64;
        let slot = |i: usize| ((start_index + i as u64) % capacity) as usize;

        let mut data = Vec::with_capacity(length * self.channel_count);
        for ch in 0..self.channel_count {
            data.extend((0..length).map(|i| self.data[slot(i) * self.channel_count + ch]));
        }

        Ok(Window::from_channel_major(
            start_index,
            self.channel_count,
            data,
            self.timestamps[slot(0)],
            self.timestamps[slot(length - 1)],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_ramp(buffer: &mut RingBuffer, count: usize) {
        for i in 0..count {
            let v = i as f64;
            buffer.push_values(v / 250.0, &[v, -v]).unwrap();
        }
    }

    #[test]
    fn test_insufficient_until_window_length() {
        let mut buffer = RingBuffer::new(2, 16).unwrap();
        for i in 0..10 {
            assert!(matches!(
                buffer.read_window(10, 0),
                Err(PipelineError::InsufficientData { available, required: 10 }) if available == i
            ));
            buffer.push_values(0.0, &[1.0, 2.0]).unwrap();
        }
        for _ in 0..40 {
            assert!(buffer.read_window(10, 0).is_ok());
            buffer.push_values(0.0, &[1.0, 2.0]).unwrap();
        }
    }

    #[test]
    fn test_window_wraps_around() {
        let mut buffer = RingBuffer::new(2, 8).unwrap();
        push_ramp(&mut buffer, 13);

        let window = buffer.read_window(5, 0).unwrap();
        assert_eq!(window.start_index(), 8);
        assert_eq!(window.channel(0), &[8.0, 9.0, 10.0, 11.0, 12.0]);
        assert_eq!(window.channel(1), &[-8.0, -9.0, -10.0, -11.0, -12.0]);
        assert!((window.last_timestamp_s() - 12.0 / 250.0).abs() < 1e-12);

        let older = buffer.read_window(5, 3).unwrap();
        assert_eq!(older.channel(0), &[5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_span_beyond_capacity_is_config_error() {
        let mut buffer = RingBuffer::new(1, 8).unwrap();
        for _ in 0..20 {
            buffer.push_values(0.0, &[0.0]).unwrap();
        }
        assert!(matches!(buffer.read_window(6, 3), Err(PipelineError::InvalidConfig { .. })));
    }

    #[test]
    fn test_wrong_width_rejected_without_side_effects() {
        let mut buffer = RingBuffer::new(2, 8).unwrap();
        let result = buffer.push(&Sample::new(0.0, vec![1.0, 2.0, 3.0]));
        assert_eq!(result, Err(PipelineError::ChannelCountMismatch { expected: 2, actual: 3 }));
        assert!(buffer.is_empty());
    }
}
