//! Signal processing
//!
//! - [`ring_buffer`]: fixed-capacity multi-channel sample history
//! - [`filters`]: Butterworth bandpass with carried state
//! - [`windowing`]: window cadence and the buffer + filter chain

pub mod filters;
pub mod ring_buffer;
pub mod windowing;

pub use filters::{BandpassFilter, FilterState};
pub use ring_buffer::RingBuffer;
pub use windowing::{FilteredWindow, SignalChain, WindowSchedule};
