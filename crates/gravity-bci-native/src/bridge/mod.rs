//! EEG acquisition bridges
//!
//! - [`source`]: the blocking [`SampleSource`] trait with replay and
//!   synthetic implementations
//! - [`lsl`]: Lab Streaming Layer compatible outlet, inlet and live source
//!
//! ```rust,ignore
//! use gravity_bci_native::bridge::{LslSource, DEFAULT_RESOLVE_TIMEOUT};
//!
//! // name "EEG_BCI" first, then any EEG stream
//! let source = LslSource::resolve_default(DEFAULT_RESOLVE_TIMEOUT)?;
//! let handle = session.start(source)?;
//! ```

pub mod lsl;
pub mod source;

pub use lsl::{
    resolve, DiscoveredStream, LslError, LslInlet, LslOutlet, LslResult, LslSource, ShortInfo, StreamInfo,
    StreamQuery, StreamType, DEFAULT_RESOLVE_TIMEOUT, DEFAULT_STREAM_NAME,
};
pub use source::{ReplaySource, SampleSource, SourceError, SourceRead, SourceResult, SyntheticSource};
