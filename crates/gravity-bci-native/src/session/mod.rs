//! Live loop
//!
//! - [`controller`]: the synchronous tick-by-tick [`Pipeline`]
//! - [`runtime`]: the tokio session driving it from a live source

pub mod controller;
pub mod runtime;

pub use controller::{Pipeline, PipelineSettings, TickOutcome, TickReport};
pub use runtime::{ControlReader, Session, SessionError, SessionEvent, SessionHandle, SessionSummary};
