//! Audio output for nodetone.
//!
//! [`ContextManager`] owns the single shared [`AudioContext`]. A realtime
//! context drives the default cpal device from a dedicated audio thread; an
//! offline context renders on demand for tests and export.

mod context;
mod cpal_backend;
mod latency;
mod traits;

pub use context::{AudioContext, ContextConfig, ContextManager, ContextState, LatencyHint, RenderMode, DEFAULT_OFFLINE_RATE};
pub use cpal_backend::CpalOutput;
pub use latency::{LatencyBand, LatencyReport};
pub use traits::{AudioError, AudioOutput};
