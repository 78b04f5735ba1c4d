//! Headless controller for nodetone.
//!
//! Turns note on/off calls from a node-graph editor into voices on the
//! render engine: instruments with asynchronous sample loading, a shared
//! LRU sample cache, preset sharing, a lookahead beat clock and the
//! [`Session`] that drives them all from one control thread.

mod backend;
mod cache;
mod clock;
mod config;
mod error;
mod flight;
mod instrument;
mod loader;
mod registry;
mod resonance;
mod session;
mod source;

pub use backend::{
    create as create_instrument, ExternalAdapter, ExternalSampler, KeymapSampler, LayeredBackend,
    LayeredSamples, LoadedLayer, PresetBackend, SamplerBackend, SynthBackend,
};
pub use cache::{CacheConfig, CacheStats, CachedSample, SampleCache};
pub use clock::{BeatClock, BeatClockState, SubscriptionKey, LOOKAHEAD, SCHEDULE_AHEAD};
pub use config::{SessionConfig, TransportConfig};
pub use error::{ConfigError, LoadError, SessionError};
pub use flight::{SharedLoad, SingleFlight};
pub use instrument::{
    adsr_events, Backend, CleanupQueue, Instrument, LoadState, PlayContext, Playable, Resources,
    StateListener, Voice, VoiceSet,
};
pub use loader::{fetch_and_decode, load_sample, CancelToken, LoadTask, LOAD_TIMEOUT};
pub use registry::{LoadedPreset, PresetRegistry, PresetSpec, Zone, ZoneSpec};
pub use resonance::ResonanceStage;
pub use session::Session;
pub use source::{FileSource, MemorySource, SampleSource};

// Re-exported so callers need not depend on the lower crates directly.
pub use nt_audio::{AudioContext, ContextConfig, LatencyHint, LatencyReport, RenderMode, DEFAULT_OFFLINE_RATE};
pub use nt_engine::Frame;
pub use nt_formats::{frames_to_wav, write_wav};
pub use nt_ir::{InstrumentConfig, Note};
