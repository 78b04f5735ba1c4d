//! Core types for nodetone.
//!
//! Shared by the render engine, the context layer and the instrument
//! backends: audio buffers, note names, velocity curves, envelope
//! parameters, tempo math and instrument configuration.

mod audio_buffer;
mod envelope;
mod instrument;
mod musical_time;
mod note;
mod velocity;

pub use audio_buffer::{AudioBuffer, BLOCK_SIZE, BYTES_PER_SAMPLE, MAX_CHANNELS};
pub use envelope::{
    release_duration, time_constant_for, Adsr, ReleaseProfile, TimeConstantRange,
    DEFAULT_TIME_CONSTANT, MIN_SEGMENT, RELEASE_TIME_CONSTANTS,
};
pub use instrument::{
    ExternalConfig, InstrumentConfig, LayeredConfig, LoopPoints, PresetConfig, ResonanceConfig,
    SamplerConfig, SynthConfig, Timbre, TriggerMode, VelocityLayer,
};
pub use musical_time::{clamp_beats_per_bar, Tempo, MAX_BEATS_PER_BAR, MAX_BPM, MIN_BEATS_PER_BAR, MIN_BPM};
pub use note::{playback_rate, Note, NoteError, A4_HZ};
pub use velocity::VelocityCurve;
