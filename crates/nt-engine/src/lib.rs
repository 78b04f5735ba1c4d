//! Render engine for nodetone.
//!
//! Owns every voice, bus and insert on the audio thread. The control side
//! talks to it only through the command/notice rings in [`command`].

pub mod command;
pub mod effects;
mod frame;
mod insert;
mod mixer;
mod param;
mod source;
mod voice;
mod voice_pool;

pub use command::{link, Command, ControlLink, EngineLink, Notice, ParamTarget, DEFAULT_CAPACITY};
pub use frame::Frame;
pub use insert::Insert;
pub use mixer::{Engine, MAX_BUSES};
pub use param::{Param, ParamEvent, MAX_EVENTS};
pub use source::{BufferPlayer, OscillatorBank, Partial, Source, Waveform, MAX_PARTIALS};
pub use voice::{BusId, Voice, VoiceId, VoiceState, MASTER_BUS};
pub use voice_pool::{VoicePool, MAX_VOICES};
