//! Instrument definitions.
//!
//! One config per node-graph instrument node. The `kind` tag selects the
//! sound-generation backend; every field has a default so a config only
//! needs to name what it changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::envelope::{Adsr, ReleaseProfile};
use crate::note::Note;
use crate::velocity::VelocityCurve;

/// Backend selection plus its settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstrumentConfig {
    Synth(SynthConfig),
    Sampler(SamplerConfig),
    Preset(PresetConfig),
    Layered(LayeredConfig),
    External(ExternalConfig),
}

impl InstrumentConfig {
    /// Short backend name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            InstrumentConfig::Synth(_) => "synth",
            InstrumentConfig::Sampler(_) => "sampler",
            InstrumentConfig::Preset(_) => "preset",
            InstrumentConfig::Layered(_) => "layered",
            InstrumentConfig::External(_) => "external",
        }
    }
}

/// Built-in oscillator timbres.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timbre {
    #[default]
    Piano,
    Cello,
    Saxophone,
    Organ,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub timbre: Timbre,
    pub gain: f32,
    pub velocity_curve: VelocityCurve,
    /// Overrides the timbre's own release when set.
    pub release: Option<ReleaseProfile>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self { timbre: Timbre::Piano, gain: 0.3, velocity_curve: VelocityCurve::Linear, release: None }
    }
}

/// What a note-off does to a sampler voice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Release on note-off.
    #[default]
    Gate,
    /// Play to the end of the sample regardless of note-off.
    #[serde(alias = "one_shot")]
    OneShot,
    /// A second trigger of a sounding note stops it.
    Toggle,
}

/// Loop region in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoopPoints {
    pub start: f64,
    pub end: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Sample id resolved through the sample source and cache.
    pub sample: String,
    /// Pitch the sample was recorded at.
    pub root_note: Note,
    pub adsr: Adsr,
    pub loop_points: Option<LoopPoints>,
    pub max_voices: usize,
    pub trigger_mode: TriggerMode,
    pub velocity_curve: VelocityCurve,
    pub gain: f32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sample: String::new(),
            root_note: Note::C4,
            adsr: Adsr::default(),
            loop_points: None,
            max_voices: 16,
            trigger_mode: TriggerMode::Gate,
            velocity_curve: VelocityCurve::Linear,
            gain: 0.8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetConfig {
    /// Preset asset id (JSON zone map) resolved through the sample source.
    pub preset: String,
    /// Hard cap on simultaneously sounding notes.
    pub max_notes: usize,
    /// Seconds for a held note to decay to silence.
    pub duration: f32,
    pub release: Option<ReleaseProfile>,
    pub velocity_curve: VelocityCurve,
    pub gain: f32,
}

impl Default for PresetConfig {
    fn default() -> Self {
        Self {
            preset: String::new(),
            max_notes: 32,
            duration: 3.0,
            release: None,
            velocity_curve: VelocityCurve::Linear,
            gain: 0.8,
        }
    }
}

/// Samples used up to and including `max_velocity`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VelocityLayer {
    pub max_velocity: f32,
    pub samples: BTreeMap<Note, String>,
}

/// Convolution resonance settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResonanceConfig {
    /// Impulse response sample id; a synthetic one is generated when absent.
    pub impulse: Option<String>,
    /// Wet level while the pedal is down.
    pub wet: f32,
    /// Length of the synthetic impulse in seconds.
    pub decay: f32,
    /// Crossfade time for pedal changes in seconds.
    pub ramp: f32,
}

impl Default for ResonanceConfig {
    fn default() -> Self {
        Self { impulse: None, wet: 0.35, decay: 2.0, ramp: 0.05 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayeredConfig {
    /// Ordered softest first.
    pub layers: Vec<VelocityLayer>,
    pub release: Option<ReleaseProfile>,
    /// Release time multiplier while the sustain pedal is down.
    pub pedal_release_scale: f32,
    pub resonance: Option<ResonanceConfig>,
    pub velocity_curve: VelocityCurve,
    pub gain: f32,
}

impl Default for LayeredConfig {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            release: Some(ReleaseProfile::piano()),
            pedal_release_scale: 6.0,
            resonance: Some(ResonanceConfig::default()),
            velocity_curve: VelocityCurve::Linear,
            gain: 0.8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalConfig {
    /// Note-keyed samples handed to the wrapped sampler.
    pub samples: BTreeMap<Note, String>,
    pub release: Option<ReleaseProfile>,
    /// Seconds between the manual release and the wrapped sampler's own stop.
    pub stop_delay: f32,
    pub velocity_curve: VelocityCurve,
    pub gain: f32,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            samples: BTreeMap::new(),
            release: None,
            stop_delay: 0.1,
            velocity_curve: VelocityCurve::Linear,
            gain: 0.8,
        }
    }
}
