//! Envelope parameters shared by every instrument backend.
//!
//! Releases are exponential approaches toward silence. A release is
//! described by its time constant (time to fall to ~37%); hardware is
//! freed after [`RELEASE_TIME_CONSTANTS`] constants, by which point the
//! level is below 1% and truncation is inaudible.

use serde::{Deserialize, Serialize};

use crate::note::Note;

/// Time constant used when no release profile is configured (seconds).
pub const DEFAULT_TIME_CONSTANT: f32 = 0.08;

/// Number of time constants a release runs before its voice is freed (~99% decay).
pub const RELEASE_TIME_CONSTANTS: f32 = 5.0;

/// Shortest segment the envelope helpers will schedule.
pub const MIN_SEGMENT: f32 = 0.001;

/// Seconds until a release with time constant `tc` is considered silent.
pub fn release_duration(time_constant: f32) -> f32 {
    time_constant.max(MIN_SEGMENT) * RELEASE_TIME_CONSTANTS
}

/// Attack-decay-sustain-release envelope. Times are in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Adsr {
    pub attack: f32,
    pub decay: f32,
    /// Level held while the gate is open (0..1).
    pub sustain: f32,
    pub release: f32,
}

impl Default for Adsr {
    fn default() -> Self {
        Self { attack: 0.005, decay: 0.2, sustain: 0.7, release: 0.4 }
    }
}

impl Adsr {
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack: attack.max(MIN_SEGMENT),
            decay: decay.max(MIN_SEGMENT),
            sustain: sustain.clamp(0.0, 1.0),
            release: release.max(MIN_SEGMENT),
        }
    }

    /// Time constant for the exponential decay segment.
    pub fn decay_time_constant(&self) -> f32 {
        self.decay.max(MIN_SEGMENT) / RELEASE_TIME_CONSTANTS
    }

    /// Time constant for the release segment.
    pub fn release_time_constant(&self) -> f32 {
        self.release.max(MIN_SEGMENT) / RELEASE_TIME_CONSTANTS
    }
}

/// A note range sharing one release time constant.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeConstantRange {
    pub min_note: Note,
    pub max_note: Note,
    pub time_constant: f32,
}

impl TimeConstantRange {
    pub fn contains(&self, note: Note) -> bool {
        (self.min_note..=self.max_note).contains(&note)
    }
}

/// How long releases ring, either fixed or per note range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReleaseProfile {
    Fixed(f32),
    Table(Vec<TimeConstantRange>),
}

impl ReleaseProfile {
    /// Bass rings longer than treble, like an acoustic piano.
    pub fn piano() -> Self {
        let range = |lo: u8, hi: u8, tc: f32| TimeConstantRange {
            min_note: Note::from_midi(lo).unwrap_or(Note::C4),
            max_note: Note::from_midi(hi).unwrap_or(Note::C4),
            time_constant: tc,
        };
        ReleaseProfile::Table(vec![
            range(0, 47, 0.15),
            range(48, 71, 0.08),
            range(72, 127, 0.05),
        ])
    }

    /// Time constant for `note`, falling back to [`DEFAULT_TIME_CONSTANT`].
    pub fn time_constant(&self, note: Note) -> f32 {
        match self {
            ReleaseProfile::Fixed(tc) => *tc,
            ReleaseProfile::Table(ranges) => ranges
                .iter()
                .find(|r| r.contains(note))
                .map_or(DEFAULT_TIME_CONSTANT, |r| r.time_constant),
        }
    }
}

/// Lookup that tolerates an unconfigured profile.
pub fn time_constant_for(profile: Option<&ReleaseProfile>, note: Note) -> f32 {
    profile.map_or(DEFAULT_TIME_CONSTANT, |p| p.time_constant(note))
}
