//! Tempo and meter math.
//!
//! Beats are the transport's time coordinate; the audio clock is in
//! seconds. These helpers convert between the two and keep tempo and
//! meter inside their valid ranges.

/// Slowest accepted tempo.
pub const MIN_BPM: f64 = 20.0;
/// Fastest accepted tempo.
pub const MAX_BPM: f64 = 300.0;
/// Smallest bar.
pub const MIN_BEATS_PER_BAR: u32 = 1;
/// Largest bar.
pub const MAX_BEATS_PER_BAR: u32 = 16;

/// A tempo in beats per minute, always inside `MIN_BPM..=MAX_BPM`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Tempo(f64);

impl Tempo {
    /// Clamp `bpm` into range. Non-finite input falls back to 120.
    pub fn new(bpm: f64) -> Self {
        if !bpm.is_finite() {
            return Self::default();
        }
        Self(bpm.clamp(MIN_BPM, MAX_BPM))
    }

    pub fn bpm(self) -> f64 {
        self.0
    }

    /// Length of one beat: `60 / bpm`.
    pub fn seconds_per_beat(self) -> f64 {
        60.0 / self.0
    }

    /// Time of `beat` for a transport started at `start`.
    pub fn beat_time(self, start: f64, beat: u64) -> f64 {
        start + beat as f64 * self.seconds_per_beat()
    }

    /// Round `time` to the nearest beat boundary measured from `start`.
    pub fn snap_to_beat(self, start: f64, time: f64) -> f64 {
        let spb = self.seconds_per_beat();
        let beats = ((time - start) / spb).round();
        start + beats * spb
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self(120.0)
    }
}

/// Clamp a beats-per-bar value into `MIN_BEATS_PER_BAR..=MAX_BEATS_PER_BAR`.
pub fn clamp_beats_per_bar(beats: u32) -> u32 {
    beats.clamp(MIN_BEATS_PER_BAR, MAX_BEATS_PER_BAR)
}
