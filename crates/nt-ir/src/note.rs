//! Note names, MIDI numbers and pitch ratios.
//!
//! The editor addresses notes by scientific pitch name ("A4", "C#3", "Bb2").
//! Internally a note is its MIDI number, with C4 = 60 and A4 = 69.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frequency of A4 in Hz.
pub const A4_HZ: f64 = 440.0;

const SHARP_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Error returned when a note name cannot be parsed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NoteError {
    #[error("empty note name")]
    Empty,
    #[error("unknown pitch class in {0:?}")]
    PitchClass(String),
    #[error("missing or invalid octave in {0:?}")]
    Octave(String),
    #[error("note {0:?} is outside the MIDI range")]
    OutOfRange(String),
}

/// A note identified by its MIDI number (0-127).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Note(u8);

impl Note {
    /// Middle C.
    pub const C4: Note = Note(60);
    /// Concert A.
    pub const A4: Note = Note(69);

    /// Create a note from a MIDI number, rejecting values above 127.
    pub const fn from_midi(midi: u8) -> Option<Self> {
        if midi <= 127 {
            Some(Self(midi))
        } else {
            None
        }
    }

    /// MIDI number.
    pub const fn midi(self) -> u8 {
        self.0
    }

    /// Equal-tempered frequency in Hz.
    pub fn frequency(self) -> f64 {
        A4_HZ * 2f64.powf((self.0 as f64 - 69.0) / 12.0)
    }

    /// Signed distance in semitones from `other` to `self`.
    pub fn semitones_from(self, other: Note) -> i32 {
        self.0 as i32 - other.0 as i32
    }

    /// Transpose by `semitones`, returning `None` when leaving the MIDI range.
    pub fn transpose(self, semitones: i32) -> Option<Note> {
        let midi = self.0 as i32 + semitones;
        u8::try_from(midi).ok().and_then(Note::from_midi)
    }
}

/// Playback-rate factor that shifts a sample recorded at `root` to `target`.
///
/// `2^((target - root) / 12)`: one octave up doubles the rate.
pub fn playback_rate(target: Note, root: Note) -> f64 {
    2f64.powf(target.semitones_from(root) as f64 / 12.0)
}

impl FromStr for Note {
    type Err = NoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(NoteError::Empty);
        }
        if let Ok(midi) = s.parse::<u8>() {
            return Note::from_midi(midi).ok_or_else(|| NoteError::OutOfRange(s.to_string()));
        }

        let mut chars = s.char_indices();
        let (_, letter) = chars.next().ok_or(NoteError::Empty)?;
        let base: i32 = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(NoteError::PitchClass(s.to_string())),
        };

        let mut pitch = base;
        let mut octave_start = letter.len_utf8();
        for (idx, c) in chars {
            match c {
                '#' | '♯' => pitch += 1,
                'b' | '♭' => pitch -= 1,
                _ => {
                    octave_start = idx;
                    break;
                }
            }
            octave_start = idx + c.len_utf8();
        }

        let octave: i32 = s[octave_start..]
            .parse()
            .map_err(|_| NoteError::Octave(s.to_string()))?;
        let midi = (octave + 1) * 12 + pitch;
        u8::try_from(midi)
            .ok()
            .and_then(Note::from_midi)
            .ok_or_else(|| NoteError::OutOfRange(s.to_string()))
    }
}

impl TryFrom<String> for Note {
    type Error = NoteError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Note> for String {
    fn from(note: Note) -> Self {
        note.to_string()
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let octave = self.0 as i32 / 12 - 1;
        write!(f, "{}{}", SHARP_NAMES[self.0 as usize % 12], octave)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(s: &str) -> Note {
        s.parse().unwrap()
    }

    #[test]
    fn parse_naturals() {
        assert_eq!(n("C4").midi(), 60);
        assert_eq!(n("A4").midi(), 69);
        assert_eq!(n("a0").midi(), 21);
    }

    #[test]
    fn parse_accidentals() {
        assert_eq!(n("C#4").midi(), 61);
        assert_eq!(n("Db4").midi(), 61);
        assert_eq!(n("Cb4").midi(), 59);
        assert_eq!(n("F♯3").midi(), 54);
    }

    #[test]
    fn parse_negative_octave() {
        assert_eq!(n("C-1").midi(), 0);
    }

    #[test]
    fn parse_midi_number() {
        assert_eq!(n("64").midi(), 64);
    }

    #[test]
    fn parse_errors() {
        assert_eq!("".parse::<Note>(), Err(NoteError::Empty));
        assert!(matches!("H4".parse::<Note>(), Err(NoteError::PitchClass(_))));
        assert!(matches!("C".parse::<Note>(), Err(NoteError::Octave(_))));
        assert!(matches!("G#9".parse::<Note>(), Err(NoteError::OutOfRange(_))));
        assert!(matches!("200".parse::<Note>(), Err(NoteError::OutOfRange(_))));
    }

    #[test]
    fn display_round_trips_sharps() {
        assert_eq!(n("Db4").to_string(), "C#4");
        assert_eq!(Note::C4.to_string(), "C4");
    }

    #[test]
    fn frequency_of_a4() {
        assert!((Note::A4.frequency() - 440.0).abs() < 1e-9);
        assert!((n("A5").frequency() - 880.0).abs() < 1e-9);
    }

    #[test]
    fn playback_rate_identities() {
        let root = n("C4");
        assert_eq!(playback_rate(root, root), 1.0);
        assert!((playback_rate(n("C5"), root) - 2.0).abs() < 1e-12);
        assert!((playback_rate(n("C3"), root) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn transpose_bounds() {
        assert_eq!(Note::C4.transpose(12), Some(n("C5")));
        assert_eq!(Note::C4.transpose(-61), None);
    }
}
