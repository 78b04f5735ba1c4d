//! Sound sources a voice can play: oscillator partials or a sample buffer.

use std::f64::consts::TAU;
use std::sync::Arc;

use arrayvec::ArrayVec;
use nt_ir::AudioBuffer;

/// Maximum partials per oscillator bank.
pub const MAX_PARTIALS: usize = 4;

/// Oscillator waveform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Waveform {
    #[default]
    Sine,
    Triangle,
    Sawtooth,
    Square,
}

impl Waveform {
    /// Value at `phase` in 0..1.
    fn at(self, phase: f64) -> f32 {
        match self {
            Waveform::Sine => (phase * TAU).sin() as f32,
            Waveform::Triangle => (1.0 - 4.0 * (phase - 0.5).abs()) as f32,
            Waveform::Sawtooth => (2.0 * phase - 1.0) as f32,
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

/// One oscillator in a bank.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Partial {
    pub frequency: f32,
    pub gain: f32,
    pub waveform: Waveform,
}

/// Summed oscillators with independent gains.
#[derive(Clone, Debug)]
pub struct OscillatorBank {
    partials: ArrayVec<(Partial, f64), MAX_PARTIALS>,
}

impl OscillatorBank {
    /// Build a bank; partials beyond [`MAX_PARTIALS`] are ignored.
    pub fn new(partials: &[Partial]) -> Self {
        Self {
            partials: partials.iter().take(MAX_PARTIALS).map(|p| (*p, 0.0)).collect(),
        }
    }

    pub fn partials(&self) -> impl Iterator<Item = &Partial> {
        self.partials.iter().map(|(p, _)| p)
    }

    fn next(&mut self, sample_rate: u32) -> f32 {
        let mut out = 0.0;
        for (partial, phase) in &mut self.partials {
            out += partial.waveform.at(*phase) * partial.gain;
            *phase += partial.frequency as f64 / sample_rate as f64;
            *phase -= phase.floor();
        }
        out
    }
}

/// Plays a shared sample buffer at a fixed rate with linear interpolation.
#[derive(Clone, Debug)]
pub struct BufferPlayer {
    buffer: Arc<AudioBuffer>,
    /// Read position in buffer frames.
    position: f64,
    /// Buffer frames advanced per output frame.
    increment: f64,
    /// Loop region in buffer frames.
    loop_region: Option<(f64, f64)>,
}

impl BufferPlayer {
    /// Play `buffer` at `rate` (1.0 = original pitch) into an output running
    /// at `output_rate` Hz.
    pub fn new(buffer: Arc<AudioBuffer>, rate: f64, output_rate: u32) -> Self {
        let increment = rate * buffer.sample_rate() as f64 / output_rate.max(1) as f64;
        Self { buffer, position: 0.0, increment, loop_region: None }
    }

    /// Loop between `start` and `end` seconds once playback reaches `end`.
    ///
    /// Regions that are empty or fall outside the buffer are ignored.
    pub fn with_loop(mut self, start: f64, end: f64) -> Self {
        let sr = self.buffer.sample_rate() as f64;
        let (s, e) = (start * sr, end.min(self.buffer.duration()) * sr);
        if s >= 0.0 && e > s {
            self.loop_region = Some((s, e));
        }
        self
    }

    pub fn increment(&self) -> f64 {
        self.increment
    }

    pub fn buffer(&self) -> &Arc<AudioBuffer> {
        &self.buffer
    }

    fn next(&mut self) -> Option<(f32, f32)> {
        if let Some((start, end)) = self.loop_region {
            if self.position >= end {
                self.position = start + (self.position - end) % (end - start);
            }
        } else if self.position >= self.buffer.frames() as f64 {
            return None;
        }
        let left = self.buffer.sample_at(0, self.position);
        let right = self.buffer.sample_at(1, self.position);
        self.position += self.increment;
        Some((left, right))
    }
}

/// What a voice renders.
#[derive(Clone, Debug)]
pub enum Source {
    Oscillator(OscillatorBank),
    Buffer(BufferPlayer),
}

impl Source {
    /// Produce the next stereo sample, or `None` once the source is exhausted.
    pub fn next(&mut self, sample_rate: u32) -> Option<(f32, f32)> {
        match self {
            Source::Oscillator(bank) => {
                let s = bank.next(sample_rate);
                Some((s, s))
            }
            Source::Buffer(player) => player.next(),
        }
    }
}
