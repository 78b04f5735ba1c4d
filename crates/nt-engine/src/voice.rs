//! Voice: one sounding note on the render side.

use nt_ir::AudioBuffer;

use crate::param::{Param, ParamEvent};
use crate::source::Source;

/// Identifier chosen by the control side. Unique per context.
pub type VoiceId = u64;

/// Identifier of a mix bus. [`MASTER_BUS`] is the engine output.
pub type BusId = u32;

/// The engine's output bus. Always present.
pub const MASTER_BUS: BusId = 0;

/// Voice lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VoiceState {
    /// Scheduled start time not reached yet.
    #[default]
    Pending,
    /// Producing audio.
    Playing,
    /// Stop time scheduled; release tail is playing.
    Releasing,
    /// Done; the slot can be reused.
    Finished,
}

/// A source, a gain envelope and a time window.
#[derive(Clone, Debug)]
pub struct Voice {
    pub id: VoiceId,
    /// Bus this voice mixes into.
    pub bus: BusId,
    pub source: Source,
    /// Amplitude envelope.
    pub gain: Param,
    /// Context time the voice starts at.
    pub start: f64,
    /// Context time the voice is silenced and freed at.
    pub stop: Option<f64>,
    pub state: VoiceState,
    /// Allocation order, used to pick the oldest voice when stealing.
    pub(crate) age: u64,
}

impl Voice {
    /// Create a voice starting at `start` with unity gain.
    pub fn new(id: VoiceId, bus: BusId, source: Source, start: f64) -> Self {
        Self {
            id,
            bus,
            source,
            gain: Param::new(1.0),
            start,
            stop: None,
            state: VoiceState::Pending,
            age: 0,
        }
    }

    /// Replace the gain envelope's initial value and events.
    pub fn with_gain(mut self, initial: f32, events: &[ParamEvent]) -> Self {
        self.gain = Param::new(initial);
        for event in events {
            self.gain.schedule(*event, self.start);
        }
        self
    }

    /// Schedule the stop. An earlier stop wins over a later one.
    pub fn stop_at(&mut self, time: f64) {
        let time = self.stop.map_or(time, |t| t.min(time));
        self.stop = Some(time);
        if self.state != VoiceState::Finished {
            self.state = VoiceState::Releasing;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == VoiceState::Finished
    }

    /// Sum `frames` frames starting at context time `t0` into `out`.
    ///
    /// `out` must have at least two channels.
    pub fn render(&mut self, out: &mut AudioBuffer, frames: usize, t0: f64, sample_rate: u32) {
        if self.is_finished() {
            return;
        }
        let dt = 1.0 / sample_rate as f64;
        for i in 0..frames {
            let t = t0 + i as f64 * dt;
            if t < self.start {
                continue;
            }
            if self.stop.is_some_and(|stop| t >= stop) {
                self.state = VoiceState::Finished;
                return;
            }
            if self.state == VoiceState::Pending {
                self.state = VoiceState::Playing;
            }
            let g = self.gain.advance(t);
            let Some((l, r)) = self.source.next(sample_rate) else {
                self.state = VoiceState::Finished;
                return;
            };
            out.channel_mut(0)[i] += l * g;
            out.channel_mut(1)[i] += r * g;
        }
    }
}
