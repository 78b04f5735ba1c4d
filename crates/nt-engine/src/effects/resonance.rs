//! Convolution resonance insert.
//!
//! Sums a dry path and a convolved wet path. Both levels are automatable
//! so the control side can crossfade them when the sustain pedal moves.

use nt_ir::{AudioBuffer, BLOCK_SIZE};

use crate::effects::convolver::Convolver;
use crate::insert::Insert;
use crate::param::Param;

/// Dry level parameter index.
pub const PARAM_DRY: u16 = 0;
/// Wet level parameter index.
pub const PARAM_WET: u16 = 1;

pub struct ResonanceInsert {
    convolvers: [Convolver; 2],
    dry: Param,
    wet: Param,
    wet_block: [Vec<f32>; 2],
    dry_gain: Vec<f32>,
    wet_gain: Vec<f32>,
}

impl ResonanceInsert {
    /// Build from an impulse at the context sample rate. A mono impulse
    /// feeds both channels.
    pub fn new(impulse: &AudioBuffer, dry: f32, wet: f32) -> Self {
        Self {
            convolvers: [
                Convolver::new(impulse_plane(impulse, 0), BLOCK_SIZE),
                Convolver::new(impulse_plane(impulse, 1), BLOCK_SIZE),
            ],
            dry: Param::new(dry),
            wet: Param::new(wet),
            wet_block: [vec![0.0; BLOCK_SIZE], vec![0.0; BLOCK_SIZE]],
            dry_gain: vec![0.0; BLOCK_SIZE],
            wet_gain: vec![0.0; BLOCK_SIZE],
        }
    }
}

fn impulse_plane(impulse: &AudioBuffer, ch: u16) -> &[f32] {
    if impulse.channels() == 0 {
        return &[];
    }
    impulse.channel(ch.min(impulse.channels() - 1))
}

impl Insert for ResonanceInsert {
    fn name(&self) -> &'static str {
        "resonance"
    }

    fn process(&mut self, block: &mut AudioBuffer, frames: usize, t0: f64, dt: f64) {
        if frames != BLOCK_SIZE || block.channels() < 2 {
            return;
        }
        for i in 0..frames {
            let t = t0 + i as f64 * dt;
            self.dry_gain[i] = self.dry.advance(t);
            self.wet_gain[i] = self.wet.advance(t);
        }
        for ch in 0..2u16 {
            let idx = ch as usize;
            self.convolvers[idx].process(&block.channel(ch)[..frames], &mut self.wet_block[idx]);
            let out = block.channel_mut(ch);
            for i in 0..frames {
                out[i] = out[i] * self.dry_gain[i] + self.wet_block[idx][i] * self.wet_gain[i];
            }
        }
    }

    fn param_mut(&mut self, index: u16) -> Option<&mut Param> {
        match index {
            PARAM_DRY => Some(&mut self.dry),
            PARAM_WET => Some(&mut self.wet),
            _ => None,
        }
    }

    fn reset(&mut self) {
        for conv in &mut self.convolvers {
            conv.reset();
        }
    }
}
