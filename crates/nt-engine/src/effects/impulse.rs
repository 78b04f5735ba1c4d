//! Impulse responses for the resonance stage.
//!
//! Without a recorded response, a synthetic one is built from noise with
//! an exponential decay envelope, darkened by a one-pole RC low-pass so the
//! tail loses treble first, like a piano body.

use std::f32::consts::TAU;

use nt_ir::AudioBuffer;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Low-pass cutoff applied to the synthetic noise.
pub const DEFAULT_CUTOFF_HZ: f32 = 4000.0;

/// Level reached at the end of the synthetic tail (-60 dB).
const TAIL_FLOOR: f32 = 0.001;

/// One-pole RC low-pass filter: `y = y_prev + alpha * (x - y_prev)`.
#[derive(Clone, Debug)]
pub struct OnePole {
    prev: f32,
    alpha: f32,
}

impl OnePole {
    pub fn new(cutoff_hz: f32, sample_rate: u32) -> Self {
        let alpha = (TAU * cutoff_hz / sample_rate.max(1) as f32).min(1.0);
        Self { prev: 0.0, alpha }
    }

    pub fn process(&mut self, x: f32) -> f32 {
        self.prev += self.alpha * (x - self.prev);
        self.prev
    }
}

/// Stereo decaying-noise impulse, `seconds` long, normalized to unit energy
/// per channel. The same seed always gives the same response.
pub fn synthetic_impulse(sample_rate: u32, seconds: f32, seed: u64) -> AudioBuffer {
    let frames = ((seconds.max(0.01) * sample_rate as f32) as usize).max(1);
    let decay = TAIL_FLOOR.ln() / frames as f32;
    let planes = (0..2u64)
        .map(|ch| {
            let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(ch));
            let mut filter = OnePole::new(DEFAULT_CUTOFF_HZ, sample_rate);
            let mut plane: Vec<f32> = (0..frames)
                .map(|i| filter.process(rng.gen_range(-1.0f32..1.0)) * (decay * i as f32).exp())
                .collect();
            normalize_energy(&mut plane);
            plane
        })
        .collect();
    AudioBuffer::from_planes(planes, sample_rate)
}

fn normalize_energy(plane: &mut [f32]) {
    let energy: f32 = plane.iter().map(|s| s * s).sum();
    if energy > 0.0 {
        let scale = energy.sqrt().recip();
        plane.iter_mut().for_each(|s| *s *= scale);
    }
}

/// Linearly resample `buffer` to `target_rate`.
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> AudioBuffer {
    if buffer.sample_rate() == target_rate || buffer.sample_rate() == 0 {
        return buffer.clone();
    }
    let ratio = buffer.sample_rate() as f64 / target_rate as f64;
    let frames = (buffer.frames() as f64 / ratio).floor() as usize;
    let planes = (0..buffer.channels())
        .map(|ch| (0..frames).map(|i| buffer.sample_at(ch, i as f64 * ratio)).collect())
        .collect();
    AudioBuffer::from_planes(planes, target_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_is_stereo_and_sized() {
        let ir = synthetic_impulse(1000, 2.0, 7);
        assert_eq!(ir.channels(), 2);
        assert_eq!(ir.frames(), 2000);
        assert_eq!(ir.sample_rate(), 1000);
    }

    #[test]
    fn synthetic_decays() {
        let ir = synthetic_impulse(8000, 1.0, 1);
        let head: f32 = ir.channel(0)[..800].iter().map(|s| s.abs()).sum();
        let tail: f32 = ir.channel(0)[7200..].iter().map(|s| s.abs()).sum();
        assert!(tail < head * 0.05, "head {head} tail {tail}");
    }

    #[test]
    fn synthetic_has_unit_energy_and_is_deterministic() {
        let a = synthetic_impulse(4000, 0.5, 3);
        let b = synthetic_impulse(4000, 0.5, 3);
        assert_eq!(a, b);
        let energy: f32 = a.channel(1).iter().map(|s| s * s).sum();
        assert!((energy - 1.0).abs() < 1e-3);
        assert_ne!(a.channel(0), a.channel(1));
    }

    #[test]
    fn one_pole_converges_to_dc() {
        let mut f = OnePole::new(100.0, 1000);
        let mut y = 0.0;
        for _ in 0..200 {
            y = f.process(1.0);
        }
        assert!((y - 1.0).abs() < 1e-3);
    }

    #[test]
    fn resample_halves_length() {
        let buf = AudioBuffer::from_planes(vec![(0..100).map(|i| i as f32).collect()], 200);
        let out = resample(&buf, 100);
        assert_eq!(out.frames(), 50);
        assert_eq!(out.sample_rate(), 100);
        assert_eq!(out.channel(0)[10], 20.0);
    }
}
