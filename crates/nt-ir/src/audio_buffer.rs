//! Multichannel f32 audio buffer with planar layout.

/// Maximum number of audio channels per buffer.
pub const MAX_CHANNELS: u16 = 8;

/// Render quantum used by the engine (frames per block).
pub const BLOCK_SIZE: usize = 256;

/// Bytes per stored sample (32-bit float).
pub const BYTES_PER_SAMPLE: usize = 4;

/// A multichannel f32 audio buffer in planar layout.
///
/// Data is stored as `channels` contiguous planes of `frames` samples each.
/// `data[ch * frames + frame]` gives the sample for channel `ch` at `frame`.
/// Decoded samples and render scratch blocks share this type.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    data: Vec<f32>,
    channels: u16,
    frames: usize,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a new silent buffer with the given dimensions.
    pub fn new(channels: u16, frames: usize, sample_rate: u32) -> Self {
        Self {
            data: vec![0.0; channels as usize * frames],
            channels,
            frames,
            sample_rate,
        }
    }

    /// Build a buffer from one `Vec` per channel.
    ///
    /// Shorter planes are zero-padded to the longest one.
    pub fn from_planes(planes: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        let channels = planes.len().min(MAX_CHANNELS as usize) as u16;
        let frames = planes.iter().map(Vec::len).max().unwrap_or(0);
        let mut buffer = Self::new(channels, frames, sample_rate);
        for (ch, plane) in planes.into_iter().take(channels as usize).enumerate() {
            buffer.channel_mut(ch as u16)[..plane.len()].copy_from_slice(&plane);
        }
        buffer
    }

    /// Fill all samples with zero.
    pub fn silence(&mut self) {
        self.data.fill(0.0);
    }

    /// Number of channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Sample rate the data was recorded at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }

    /// Memory footprint of the sample data: `frames × channels × 4`.
    pub fn byte_size(&self) -> usize {
        self.frames * self.channels as usize * BYTES_PER_SAMPLE
    }

    /// Read-only access to one channel's sample data.
    pub fn channel(&self, ch: u16) -> &[f32] {
        let start = ch as usize * self.frames;
        &self.data[start..start + self.frames]
    }

    /// Mutable access to one channel's sample data.
    pub fn channel_mut(&mut self, ch: u16) -> &mut [f32] {
        let start = ch as usize * self.frames;
        let len = self.frames;
        &mut self.data[start..start + len]
    }

    /// Linearly interpolated read at a fractional frame position.
    ///
    /// Channels past the last one fold back onto it, so a mono buffer
    /// reads the same plane for left and right.
    pub fn sample_at(&self, ch: u16, position: f64) -> f32 {
        if self.frames == 0 || self.channels == 0 || position < 0.0 {
            return 0.0;
        }
        let plane = self.channel(ch.min(self.channels - 1));
        let idx = position as usize;
        if idx >= self.frames {
            return 0.0;
        }
        let frac = (position - idx as f64) as f32;
        let a = plane[idx];
        let b = plane.get(idx + 1).copied().unwrap_or(0.0);
        a + (b - a) * frac
    }

    /// Sum overlapping channels from `source` into this buffer.
    pub fn mix_from(&mut self, source: &AudioBuffer) {
        self.mix_from_scaled(source, 1.0);
    }

    /// Sum overlapping channels from `source` into this buffer with gain.
    pub fn mix_from_scaled(&mut self, source: &AudioBuffer, gain: f32) {
        let chs = self.channels.min(source.channels);
        let frs = self.frames.min(source.frames);
        for ch in 0..chs {
            let src_start = ch as usize * source.frames;
            let src = &source.data[src_start..src_start + frs];
            let dst = self.channel_mut(ch);
            for (d, s) in dst[..frs].iter_mut().zip(src) {
                *d += s * gain;
            }
        }
    }

    /// Scale all samples by `gain`.
    pub fn apply_gain(&mut self, gain: f32) {
        for s in &mut self.data {
            *s *= gain;
        }
    }

    /// Largest absolute sample value across all channels.
    pub fn peak(&self) -> f32 {
        self.data.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_silent() {
        let buf = AudioBuffer::new(2, 4, 44100);
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.frames(), 4);
        assert!(buf.channel(0).iter().all(|&s| s == 0.0));
        assert!(buf.channel(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn byte_size_is_frames_channels_four() {
        let buf = AudioBuffer::new(2, 1000, 48000);
        assert_eq!(buf.byte_size(), 8000);
    }

    #[test]
    fn from_planes_pads_short_channels() {
        let buf = AudioBuffer::from_planes(vec![vec![1.0, 2.0, 3.0], vec![4.0]], 8000);
        assert_eq!(buf.frames(), 3);
        assert_eq!(buf.channel(0), &[1.0, 2.0, 3.0]);
        assert_eq!(buf.channel(1), &[4.0, 0.0, 0.0]);
    }

    #[test]
    fn channel_mut_writes_correctly() {
        let mut buf = AudioBuffer::new(2, 2, 44100);
        buf.channel_mut(0)[0] = 1.0;
        buf.channel_mut(1)[1] = -0.5;
        assert_eq!(buf.channel(0), &[1.0, 0.0]);
        assert_eq!(buf.channel(1), &[0.0, -0.5]);
    }

    #[test]
    fn sample_at_interpolates() {
        let buf = AudioBuffer::from_planes(vec![vec![0.0, 1.0]], 44100);
        assert!((buf.sample_at(0, 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(buf.sample_at(0, 5.0), 0.0);
    }

    #[test]
    fn sample_at_mono_folds_right_channel() {
        let buf = AudioBuffer::from_planes(vec![vec![0.25, 0.25]], 44100);
        assert_eq!(buf.sample_at(1, 0.0), 0.25);
    }

    #[test]
    fn mix_from_scaled_applies_gain() {
        let mut dst = AudioBuffer::new(1, 2, 44100);
        let src = AudioBuffer::from_planes(vec![vec![1.0, -1.0]], 44100);
        dst.mix_from_scaled(&src, 0.5);
        assert!((dst.channel(0)[0] - 0.5).abs() < 1e-6);
        assert!((dst.channel(0)[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn mix_from_mismatched_sizes_uses_minimum() {
        let mut dst = AudioBuffer::new(2, 4, 44100);
        let src = AudioBuffer::from_planes(vec![vec![1.0, 2.0]], 44100);
        dst.mix_from(&src);
        assert_eq!(dst.channel(0), &[1.0, 2.0, 0.0, 0.0]);
        assert_eq!(dst.channel(1), &[0.0; 4]);
    }

    #[test]
    fn apply_gain_and_peak() {
        let mut buf = AudioBuffer::from_planes(vec![vec![1.0], vec![-0.5]], 44100);
        buf.apply_gain(2.0);
        assert!((buf.peak() - 2.0).abs() < 1e-6);
    }
}
