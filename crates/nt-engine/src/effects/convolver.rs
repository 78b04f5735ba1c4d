//! Uniformly partitioned FFT convolution (overlap-save).
//!
//! The impulse response is cut into block-sized partitions, each
//! transformed once at construction. Every input block is transformed once
//! and kept in a frequency-domain delay line; the output block is the
//! inverse transform of the sum of delayed spectra times partition spectra.
//! Latency is zero: partition 0 covers the current block.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Mono partitioned convolver. All buffers are allocated in `new`.
pub struct Convolver {
    block: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    /// Spectra of the impulse partitions.
    partitions: Vec<Vec<Complex<f32>>>,
    /// Spectra of past input windows; `history[head]` is the newest.
    history: Vec<Vec<Complex<f32>>>,
    head: usize,
    /// Last two input blocks.
    window: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    accum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Convolver {
    /// Build a convolver for `impulse` processing `block` frames at a time.
    pub fn new(impulse: &[f32], block: usize) -> Self {
        let block = block.max(1);
        let n = block * 2;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let ifft = planner.plan_fft_inverse(n);
        let scratch_len = fft.get_inplace_scratch_len().max(ifft.get_inplace_scratch_len());
        let mut scratch = vec![Complex::default(); scratch_len];

        let count = impulse.len().div_ceil(block).max(1);
        let partitions: Vec<_> = (0..count)
            .map(|p| {
                let mut spec = vec![Complex::default(); n];
                for (slot, s) in spec.iter_mut().zip(impulse.iter().skip(p * block).take(block)) {
                    *slot = Complex::new(*s, 0.0);
                }
                fft.process_with_scratch(&mut spec, &mut scratch);
                spec
            })
            .collect();

        Self {
            block,
            fft,
            ifft,
            history: vec![vec![Complex::default(); n]; partitions.len()],
            partitions,
            head: 0,
            window: vec![0.0; n],
            spectrum: vec![Complex::default(); n],
            accum: vec![Complex::default(); n],
            scratch,
        }
    }

    /// Frames per call to [`Convolver::process`].
    pub fn block_size(&self) -> usize {
        self.block
    }

    /// Number of impulse partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Convolve one block. Both slices must be `block_size()` long.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let b = self.block;
        debug_assert_eq!(input.len(), b);
        debug_assert_eq!(output.len(), b);

        self.window.copy_within(b.., 0);
        self.window[b..].copy_from_slice(&input[..b]);
        for (c, s) in self.spectrum.iter_mut().zip(&self.window) {
            *c = Complex::new(*s, 0.0);
        }
        self.fft.process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let len = self.history.len();
        self.head = (self.head + len - 1) % len;
        self.history[self.head].copy_from_slice(&self.spectrum);

        self.accum.fill(Complex::default());
        for (p, h) in self.partitions.iter().enumerate() {
            let x = &self.history[(self.head + p) % len];
            for ((acc, x), h) in self.accum.iter_mut().zip(x).zip(h) {
                *acc += x * h;
            }
        }
        self.ifft.process_with_scratch(&mut self.accum, &mut self.scratch);

        let norm = 1.0 / (2 * b) as f32;
        for (o, c) in output.iter_mut().zip(&self.accum[b..]) {
            *o = c.re * norm;
        }
    }

    /// Forget all past input.
    pub fn reset(&mut self) {
        self.window.fill(0.0);
        for spec in &mut self.history {
            spec.fill(Complex::default());
        }
        self.head = 0;
    }
}
