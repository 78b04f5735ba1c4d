//! Insert trait for per-bus effects.

use nt_ir::AudioBuffer;

use crate::param::Param;

/// An effect processing a bus block in place.
///
/// Inserts run on the render thread: `process` must not allocate or block.
pub trait Insert: Send {
    /// Display name for diagnostics.
    fn name(&self) -> &'static str;

    /// Process `frames` frames of `block` in place. `t0` is the context time
    /// of the first frame and `dt` the time between frames.
    fn process(&mut self, block: &mut AudioBuffer, frames: usize, t0: f64, dt: f64);

    /// Automatable parameter by index.
    fn param_mut(&mut self, index: u16) -> Option<&mut Param>;

    /// Clear internal state (tails, delay lines).
    fn reset(&mut self);
}
