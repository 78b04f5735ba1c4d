//! Built-in inserts and their DSP building blocks.

pub mod convolver;
pub mod impulse;
pub mod resonance;

pub use convolver::Convolver;
pub use impulse::{resample, synthetic_impulse, OnePole};
pub use resonance::{ResonanceInsert, PARAM_DRY, PARAM_WET};
