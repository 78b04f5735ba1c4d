//! Velocity response curves.

use serde::{Deserialize, Serialize};

/// Maps a normalized velocity (0..1) to a gain multiplier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VelocityCurve {
    /// Identity.
    #[default]
    Linear,
    /// `v²`: more dynamic range at the soft end.
    Exponential,
    /// `√v`: compressed dynamics.
    Logarithmic,
}

impl VelocityCurve {
    /// Apply the curve. Input is clamped to 0..1 first.
    pub fn apply(self, velocity: f32) -> f32 {
        let v = velocity.clamp(0.0, 1.0);
        match self {
            VelocityCurve::Linear => v,
            VelocityCurve::Exponential => v * v,
            VelocityCurve::Logarithmic => v.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_values() {
        assert_eq!(VelocityCurve::Linear.apply(0.5), 0.5);
        assert_eq!(VelocityCurve::Exponential.apply(0.5), 0.25);
        assert_eq!(VelocityCurve::Logarithmic.apply(0.25), 0.5);
    }

    #[test]
    fn input_is_clamped() {
        assert_eq!(VelocityCurve::Exponential.apply(2.0), 1.0);
        assert_eq!(VelocityCurve::Logarithmic.apply(-1.0), 0.0);
    }

    #[test]
    fn endpoints_are_fixed() {
        for curve in [VelocityCurve::Linear, VelocityCurve::Exponential, VelocityCurve::Logarithmic] {
            assert_eq!(curve.apply(0.0), 0.0);
            assert_eq!(curve.apply(1.0), 1.0);
        }
    }
}
