//! Output latency classification.

use std::fmt;

/// Perceived-latency quality band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LatencyBand {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Bad,
}

impl LatencyBand {
    /// Classify a total latency in milliseconds.
    pub fn classify(total_ms: f64) -> Self {
        match total_ms {
            t if t <= 10.0 => LatencyBand::Excellent,
            t if t <= 20.0 => LatencyBand::Good,
            t if t <= 30.0 => LatencyBand::Acceptable,
            t if t <= 50.0 => LatencyBand::Poor,
            _ => LatencyBand::Bad,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LatencyBand::Excellent => "excellent",
            LatencyBand::Good => "good",
            LatencyBand::Acceptable => "acceptable",
            LatencyBand::Poor => "poor",
            LatencyBand::Bad => "bad",
        }
    }
}

/// Latency breakdown of a context.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencyReport {
    /// Device buffer duration.
    pub base_ms: f64,
    /// Host-reported delay between callback and playback.
    pub output_ms: f64,
    pub total_ms: f64,
    pub band: LatencyBand,
}

impl LatencyReport {
    pub fn new(base_ms: f64, output_ms: f64) -> Self {
        let total_ms = base_ms + output_ms;
        Self { base_ms, output_ms, total_ms, band: LatencyBand::classify(total_ms) }
    }
}

impl fmt::Display for LatencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}ms ({}; buffer {:.1}ms + output {:.1}ms)",
            self.total_ms,
            self.band.label(),
            self.base_ms,
            self.output_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_boundaries() {
        assert_eq!(LatencyBand::classify(0.0), LatencyBand::Excellent);
        assert_eq!(LatencyBand::classify(10.0), LatencyBand::Excellent);
        assert_eq!(LatencyBand::classify(10.1), LatencyBand::Good);
        assert_eq!(LatencyBand::classify(20.0), LatencyBand::Good);
        assert_eq!(LatencyBand::classify(30.0), LatencyBand::Acceptable);
        assert_eq!(LatencyBand::classify(50.0), LatencyBand::Poor);
        assert_eq!(LatencyBand::classify(50.1), LatencyBand::Bad);
    }

    #[test]
    fn report_sums_components() {
        let r = LatencyReport::new(5.8, 6.0);
        assert!((r.total_ms - 11.8).abs() < 1e-9);
        assert_eq!(r.band, LatencyBand::Good);
        assert_eq!(r.to_string(), "11.8ms (good; buffer 5.8ms + output 6.0ms)");
    }
}
