//! Oscillator synthesis: a fundamental plus a few harmonics per note.

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use nt_engine::{OscillatorBank, Partial, Source, Waveform};
use nt_ir::{Adsr, Note, ReleaseProfile, SynthConfig, Timbre};

use crate::error::LoadError;
use crate::instrument::{adsr_events, Backend, PlayContext, Resources};

/// Harmonic recipe and envelope of a timbre.
struct TimbreSpec {
    waveform: Waveform,
    /// (frequency ratio, relative gain)
    partials: &'static [(f32, f32)],
    attack: f32,
    decay: f32,
    sustain: f32,
}

fn timbre_spec(timbre: Timbre) -> TimbreSpec {
    match timbre {
        Timbre::Piano => TimbreSpec {
            waveform: Waveform::Sine,
            partials: &[(1.0, 1.0), (2.0, 0.5), (3.0, 0.25), (4.0, 0.1)],
            attack: 0.005,
            decay: 1.2,
            sustain: 0.2,
        },
        Timbre::Cello => TimbreSpec {
            waveform: Waveform::Sawtooth,
            partials: &[(1.0, 1.0), (2.0, 0.4), (3.0, 0.2)],
            attack: 0.08,
            decay: 0.4,
            sustain: 0.75,
        },
        Timbre::Saxophone => TimbreSpec {
            waveform: Waveform::Square,
            partials: &[(1.0, 1.0), (2.0, 0.3), (3.0, 0.35)],
            attack: 0.03,
            decay: 0.25,
            sustain: 0.6,
        },
        Timbre::Organ => TimbreSpec {
            waveform: Waveform::Sine,
            partials: &[(1.0, 1.0), (2.0, 0.7), (4.0, 0.4), (8.0, 0.2)],
            attack: 0.01,
            decay: 0.05,
            sustain: 0.95,
        },
    }
}

fn default_release(timbre: Timbre) -> ReleaseProfile {
    match timbre {
        Timbre::Piano => ReleaseProfile::piano(),
        Timbre::Cello => ReleaseProfile::Fixed(0.12),
        Timbre::Saxophone => ReleaseProfile::Fixed(0.06),
        Timbre::Organ => ReleaseProfile::Fixed(0.03),
    }
}

pub struct SynthBackend {
    config: SynthConfig,
    release: ReleaseProfile,
}

impl SynthBackend {
    pub fn new(config: SynthConfig) -> Self {
        let release = config.release.clone().unwrap_or_else(|| default_release(config.timbre));
        Self { config, release }
    }

    /// Partials for `note`, normalized to unit total gain. Partials at or
    /// above Nyquist are dropped.
    fn partials(&self, note: Note, sample_rate: u32) -> Vec<Partial> {
        let spec = timbre_spec(self.config.timbre);
        let f0 = note.frequency() as f32;
        let nyquist = sample_rate as f32 / 2.0;
        let audible: Vec<(f32, f32)> = spec.partials.iter().copied().filter(|(ratio, _)| f0 * ratio < nyquist).collect();
        let total: f32 = audible.iter().map(|(_, g)| g).sum();
        audible
            .into_iter()
            .map(|(ratio, gain)| Partial { frequency: f0 * ratio, gain: gain / total, waveform: spec.waveform })
            .collect()
    }
}

impl Backend for SynthBackend {
    type Loaded = ();

    fn kind(&self) -> &'static str {
        "synth"
    }

    fn needs_loading(&self) -> bool {
        false
    }

    fn load_samples(&self, _res: &Resources) -> BoxFuture<'static, Result<(), LoadError>> {
        future::ready(Ok(())).boxed()
    }

    fn install(&mut self, _loaded: (), _play: &mut PlayContext<'_>) {}

    fn play_note_impl(&mut self, note: Note, velocity: f32, play: &mut PlayContext<'_>) {
        let partials = self.partials(note, play.sample_rate());
        if partials.is_empty() {
            tracing::debug!(%note, "note above Nyquist, not played");
            return;
        }
        let spec = timbre_spec(self.config.timbre);
        let adsr = Adsr::new(spec.attack, spec.decay, spec.sustain, 0.0);
        let peak = self.config.velocity_curve.apply(velocity);
        let events = adsr_events(play.now(), peak, &adsr);
        play.start_voice(note, Source::Oscillator(OscillatorBank::new(&partials)), 0.0, &events);
    }

    fn stop_note_impl(&mut self, note: Note, play: &mut PlayContext<'_>) {
        play.release(note, self.release.time_constant(note));
    }
}
