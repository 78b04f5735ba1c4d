//! Sound-generation backends and the instrument factory.

mod external;
mod layered;
mod preset;
mod sampler;
mod synth;

pub use external::{ExternalAdapter, ExternalSampler, KeymapSampler};
pub use layered::{LayeredBackend, LayeredSamples, LoadedLayer};
pub use preset::PresetBackend;
pub use sampler::SamplerBackend;
pub use synth::SynthBackend;

use std::collections::BTreeMap;
use std::sync::Arc;

use nt_audio::AudioError;
use nt_ir::{InstrumentConfig, Note};

use crate::instrument::{Instrument, Playable, Resources};

/// Build the instrument described by `config`, with its own output bus.
pub fn create(name: &str, config: &InstrumentConfig, res: Resources) -> Result<Box<dyn Playable>, AudioError> {
    let instrument: Box<dyn Playable> = match config {
        InstrumentConfig::Synth(c) => Box::new(Instrument::new(name, SynthBackend::new(c.clone()), res, c.gain)?),
        InstrumentConfig::Sampler(c) => Box::new(Instrument::new(name, SamplerBackend::new(c.clone()), res, c.gain)?),
        InstrumentConfig::Preset(c) => {
            let backend = PresetBackend::new(c.clone(), Arc::clone(&res.registry));
            Box::new(Instrument::new(name, backend, res, c.gain)?)
        }
        InstrumentConfig::Layered(c) => Box::new(Instrument::new(name, LayeredBackend::new(c.clone()), res, c.gain)?),
        InstrumentConfig::External(c) => {
            let backend = ExternalAdapter::new(KeymapSampler::new(c.samples.clone()), c.clone());
            Box::new(Instrument::new(name, backend, res, c.gain)?)
        }
    };
    tracing::debug!(instrument = name, kind = config.kind(), "instrument created");
    Ok(instrument)
}

/// The sampled note closest to `note`; ties go to the lower sample.
pub(crate) fn nearest_sample<T>(samples: &BTreeMap<Note, T>, note: Note) -> Option<(Note, &T)> {
    let below = samples.range(..=note).next_back();
    let above = samples.range(note..).next();
    let (n, v) = match (below, above) {
        (Some(b), Some(a)) if a.0.semitones_from(note) < note.semitones_from(*b.0) => a,
        (Some(b), _) => b,
        (None, Some(a)) => a,
        (None, None) => return None,
    };
    Some((*n, v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, SampleCache};
    use crate::instrument::LoadState;
    use crate::loader::LOAD_TIMEOUT;
    use crate::registry::PresetRegistry;
    use crate::resonance::ResonanceStage;
    use crate::source::{MemorySource, SampleSource};
    use nt_audio::{AudioContext, ContextConfig};
    use nt_engine::Frame;
    use nt_ir::{
        ExternalConfig, LayeredConfig, PresetConfig, ResonanceConfig, SamplerConfig, SynthConfig, TriggerMode,
        VelocityLayer,
    };
    use tokio::runtime::Handle;

    const RATE: u32 = 8000;

    fn n(s: &str) -> Note {
        s.parse().unwrap()
    }

    fn tone_wav() -> Vec<u8> {
        nt_formats::frames_to_wav(&vec![Frame { left: 0.5, right: 0.5 }; RATE as usize], RATE)
    }

    fn resources(source: Arc<MemorySource>) -> Resources {
        let ctx = AudioContext::new(&ContextConfig::offline(RATE)).unwrap();
        ctx.resume().unwrap();
        let cache = Arc::new(SampleCache::new(CacheConfig::default()));
        let source: Arc<dyn SampleSource> = source;
        let registry = Arc::new(PresetRegistry::new(Arc::clone(&source), Arc::clone(&cache)));
        Resources { ctx, cache, source, registry, runtime: Handle::current(), load_timeout: LOAD_TIMEOUT }
    }

    fn with_tone() -> Arc<MemorySource> {
        let source = Arc::new(MemorySource::new());
        source.insert("tone.wav", tone_wav());
        source
    }

    fn sampler(config: SamplerConfig) -> Instrument<SamplerBackend> {
        let config = SamplerConfig { sample: "tone.wav".into(), ..config };
        let gain = config.gain;
        Instrument::new("s", SamplerBackend::new(config), resources(with_tone()), gain).unwrap()
    }

    // === Nearest sample ===

    #[test]
    fn nearest_sample_prefers_closest_then_lower() {
        let map: BTreeMap<Note, u8> = [(n("C4"), 1), (n("E4"), 2), (n("C5"), 3)].into_iter().collect();
        assert_eq!(nearest_sample(&map, n("C4")), Some((n("C4"), &1)));
        assert_eq!(nearest_sample(&map, n("D#4")), Some((n("E4"), &2)));
        assert_eq!(nearest_sample(&map, n("D4")), Some((n("C4"), &1)));
        assert_eq!(nearest_sample(&map, n("A0")), Some((n("C4"), &1)));
        assert_eq!(nearest_sample(&map, n("C8")), Some((n("C5"), &3)));
        assert_eq!(nearest_sample(&BTreeMap::<Note, u8>::new(), n("C4")), None);
    }

    // === Synth ===

    #[tokio::test]
    async fn synth_plays_without_loading() {
        let res = resources(Arc::new(MemorySource::new()));
        let ctx = res.ctx.clone();
        let mut synth = create("lead", &InstrumentConfig::Synth(SynthConfig::default()), res).unwrap();
        assert_eq!(synth.load_state(), LoadState::Loaded);
        synth.trigger_note(Note::A4, 1.0);
        synth.trigger_note(Note::A4, 1.0);
        assert_eq!(synth.active_notes(), vec![Note::A4]);
        let frames = ctx.render(1024).unwrap();
        assert!(frames.iter().any(|f| f.peak() > 0.01));
    }

    // === Sampler ===

    #[tokio::test]
    async fn sampler_queues_until_loaded() {
        let mut inst = sampler(SamplerConfig::default());
        assert_eq!(inst.state(), LoadState::Idle);
        inst.trigger_note(n("C4"), 0.8);
        inst.trigger_note(n("E4"), 0.8);
        assert_eq!(inst.state(), LoadState::Loading);
        assert_eq!(inst.pending_notes(), vec![n("C4"), n("E4")]);

        inst.finish_loading().await;
        assert_eq!(inst.state(), LoadState::Loaded);
        assert!(inst.pending_notes().is_empty());
        assert_eq!(inst.voices().active_notes(), vec![n("C4"), n("E4")]);
    }

    #[tokio::test]
    async fn release_while_loading_drops_queued_note() {
        let mut inst = sampler(SamplerConfig::default());
        inst.trigger_note(n("C4"), 0.8);
        inst.trigger_note(n("G4"), 0.8);
        inst.release_note(n("C4"));
        inst.finish_loading().await;
        assert_eq!(inst.voices().active_notes(), vec![n("G4")]);
    }

    #[tokio::test]
    async fn oldest_voice_is_stolen_at_the_limit() {
        let mut inst = sampler(SamplerConfig { max_voices: 2, ..SamplerConfig::default() });
        inst.trigger_note(n("C4"), 1.0);
        inst.finish_loading().await;
        inst.trigger_note(n("D4"), 1.0);
        inst.trigger_note(n("E4"), 1.0);
        assert_eq!(inst.voices().len(), 2);
        assert_eq!(inst.voices().active_notes(), vec![n("D4"), n("E4")]);
    }

    #[tokio::test]
    async fn toggle_stops_on_second_trigger_and_restarts_on_third() {
        let mut inst = sampler(SamplerConfig { trigger_mode: TriggerMode::Toggle, ..SamplerConfig::default() });
        inst.trigger_note(n("C4"), 1.0);
        inst.finish_loading().await;

        inst.release_note(n("C4"));
        assert_eq!(inst.voices().active_notes(), vec![n("C4")], "note-off is ignored in toggle mode");

        inst.trigger_note(n("C4"), 1.0);
        assert!(inst.voices().active_notes().is_empty());
        assert_eq!(inst.voices().releasing(n("C4")).len(), 1);

        inst.trigger_note(n("C4"), 1.0);
        assert_eq!(inst.voices().active_notes(), vec![n("C4")]);
        assert_eq!(inst.voices().len(), 1);
    }

    #[tokio::test]
    async fn one_shot_ignores_note_off() {
        let mut inst = sampler(SamplerConfig { trigger_mode: TriggerMode::OneShot, ..SamplerConfig::default() });
        inst.trigger_note(n("C4"), 1.0);
        inst.finish_loading().await;
        inst.release_note(n("C4"));
        assert_eq!(inst.voices().active_notes(), vec![n("C4")]);
        assert_eq!(inst.pending_cleanups(), 1);
    }

    #[tokio::test]
    async fn gate_release_schedules_cleanup() {
        let mut inst = sampler(SamplerConfig::default());
        inst.trigger_note(n("C4"), 1.0);
        inst.finish_loading().await;
        inst.release_note(n("C4"));
        assert_eq!(inst.pending_cleanups(), 1);
        assert_eq!(inst.voices().releasing(n("C4")).len(), 1);
    }

    #[tokio::test]
    async fn missing_sample_is_terminal_error() {
        let res = resources(Arc::new(MemorySource::new()));
        let config = SamplerConfig { sample: "absent.wav".into(), ..SamplerConfig::default() };
        let mut inst = Instrument::new("s", SamplerBackend::new(config), res, 0.8).unwrap();
        inst.trigger_note(n("C4"), 1.0);
        inst.finish_loading().await;
        assert_eq!(inst.state(), LoadState::Error);
        assert!(inst.pending_notes().is_empty());

        inst.trigger_note(n("D4"), 1.0);
        assert_eq!(inst.state(), LoadState::Error);
        assert!(inst.pending_notes().is_empty());
        assert!(inst.voices().is_empty());
    }

    // === Preset ===

    fn preset_source() -> Arc<MemorySource> {
        let source = with_tone();
        source.insert("keys", r#"{"zones":[{"sample":"tone.wav","root":"C4","low":"C0","high":"B8"}]}"#.as_bytes());
        source
    }

    #[tokio::test]
    async fn preset_drops_notes_over_the_cap() {
        let res = resources(preset_source());
        let config = PresetConfig { preset: "keys".into(), max_notes: 1, ..PresetConfig::default() };
        let backend = PresetBackend::new(config, Arc::clone(&res.registry));
        let mut inst = Instrument::new("p", backend, res, 0.8).unwrap();
        inst.trigger_note(n("C4"), 1.0);
        inst.finish_loading().await;
        inst.trigger_note(n("E4"), 1.0);
        assert_eq!(inst.voices().active_notes(), vec![n("C4")]);
    }

    #[tokio::test]
    async fn disposing_preset_instrument_releases_registry_reference() {
        let res = resources(preset_source());
        let registry = Arc::clone(&res.registry);
        let config = InstrumentConfig::Preset(PresetConfig { preset: "keys".into(), ..PresetConfig::default() });
        let mut inst = create("p", &config, res).unwrap();
        inst.trigger_note(n("C4"), 1.0);
        inst.finish_loading().await;
        assert_eq!(registry.ref_count("keys"), 1);
        inst.dispose();
        assert_eq!(registry.ref_count("keys"), 0);
        assert!(!registry.is_loaded("keys"));
    }

    // === External adapter ===

    // === Layered ===

    #[tokio::test]
    async fn pedal_pressed_while_loading_applies_after_install() {
        let config = LayeredConfig {
            layers: vec![VelocityLayer {
                max_velocity: 1.0,
                samples: [(n("C4"), "tone.wav".to_string())].into_iter().collect(),
            }],
            resonance: Some(ResonanceConfig { decay: 0.1, ..ResonanceConfig::default() }),
            ..LayeredConfig::default()
        };
        let mut inst = Instrument::new("piano", LayeredBackend::new(config), resources(with_tone()), 0.8).unwrap();
        inst.set_pedal(true);
        inst.trigger_note(n("C4"), 1.0);
        assert_eq!(inst.state(), LoadState::Loading);
        assert!(!inst.backend().is_pedal_down());

        inst.finish_loading().await;
        assert!(inst.backend().is_pedal_down());
        assert!(inst.backend().resonance().is_some_and(ResonanceStage::is_pedal_down));
    }

    #[tokio::test]
    async fn external_note_bus_lives_until_cleanup() {
        let res = resources(with_tone());
        let ctx = res.ctx.clone();
        let config = ExternalConfig { samples: [(n("C4"), "tone.wav".to_string())].into_iter().collect(), ..ExternalConfig::default() };
        let backend = ExternalAdapter::new(KeymapSampler::new(config.samples.clone()), config);
        let mut inst = Instrument::new("x", backend, res, 0.8).unwrap();
        inst.trigger_note(n("D4"), 1.0);
        inst.finish_loading().await;
        assert_eq!(inst.backend().note_buses(), 1);

        inst.release_note(n("D4"));
        inst.update();
        assert_eq!(inst.backend().note_buses(), 1);

        ctx.render(RATE as usize).unwrap();
        inst.update();
        assert_eq!(inst.backend().note_buses(), 0);
        assert!(inst.voices().is_empty());
    }

    #[tokio::test]
    async fn empty_keymap_fails_to_load() {
        let res = resources(with_tone());
        let backend = ExternalAdapter::new(KeymapSampler::default(), ExternalConfig::default());
        let mut inst = Instrument::new("x", backend, res, 0.8).unwrap();
        inst.trigger_note(n("C4"), 1.0);
        inst.finish_loading().await;
        assert_eq!(inst.state(), LoadState::Error);
    }
}
