//! Velocity-layered multisampling with sustain pedal and resonance.
//!
//! Each layer maps sampled notes to buffers; a trigger picks the softest
//! layer that covers its velocity and pitch-shifts the nearest sample. While
//! the pedal is down releases ring longer and the resonance insert blends in.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use nt_engine::{BufferPlayer, ParamEvent, Source};
use nt_ir::{playback_rate, time_constant_for, AudioBuffer, LayeredConfig, Note};

use super::nearest_sample;
use crate::error::LoadError;
use crate::instrument::{Backend, PlayContext, Resources};
use crate::loader::load_sample;
use crate::resonance::ResonanceStage;

/// Attack ramp that keeps sample onsets click-free.
const ONSET: f64 = 0.003;

pub struct LoadedLayer {
    pub max_velocity: f32,
    pub samples: BTreeMap<Note, Arc<AudioBuffer>>,
}

pub struct LayeredSamples {
    pub layers: Vec<LoadedLayer>,
    pub impulse: Option<Arc<AudioBuffer>>,
}

pub struct LayeredBackend {
    config: LayeredConfig,
    layers: Vec<LoadedLayer>,
    resonance: Option<ResonanceStage>,
    pedal_down: bool,
}

impl LayeredBackend {
    pub fn new(config: LayeredConfig) -> Self {
        Self { config, layers: Vec::new(), resonance: None, pedal_down: false }
    }

    pub fn is_pedal_down(&self) -> bool {
        self.pedal_down
    }

    pub fn resonance(&self) -> Option<&ResonanceStage> {
        self.resonance.as_ref()
    }

    /// The softest layer whose ceiling covers `velocity`, else the loudest.
    fn layer_for(&self, velocity: f32) -> Option<&LoadedLayer> {
        self.layers.iter().find(|l| velocity <= l.max_velocity).or_else(|| self.layers.last())
    }

    fn release_time_constant(&self, note: Note) -> f32 {
        let tc = time_constant_for(self.config.release.as_ref(), note);
        if self.pedal_down {
            tc * self.config.pedal_release_scale.max(1.0)
        } else {
            tc
        }
    }
}

impl Backend for LayeredBackend {
    type Loaded = LayeredSamples;

    fn kind(&self) -> &'static str {
        "layered"
    }

    fn load_samples(&self, res: &Resources) -> BoxFuture<'static, Result<LayeredSamples, LoadError>> {
        let mut specs: Vec<_> = self.config.layers.iter().filter(|l| !l.samples.is_empty()).cloned().collect();
        specs.sort_by(|a, b| a.max_velocity.total_cmp(&b.max_velocity));
        let impulse_id = self.config.resonance.as_ref().and_then(|r| r.impulse.clone());
        let (cache, source) = (Arc::clone(&res.cache), Arc::clone(&res.source));

        async move {
            if specs.is_empty() {
                return Err(LoadError::Fetch { id: String::new(), reason: "no layer samples configured".into() });
            }
            let mut layers = Vec::with_capacity(specs.len());
            for spec in specs {
                let loads = spec.samples.iter().map(|(&note, id)| {
                    load_sample(Arc::clone(&cache), Arc::clone(&source), id.clone())
                        .map(move |loaded| loaded.map(|buffer| (note, buffer)))
                });
                let samples = try_join_all(loads).await?.into_iter().collect();
                layers.push(LoadedLayer { max_velocity: spec.max_velocity, samples });
            }
            let impulse = match impulse_id {
                Some(id) => match load_sample(cache, source, id).await {
                    Ok(ir) => Some(ir),
                    Err(e) => {
                        tracing::warn!(error = %e, "impulse response unavailable, using a synthetic one");
                        None
                    }
                },
                None => None,
            };
            Ok(LayeredSamples { layers, impulse })
        }
        .boxed()
    }

    fn install(&mut self, loaded: LayeredSamples, play: &mut PlayContext<'_>) {
        self.layers = loaded.layers;
        if let Some(config) = &self.config.resonance {
            self.resonance = Some(ResonanceStage::install(play.ctx, play.bus, config, loaded.impulse.as_deref()));
        }
    }

    fn play_note_impl(&mut self, note: Note, velocity: f32, play: &mut PlayContext<'_>) {
        let Some(layer) = self.layer_for(velocity) else { return };
        let Some((sampled, buffer)) = nearest_sample(&layer.samples, note) else { return };

        let player = BufferPlayer::new(Arc::clone(buffer), playback_rate(note, sampled), play.sample_rate());
        let peak = self.config.velocity_curve.apply(velocity);
        let onset = [ParamEvent::LinearRamp { value: peak, time: play.now() + ONSET }];
        play.start_voice(note, Source::Buffer(player), 0.0, &onset);
    }

    fn stop_note_impl(&mut self, note: Note, play: &mut PlayContext<'_>) {
        play.release(note, self.release_time_constant(note));
    }

    fn set_pedal(&mut self, down: bool, play: &mut PlayContext<'_>) {
        if self.pedal_down == down {
            return;
        }
        self.pedal_down = down;
        if let Some(stage) = self.resonance.as_mut() {
            stage.set_pedal_down(play.ctx, down);
        }
        if !down {
            // Tails started under the pedal fall back to the normal release.
            let tails: Vec<_> = play.voices.iter().filter(|v| v.releasing).map(|v| (v.id, v.note)).collect();
            for (id, note) in tails {
                play.fade_out(id, self.release_time_constant(note));
            }
        }
    }

    fn disconnect(&mut self, play: &mut PlayContext<'_>) {
        if let Some(stage) = self.resonance.take() {
            stage.uninstall(play.ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(max_velocity: f32, notes: &[&str]) -> LoadedLayer {
        let samples = notes
            .iter()
            .map(|n| (n.parse().unwrap(), Arc::new(AudioBuffer::new(1, 16, 44100))))
            .collect();
        LoadedLayer { max_velocity, samples }
    }

    #[test]
    fn softest_covering_layer_wins() {
        let mut backend = LayeredBackend::new(LayeredConfig::default());
        backend.layers = vec![layer(0.4, &["C4"]), layer(0.8, &["D4"]), layer(1.0, &["E4"])];
        let pick = |v: f32| backend.layer_for(v).map(|l| l.max_velocity);
        assert_eq!(pick(0.1), Some(0.4));
        assert_eq!(pick(0.4), Some(0.4));
        assert_eq!(pick(0.41), Some(0.8));
        assert_eq!(pick(1.0), Some(1.0));
    }

    #[test]
    fn velocity_above_every_layer_uses_loudest() {
        let mut backend = LayeredBackend::new(LayeredConfig::default());
        backend.layers = vec![layer(0.3, &["C4"]), layer(0.6, &["C4"])];
        assert_eq!(backend.layer_for(0.9).map(|l| l.max_velocity), Some(0.6));
    }

    #[test]
    fn pedal_lengthens_release() {
        let config = LayeredConfig { pedal_release_scale: 4.0, ..LayeredConfig::default() };
        let mut backend = LayeredBackend::new(config);
        let c4 = Note::C4;
        let normal = backend.release_time_constant(c4);
        backend.pedal_down = true;
        assert!((backend.release_time_constant(c4) - normal * 4.0).abs() < 1e-6);
    }
}
