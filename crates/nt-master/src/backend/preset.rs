//! Multi-zone presets shared through the preset registry.
//!
//! Notes decay by themselves over the configured duration. An early
//! note-off cuts the tail short.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use nt_engine::{BufferPlayer, Command, ParamEvent, Source};
use nt_ir::{playback_rate, time_constant_for, Note, PresetConfig, RELEASE_TIME_CONSTANTS};

use crate::error::LoadError;
use crate::instrument::{Backend, PlayContext, Resources};
use crate::registry::{LoadedPreset, PresetRegistry};

pub struct PresetBackend {
    config: PresetConfig,
    registry: Arc<PresetRegistry>,
    preset: Option<Arc<LoadedPreset>>,
}

impl PresetBackend {
    pub fn new(config: PresetConfig, registry: Arc<PresetRegistry>) -> Self {
        Self { config, registry, preset: None }
    }

    pub fn preset(&self) -> Option<&Arc<LoadedPreset>> {
        self.preset.as_ref()
    }
}

impl Backend for PresetBackend {
    type Loaded = Arc<LoadedPreset>;

    fn kind(&self) -> &'static str {
        "preset"
    }

    fn load_samples(&self, res: &Resources) -> BoxFuture<'static, Result<Arc<LoadedPreset>, LoadError>> {
        let registry = Arc::clone(&res.registry);
        let name = self.config.preset.clone();
        async move { registry.load(&name).await }.boxed()
    }

    fn install(&mut self, loaded: Arc<LoadedPreset>, _play: &mut PlayContext<'_>) {
        self.registry.retain(&loaded);
        self.preset = Some(loaded);
    }

    fn play_note_impl(&mut self, note: Note, velocity: f32, play: &mut PlayContext<'_>) {
        let Some(preset) = self.preset.as_ref() else { return };
        if play.voices.len() >= self.config.max_notes {
            tracing::warn!(preset = %preset.name, max_notes = self.config.max_notes, %note, "note cap reached, note dropped");
            return;
        }
        let Some(zone) = preset.zone_for(note) else {
            tracing::debug!(preset = %preset.name, %note, "no zone covers note");
            return;
        };

        let rate = playback_rate(note, zone.root);
        let mut player = BufferPlayer::new(Arc::clone(&zone.buffer), rate, play.sample_rate());
        if let Some(lp) = zone.loop_points {
            player = player.with_loop(lp.start, lp.end);
        }
        let peak = self.config.velocity_curve.apply(velocity);
        let now = play.now();
        let duration = self.config.duration.max(0.01);
        let decay = [ParamEvent::SetTarget { target: 0.0, time: now, time_constant: duration / RELEASE_TIME_CONSTANTS }];
        let Some(id) = play.start_voice(note, Source::Buffer(player), peak, &decay) else { return };

        let end = now + duration as f64;
        play.send(Command::StopVoice { id, at: end });
        play.cleanups.schedule(end, id);
    }

    fn stop_note_impl(&mut self, note: Note, play: &mut PlayContext<'_>) {
        play.release(note, time_constant_for(self.config.release.as_ref(), note));
    }

    fn disconnect(&mut self, _play: &mut PlayContext<'_>) {
        if let Some(preset) = self.preset.take() {
            self.registry.release(&preset.name);
        }
    }
}
