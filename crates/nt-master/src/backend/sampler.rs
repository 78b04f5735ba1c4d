//! Single-sample playback, pitch-shifted from a root note.

use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use nt_engine::{BufferPlayer, Source};
use nt_ir::{playback_rate, AudioBuffer, Note, SamplerConfig, TriggerMode};

use crate::error::LoadError;
use crate::instrument::{adsr_events, Backend, PlayContext, Resources};
use crate::loader::load_sample;

/// Fade applied to a voice stolen to make room for a new one.
const STEAL_FADE: f64 = 0.015;

pub struct SamplerBackend {
    config: SamplerConfig,
    buffer: Option<Arc<AudioBuffer>>,
}

impl SamplerBackend {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config, buffer: None }
    }

    pub fn buffer(&self) -> Option<&Arc<AudioBuffer>> {
        self.buffer.as_ref()
    }

    fn make_room(&self, play: &mut PlayContext<'_>) {
        let limit = self.config.max_voices.max(1);
        while play.voices.len() >= limit {
            let Some(oldest) = play.voices.oldest().map(|v| v.id) else { break };
            tracing::debug!(voice = oldest, limit, "stealing oldest voice");
            play.hard_stop(oldest, STEAL_FADE);
        }
    }
}

impl Backend for SamplerBackend {
    type Loaded = Arc<AudioBuffer>;

    fn kind(&self) -> &'static str {
        "sampler"
    }

    fn load_samples(&self, res: &Resources) -> BoxFuture<'static, Result<Arc<AudioBuffer>, LoadError>> {
        if self.config.sample.is_empty() {
            let err = LoadError::Fetch { id: String::new(), reason: "no sample configured".into() };
            return future::ready(Err(err)).boxed();
        }
        load_sample(Arc::clone(&res.cache), Arc::clone(&res.source), self.config.sample.clone()).boxed()
    }

    fn install(&mut self, loaded: Arc<AudioBuffer>, _play: &mut PlayContext<'_>) {
        self.buffer = Some(loaded);
    }

    fn play_note_impl(&mut self, note: Note, velocity: f32, play: &mut PlayContext<'_>) {
        let Some(buffer) = self.buffer.clone() else { return };
        let mode = self.config.trigger_mode;

        // A toggled note still ringing out restarts from a clean slate.
        if mode == TriggerMode::Toggle {
            for id in play.voices.releasing(note) {
                play.hard_stop(id, 0.0);
            }
        }
        self.make_room(play);

        let rate = playback_rate(note, self.config.root_note);
        let duration = buffer.duration() / rate;
        let mut player = BufferPlayer::new(buffer, rate, play.sample_rate());
        if let (Some(lp), false) = (self.config.loop_points, mode == TriggerMode::OneShot) {
            player = player.with_loop(lp.start, lp.end);
        }
        let peak = self.config.velocity_curve.apply(velocity);
        let now = play.now();
        let events = adsr_events(now, peak, &self.config.adsr);
        let id = play.start_voice(note, Source::Buffer(player), 0.0, &events);

        if let (Some(id), TriggerMode::OneShot) = (id, mode) {
            // Backstop in case the end-of-sample notice is lost.
            play.cleanups.schedule(now + duration + 0.05, id);
        }
    }

    fn stop_note_impl(&mut self, note: Note, play: &mut PlayContext<'_>) {
        match self.config.trigger_mode {
            TriggerMode::Gate => {
                play.release(note, self.config.adsr.release_time_constant());
            }
            // One-shots run to the end; toggles stop on their next trigger.
            TriggerMode::OneShot | TriggerMode::Toggle => {}
        }
    }

    fn retrigger(&mut self, note: Note, _velocity: f32, play: &mut PlayContext<'_>) {
        if self.config.trigger_mode == TriggerMode::Toggle {
            play.release(note, self.config.adsr.release_time_constant());
        }
    }
}
