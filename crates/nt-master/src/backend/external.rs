//! Adapter for sampler libraries that manage their own voices.
//!
//! Such libraries take a note and an output and expose no per-note gain.
//! The adapter gives every note its own gain bus so a release envelope can
//! be applied from outside, and delays the library's own stop so the
//! manual release is heard first.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use nt_audio::AudioContext;
use nt_engine::{BufferPlayer, BusId, Command, ParamEvent, ParamTarget, Source, Voice, VoiceId};
use nt_ir::{playback_rate, release_duration, time_constant_for, AudioBuffer, ExternalConfig, Note};

use super::nearest_sample;
use crate::error::LoadError;
use crate::instrument::{self, Backend, PlayContext, Resources};
use crate::loader::load_sample;

/// A sampler that renders notes into a bus it is handed.
pub trait ExternalSampler: Send + 'static {
    type Loaded: Send + 'static;

    fn load(&self, res: &Resources) -> BoxFuture<'static, Result<Self::Loaded, LoadError>>;

    fn install(&mut self, loaded: Self::Loaded);

    /// Start `note` on `bus`. Returns the voice it plays on.
    fn start(&mut self, ctx: &AudioContext, bus: BusId, note: Note, velocity: f32) -> Option<VoiceId>;

    /// Stop `voice` at context time `at` with the library's own release.
    fn stop(&mut self, ctx: &AudioContext, voice: VoiceId, at: f64);
}

pub struct ExternalAdapter<S> {
    sampler: S,
    config: ExternalConfig,
    note_buses: HashMap<VoiceId, BusId>,
}

impl<S: ExternalSampler> ExternalAdapter<S> {
    pub fn new(sampler: S, config: ExternalConfig) -> Self {
        Self { sampler, config, note_buses: HashMap::new() }
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    /// Per-note buses currently alive.
    pub fn note_buses(&self) -> usize {
        self.note_buses.len()
    }
}

impl<S: ExternalSampler> Backend for ExternalAdapter<S> {
    type Loaded = S::Loaded;

    fn kind(&self) -> &'static str {
        "external"
    }

    fn load_samples(&self, res: &Resources) -> BoxFuture<'static, Result<S::Loaded, LoadError>> {
        self.sampler.load(res)
    }

    fn install(&mut self, loaded: S::Loaded, _play: &mut PlayContext<'_>) {
        self.sampler.install(loaded);
    }

    fn play_note_impl(&mut self, note: Note, velocity: f32, play: &mut PlayContext<'_>) {
        let gain = self.config.velocity_curve.apply(velocity);
        let note_bus = match play.ctx.create_bus(play.bus, gain) {
            Ok(bus) => bus,
            Err(e) => {
                tracing::warn!(error = %e, %note, "no bus for note");
                return;
            }
        };
        let Some(id) = self.sampler.start(play.ctx, note_bus, note, velocity) else {
            let _ = play.ctx.remove_bus(note_bus);
            return;
        };
        play.voices.insert(instrument::Voice { id, note, started: play.now(), releasing: false });
        self.note_buses.insert(id, note_bus);
    }

    fn stop_note_impl(&mut self, note: Note, play: &mut PlayContext<'_>) {
        let Some(id) = play.voices.start_release(note) else { return };
        let Some(&bus) = self.note_buses.get(&id) else { return };
        let tc = time_constant_for(self.config.release.as_ref(), note);
        let now = play.now();
        let delay = self.config.stop_delay.max(0.0) as f64;

        play.automate(ParamTarget::BusGain(bus), ParamEvent::CancelAndHold);
        play.automate(ParamTarget::BusGain(bus), ParamEvent::SetTarget { target: 0.0, time: now, time_constant: tc });
        self.sampler.stop(play.ctx, id, now + delay);
        play.cleanups.schedule(now + release_duration(tc) as f64 + delay, id);
    }

    fn voice_freed(&mut self, id: VoiceId, play: &mut PlayContext<'_>) {
        if let Some(bus) = self.note_buses.remove(&id) {
            let _ = play.ctx.remove_bus(bus);
        }
    }

    fn disconnect(&mut self, play: &mut PlayContext<'_>) {
        for (_, bus) in self.note_buses.drain() {
            let _ = play.ctx.remove_bus(bus);
        }
    }
}

/// Natural release of [`KeymapSampler`] voices.
const KEYMAP_RELEASE: f32 = 0.05;

/// Bundled keymap sampler: nearest sample, pitch-shifted, at a fixed gain.
#[derive(Default)]
pub struct KeymapSampler {
    keymap: BTreeMap<Note, String>,
    samples: BTreeMap<Note, Arc<AudioBuffer>>,
}

impl KeymapSampler {
    pub fn new(keymap: BTreeMap<Note, String>) -> Self {
        Self { keymap, samples: BTreeMap::new() }
    }
}

impl ExternalSampler for KeymapSampler {
    type Loaded = BTreeMap<Note, Arc<AudioBuffer>>;

    fn load(&self, res: &Resources) -> BoxFuture<'static, Result<Self::Loaded, LoadError>> {
        let (cache, source) = (Arc::clone(&res.cache), Arc::clone(&res.source));
        let keymap = self.keymap.clone();
        async move {
            if keymap.is_empty() {
                return Err(LoadError::Fetch { id: String::new(), reason: "empty keymap".into() });
            }
            let loads = keymap.into_iter().map(|(note, id)| {
                load_sample(Arc::clone(&cache), Arc::clone(&source), id).map(move |r| r.map(|b| (note, b)))
            });
            Ok(try_join_all(loads).await?.into_iter().collect())
        }
        .boxed()
    }

    fn install(&mut self, loaded: Self::Loaded) {
        self.samples = loaded;
    }

    fn start(&mut self, ctx: &AudioContext, bus: BusId, note: Note, _velocity: f32) -> Option<VoiceId> {
        let (sampled, buffer) = nearest_sample(&self.samples, note)?;
        let player = BufferPlayer::new(Arc::clone(buffer), playback_rate(note, sampled), ctx.sample_rate());
        let id = ctx.next_voice_id();
        let voice = Voice::new(id, bus, Source::Buffer(player), ctx.current_time());
        ctx.send(Command::StartVoice(Box::new(voice))).ok()?;
        Some(id)
    }

    fn stop(&mut self, ctx: &AudioContext, voice: VoiceId, at: f64) {
        let target = ParamTarget::VoiceGain(voice);
        let _ = ctx.send(Command::Automate {
            target,
            event: ParamEvent::SetTarget { target: 0.0, time: at, time_constant: KEYMAP_RELEASE },
        });
        let _ = ctx.send(Command::StopVoice { id: voice, at: at + release_duration(KEYMAP_RELEASE) as f64 });
    }
}
