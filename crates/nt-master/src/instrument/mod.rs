//! Instruments: a loading state machine in front of a sound backend.
//!
//! Note triggers are synchronous. An instrument that is not loaded yet
//! queues them, starts its backend's load once, and plays the queue in
//! order when the load lands. A failed load is terminal: the queue is
//! dropped and later triggers are ignored.

mod voices;

pub use voices::{CleanupQueue, Voice, VoiceSet};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use nt_audio::{AudioContext, AudioError};
use nt_engine::{BusId, Command, ParamEvent, ParamTarget, Source, VoiceId};
use nt_ir::{release_duration, Adsr, Note};
use tokio::runtime::Handle;

use crate::cache::SampleCache;
use crate::error::LoadError;
use crate::loader::LoadTask;
use crate::registry::PresetRegistry;
use crate::source::SampleSource;

/// Loading state of an instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
    /// Terminal.
    Error,
}

/// Called with the new state on every change.
pub type StateListener = Box<dyn FnMut(LoadState) + Send>;

/// Everything an instrument needs from its surroundings.
#[derive(Clone)]
pub struct Resources {
    pub ctx: AudioContext,
    pub cache: Arc<SampleCache>,
    pub source: Arc<dyn SampleSource>,
    pub registry: Arc<PresetRegistry>,
    pub runtime: Handle,
    pub load_timeout: Duration,
}

/// A backend's view of its instrument while handling a call.
pub struct PlayContext<'a> {
    pub ctx: &'a AudioContext,
    /// The instrument's output bus.
    pub bus: BusId,
    pub voices: &'a mut VoiceSet,
    pub cleanups: &'a mut CleanupQueue,
}

impl PlayContext<'_> {
    pub fn now(&self) -> f64 {
        self.ctx.current_time()
    }

    pub fn sample_rate(&self) -> u32 {
        self.ctx.sample_rate()
    }

    /// Send a command, logging a failure. Returns whether it was queued.
    pub fn send(&self, command: Command) -> bool {
        match self.ctx.send(command) {
            Ok(()) => true,
            Err(AudioError::Closed) => false,
            Err(e) => {
                tracing::warn!(error = %e, "command dropped");
                false
            }
        }
    }

    pub fn automate(&self, target: ParamTarget, event: ParamEvent) -> bool {
        self.send(Command::Automate { target, event })
    }

    /// Start a voice for `note` on the instrument bus with the given gain
    /// envelope and track it as held.
    pub fn start_voice(
        &mut self,
        note: Note,
        source: Source,
        initial_gain: f32,
        envelope: &[ParamEvent],
    ) -> Option<VoiceId> {
        let id = self.ctx.next_voice_id();
        let started = self.now();
        let voice = nt_engine::Voice::new(id, self.bus, source, started).with_gain(initial_gain, envelope);
        if !self.send(Command::StartVoice(Box::new(voice))) {
            return None;
        }
        self.voices.insert(Voice { id, note, started, releasing: false });
        Some(id)
    }

    /// Release the held voice of `note` with an exponential tail.
    pub fn release(&mut self, note: Note, time_constant: f32) -> Option<VoiceId> {
        let id = self.voices.start_release(note)?;
        self.fade_out(id, time_constant);
        Some(id)
    }

    /// Fade `id` toward silence and stop it after the tail. Applied to a
    /// voice already releasing, the shorter of the two tails wins.
    pub fn fade_out(&mut self, id: VoiceId, time_constant: f32) {
        let now = self.now();
        let end = now + release_duration(time_constant) as f64;
        self.automate(ParamTarget::VoiceGain(id), ParamEvent::CancelAndHold);
        self.automate(
            ParamTarget::VoiceGain(id),
            ParamEvent::SetTarget { target: 0.0, time: now, time_constant },
        );
        self.send(Command::StopVoice { id, at: end });
        self.cleanups.schedule(end, id);
    }

    /// Ramp `id` to silence over `fade` seconds and forget it now.
    pub fn hard_stop(&mut self, id: VoiceId, fade: f64) {
        let now = self.now();
        self.voices.remove(id);
        self.cleanups.cancel(id);
        self.automate(ParamTarget::VoiceGain(id), ParamEvent::CancelAndHold);
        self.automate(ParamTarget::VoiceGain(id), ParamEvent::LinearRamp { value: 0.0, time: now + fade });
        self.send(Command::StopVoice { id, at: now + fade });
    }
}

/// Gain events for an ADSR attack and decay starting at `now`. The voice
/// starts at zero gain.
pub fn adsr_events(now: f64, peak: f32, adsr: &Adsr) -> [ParamEvent; 2] {
    let attack_end = now + adsr.attack as f64;
    [
        ParamEvent::LinearRamp { value: peak, time: attack_end },
        ParamEvent::SetTarget {
            target: peak * adsr.sustain,
            time: attack_end,
            time_constant: adsr.decay_time_constant(),
        },
    ]
}

/// A sound-generation backend driven by an [`Instrument`].
pub trait Backend: Send + 'static {
    /// What `load_samples` produces.
    type Loaded: Send + 'static;

    fn kind(&self) -> &'static str;

    /// Backends that can play without loading start out loaded.
    fn needs_loading(&self) -> bool {
        true
    }

    /// Acquire resources. Runs on the runtime, off the control thread.
    fn load_samples(&self, res: &Resources) -> BoxFuture<'static, Result<Self::Loaded, LoadError>>;

    /// Take ownership of loaded resources on the control thread.
    fn install(&mut self, loaded: Self::Loaded, play: &mut PlayContext<'_>);

    fn play_note_impl(&mut self, note: Note, velocity: f32, play: &mut PlayContext<'_>);

    fn stop_note_impl(&mut self, note: Note, play: &mut PlayContext<'_>);

    /// A trigger for a note that is already held. Ignored by default.
    fn retrigger(&mut self, _note: Note, _velocity: f32, _play: &mut PlayContext<'_>) {}

    fn set_pedal(&mut self, _down: bool, _play: &mut PlayContext<'_>) {}

    /// A voice ended or its cleanup came due.
    fn voice_freed(&mut self, _id: VoiceId, _play: &mut PlayContext<'_>) {}

    /// Tear down anything the backend created besides voices on the
    /// instrument bus.
    fn disconnect(&mut self, _play: &mut PlayContext<'_>) {}
}

/// An instrument: load state, note queue and voice tracking around a backend.
pub struct Instrument<B: Backend> {
    name: String,
    backend: B,
    res: Resources,
    bus: BusId,
    state: LoadState,
    pending: VecDeque<(Note, f32)>,
    voices: VoiceSet,
    cleanups: CleanupQueue,
    load: Option<LoadTask<B::Loaded>>,
    listeners: Vec<StateListener>,
    /// Pedal position, applied once the backend is installed.
    pedal: bool,
    disposed: bool,
}

impl<B: Backend> Instrument<B> {
    /// Create the instrument and its output bus at `gain`.
    pub fn new(name: impl Into<String>, backend: B, res: Resources, gain: f32) -> Result<Self, AudioError> {
        let bus = res.ctx.create_bus(res.ctx.master_bus(), gain)?;
        let state = if backend.needs_loading() { LoadState::Idle } else { LoadState::Loaded };
        Ok(Self {
            name: name.into(),
            backend,
            res,
            bus,
            state,
            pending: VecDeque::new(),
            voices: VoiceSet::new(),
            cleanups: CleanupQueue::new(),
            load: None,
            listeners: Vec::new(),
            pedal: false,
            disposed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn voices(&self) -> &VoiceSet {
        &self.voices
    }

    pub fn pending_notes(&self) -> Vec<Note> {
        self.pending.iter().map(|(n, _)| *n).collect()
    }

    pub fn pending_cleanups(&self) -> usize {
        self.cleanups.len()
    }

    pub fn on_state_change(&mut self, listener: StateListener) {
        self.listeners.push(listener);
    }

    fn with_play<R>(&mut self, f: impl FnOnce(&mut B, &mut PlayContext<'_>) -> R) -> R {
        let mut play = PlayContext {
            ctx: &self.res.ctx,
            bus: self.bus,
            voices: &mut self.voices,
            cleanups: &mut self.cleanups,
        };
        f(&mut self.backend, &mut play)
    }

    fn set_state(&mut self, state: LoadState) {
        if self.state == state {
            return;
        }
        self.state = state;
        for listener in &mut self.listeners {
            listener(state);
        }
    }

    pub fn trigger_note(&mut self, note: Note, velocity: f32) {
        if self.disposed {
            return;
        }
        let velocity = if velocity.is_finite() { velocity.clamp(0.0, 1.0) } else { 0.0 };
        match self.state {
            LoadState::Loaded => self.render(note, velocity),
            LoadState::Idle => {
                self.pending.push_back((note, velocity));
                self.start_loading();
            }
            LoadState::Loading => self.pending.push_back((note, velocity)),
            LoadState::Error => {
                tracing::debug!(instrument = %self.name, %note, "trigger ignored, instrument failed to load");
            }
        }
    }

    fn render(&mut self, note: Note, velocity: f32) {
        if self.voices.is_active(note) {
            self.with_play(|backend, play| backend.retrigger(note, velocity, play));
        } else {
            self.with_play(|backend, play| backend.play_note_impl(note, velocity, play));
        }
    }

    pub fn release_note(&mut self, note: Note) {
        if self.disposed {
            return;
        }
        if self.pending.iter().any(|(n, _)| *n == note) {
            self.pending.retain(|(n, _)| *n != note);
            return;
        }
        if self.voices.is_active(note) {
            self.with_play(|backend, play| backend.stop_note_impl(note, play));
        }
    }

    /// Release every held note and drop the queue.
    pub fn all_notes_off(&mut self) {
        self.pending.clear();
        for note in self.voices.active_notes() {
            self.release_note(note);
        }
    }

    pub fn set_pedal(&mut self, down: bool) {
        if self.disposed {
            return;
        }
        self.pedal = down;
        if self.state == LoadState::Loaded {
            self.with_play(|backend, play| backend.set_pedal(down, play));
        }
    }

    fn start_loading(&mut self) {
        if self.load.is_some() {
            return;
        }
        self.set_state(LoadState::Loading);
        tracing::debug!(instrument = %self.name, kind = self.backend.kind(), "loading");
        let load = self.backend.load_samples(&self.res);
        self.load = Some(LoadTask::spawn(&self.res.runtime, self.res.load_timeout, load));
    }

    fn commit(&mut self, result: Result<B::Loaded, LoadError>) {
        match result {
            Ok(loaded) => {
                let pedal = self.pedal;
                self.with_play(|backend, play| {
                    backend.install(loaded, play);
                    if pedal {
                        backend.set_pedal(true, play);
                    }
                });
                self.set_state(LoadState::Loaded);
                let queued = std::mem::take(&mut self.pending);
                tracing::debug!(instrument = %self.name, queued = queued.len(), "loaded");
                for (note, velocity) in queued {
                    self.render(note, velocity);
                }
            }
            Err(e) => {
                tracing::error!(instrument = %self.name, error = %e, "instrument failed to load");
                self.pending.clear();
                self.set_state(LoadState::Error);
            }
        }
    }

    /// Collect a finished load and run due cleanups.
    pub fn update(&mut self) {
        if let Some(result) = self.load.as_mut().and_then(LoadTask::poll) {
            self.load = None;
            self.commit(result);
        }
        let now = self.res.ctx.current_time();
        for id in self.cleanups.due(now) {
            self.voices.remove(id);
            self.with_play(|backend, play| backend.voice_freed(id, play));
        }
    }

    /// Wait for a running load and commit it.
    pub async fn finish_loading(&mut self) {
        if let Some(task) = self.load.as_mut() {
            let result = task.wait().await;
            self.load = None;
            self.commit(result);
        }
    }

    /// The render thread reported `id` as ended.
    pub fn voice_ended(&mut self, id: VoiceId) {
        if self.voices.remove(id).is_some() {
            self.cleanups.cancel(id);
            self.with_play(|backend, play| backend.voice_freed(id, play));
        }
    }

    /// Stop everything, cancel the load and every cleanup, and remove the
    /// output bus. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(task) = self.load.take() {
            task.cancel();
        }
        self.pending.clear();
        for voice in self.voices.drain() {
            let _ = self.res.ctx.send(Command::KillVoice(voice.id));
        }
        let cancelled = self.cleanups.cancel_all();
        self.with_play(|backend, play| backend.disconnect(play));
        let _ = self.res.ctx.remove_bus(self.bus);
        tracing::debug!(instrument = %self.name, cancelled, "disposed");
    }
}

impl<B: Backend> Drop for Instrument<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Object-safe face of an instrument, for heterogeneous collections.
pub trait Playable: Send {
    fn name(&self) -> &str;
    fn kind(&self) -> &'static str;
    fn load_state(&self) -> LoadState;
    fn trigger_note(&mut self, note: Note, velocity: f32);
    fn release_note(&mut self, note: Note);
    fn all_notes_off(&mut self);
    fn set_pedal(&mut self, down: bool);
    fn update(&mut self);
    fn voice_ended(&mut self, id: VoiceId);
    fn on_state_change(&mut self, listener: StateListener);
    fn active_notes(&self) -> Vec<Note>;
    fn pending_notes(&self) -> Vec<Note>;
    fn finish_loading(&mut self) -> BoxFuture<'_, ()>;
    fn dispose(&mut self);
}

impl<B: Backend> Playable for Instrument<B> {
    fn name(&self) -> &str {
        Instrument::name(self)
    }

    fn kind(&self) -> &'static str {
        self.backend.kind()
    }

    fn load_state(&self) -> LoadState {
        self.state
    }

    fn trigger_note(&mut self, note: Note, velocity: f32) {
        Instrument::trigger_note(self, note, velocity);
    }

    fn release_note(&mut self, note: Note) {
        Instrument::release_note(self, note);
    }

    fn all_notes_off(&mut self) {
        Instrument::all_notes_off(self);
    }

    fn set_pedal(&mut self, down: bool) {
        Instrument::set_pedal(self, down);
    }

    fn update(&mut self) {
        Instrument::update(self);
    }

    fn voice_ended(&mut self, id: VoiceId) {
        Instrument::voice_ended(self, id);
    }

    fn on_state_change(&mut self, listener: StateListener) {
        Instrument::on_state_change(self, listener);
    }

    fn active_notes(&self) -> Vec<Note> {
        self.voices.active_notes()
    }

    fn pending_notes(&self) -> Vec<Note> {
        Instrument::pending_notes(self)
    }

    fn finish_loading(&mut self) -> BoxFuture<'_, ()> {
        Instrument::finish_loading(self).boxed()
    }

    fn dispose(&mut self) {
        Instrument::dispose(self);
    }
}
