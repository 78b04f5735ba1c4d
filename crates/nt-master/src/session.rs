//! The session: one audio context, a set of named instruments, the sample
//! cache and the beat clock, driven from a single control thread.
//!
//! Editor-facing calls address instruments by id. Without an active context
//! every call is a logged no-op, so callers never need to check readiness.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use nt_audio::{AudioContext, ContextConfig, ContextManager, LatencyReport};
use nt_engine::{Frame, Notice};
use nt_ir::{InstrumentConfig, Note, BLOCK_SIZE};
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;

use crate::backend;
use crate::cache::{CacheStats, SampleCache};
use crate::clock::{BeatClock, LOOKAHEAD};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::instrument::{LoadState, Playable, Resources, StateListener};
use crate::registry::PresetRegistry;
use crate::source::SampleSource;

/// State listeners of one instrument id. They outlive rebuilds of the
/// instrument behind the id.
type ListenerFanout = Arc<Mutex<Vec<StateListener>>>;

pub struct Session {
    config: SessionConfig,
    contexts: ContextManager,
    ctx: Option<AudioContext>,
    cache: Arc<SampleCache>,
    source: Arc<dyn SampleSource>,
    registry: Arc<PresetRegistry>,
    runtime: Handle,
    clock: BeatClock,
    /// Config of every live instrument, for rebuilding after a reconfigure.
    specs: BTreeMap<String, InstrumentConfig>,
    instruments: BTreeMap<String, Box<dyn Playable>>,
    listeners: BTreeMap<String, ListenerFanout>,
}

impl Session {
    /// A session with no audio context yet; see [`Session::activate`].
    pub fn new(config: SessionConfig, source: Arc<dyn SampleSource>, runtime: Handle) -> Self {
        let cache = Arc::new(SampleCache::new(config.cache.clone()));
        let registry = Arc::new(PresetRegistry::new(Arc::clone(&source), Arc::clone(&cache)));
        let clock = BeatClock::new(config.transport.tempo(), config.transport.beats_per_bar());
        let specs = config.instruments.clone();
        Self {
            config,
            contexts: ContextManager::new(),
            ctx: None,
            cache,
            source,
            registry,
            runtime,
            clock,
            specs,
            instruments: BTreeMap::new(),
            listeners: BTreeMap::new(),
        }
    }

    /// Open (or resume) the audio context and build the configured
    /// instruments. Safe to call again.
    pub fn activate(&mut self) -> Result<(), SessionError> {
        let ctx = self.contexts.initialize(&self.config.context)?;
        self.ctx = Some(ctx);
        self.build_instruments()
    }

    /// Replace the audio context. Instruments are rebuilt on the new one and
    /// reload their samples through the cache; the transport stops.
    pub fn reconfigure(&mut self, context: ContextConfig) -> Result<(), SessionError> {
        self.dispose_instruments();
        self.clock.stop();
        self.config.context = context;
        let ctx = self.contexts.reconfigure(&self.config.context)?;
        self.ctx = Some(ctx);
        self.build_instruments()
    }

    fn build_instruments(&mut self) -> Result<(), SessionError> {
        let missing: Vec<_> = self
            .specs
            .iter()
            .filter(|(id, _)| !self.instruments.contains_key(*id))
            .map(|(id, config)| (id.clone(), config.clone()))
            .collect();
        for (id, config) in missing {
            self.create_instrument(&id, config)?;
        }
        Ok(())
    }

    fn resources(&self) -> Option<Resources> {
        Some(Resources {
            ctx: self.ctx.clone()?,
            cache: Arc::clone(&self.cache),
            source: Arc::clone(&self.source),
            registry: Arc::clone(&self.registry),
            runtime: self.runtime.clone(),
            load_timeout: self.config.load_timeout(),
        })
    }

    pub fn context(&self) -> Option<&AudioContext> {
        self.ctx.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.ctx.as_ref().is_some_and(AudioContext::is_running)
    }

    pub fn latency(&self) -> Option<LatencyReport> {
        self.ctx.as_ref().map(AudioContext::latency)
    }

    // --- Instruments ---

    /// Create (or replace) instrument `id`. Loading starts on its first note.
    pub fn create_instrument(&mut self, id: &str, config: InstrumentConfig) -> Result<(), SessionError> {
        let res = self.resources().ok_or(SessionError::NoContext)?;
        if let Some(mut old) = self.instruments.remove(id) {
            old.dispose();
        }
        let mut instrument = backend::create(id, &config, res)?;
        let fanout = Arc::clone(self.listeners.entry(id.to_string()).or_default());
        instrument.on_state_change(Box::new(move |state| {
            if let Ok(mut listeners) = fanout.lock() {
                for listener in listeners.iter_mut() {
                    listener(state);
                }
            }
        }));
        self.instruments.insert(id.to_string(), instrument);
        self.specs.insert(id.to_string(), config);
        Ok(())
    }

    pub fn remove_instrument(&mut self, id: &str) -> bool {
        self.specs.remove(id);
        self.listeners.remove(id);
        match self.instruments.remove(id) {
            Some(mut instrument) => {
                instrument.dispose();
                true
            }
            None => false,
        }
    }

    pub fn instrument_ids(&self) -> impl Iterator<Item = &str> {
        self.instruments.keys().map(String::as_str)
    }

    pub fn instrument(&self, id: &str) -> Option<&dyn Playable> {
        self.instruments.get(id).map(|i| i.as_ref())
    }

    pub fn instrument_state(&self, id: &str) -> Option<LoadState> {
        self.instruments.get(id).map(|i| i.load_state())
    }

    /// Subscribe to loading-state changes of `id`. The subscription stays
    /// with the id when the instrument is rebuilt or replaced.
    pub fn on_instrument_state(&mut self, id: &str, listener: StateListener) -> bool {
        let Some(fanout) = self.listeners.get(id).filter(|_| self.instruments.contains_key(id)) else {
            return false;
        };
        match fanout.lock() {
            Ok(mut listeners) => {
                listeners.push(listener);
                true
            }
            Err(_) => false,
        }
    }

    fn playable(&mut self, id: &str, op: &'static str) -> Option<&mut Box<dyn Playable>> {
        if self.ctx.is_none() {
            tracing::debug!(instrument = id, op, "no audio context, ignored");
            return None;
        }
        let instrument = self.instruments.get_mut(id);
        if instrument.is_none() {
            tracing::debug!(instrument = id, op, "unknown instrument, ignored");
        }
        instrument
    }

    pub fn trigger_note(&mut self, id: &str, note: Note, velocity: f32) {
        if let Some(instrument) = self.playable(id, "trigger") {
            instrument.trigger_note(note, velocity);
        }
    }

    pub fn release_note(&mut self, id: &str, note: Note) {
        if let Some(instrument) = self.playable(id, "release") {
            instrument.release_note(note);
        }
    }

    pub fn set_pedal(&mut self, id: &str, down: bool) {
        if let Some(instrument) = self.playable(id, "pedal") {
            instrument.set_pedal(down);
        }
    }

    /// Release every held note on every instrument.
    pub fn all_notes_off(&mut self) {
        for instrument in self.instruments.values_mut() {
            instrument.all_notes_off();
        }
    }

    pub fn set_master_volume(&mut self, gain: f32) {
        match &self.ctx {
            Some(ctx) => {
                if let Err(e) = ctx.set_master_gain(gain) {
                    tracing::warn!(error = %e, "master volume not applied");
                }
            }
            None => tracing::debug!("no audio context, master volume ignored"),
        }
    }

    /// Wait for every running instrument load to land.
    pub async fn wait_for_loads(&mut self) {
        for instrument in self.instruments.values_mut() {
            instrument.finish_loading().await;
        }
    }

    pub fn cache(&self) -> &Arc<SampleCache> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // --- Transport ---

    pub fn clock(&self) -> &BeatClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut BeatClock {
        &mut self.clock
    }

    pub fn start_transport(&mut self) {
        match &self.ctx {
            Some(ctx) => self.clock.start(ctx.current_time()),
            None => tracing::debug!("no audio context, transport not started"),
        }
    }

    pub fn stop_transport(&mut self) {
        self.clock.stop();
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.clock.set_bpm(bpm);
    }

    pub fn set_beats_per_bar(&mut self, beats: u32) {
        self.clock.set_beats_per_bar(beats);
    }

    // --- Driving ---

    /// One pass of the control loop: schedule due beats, route voice-ended
    /// notices, collect finished loads and run due cleanups.
    pub fn tick(&mut self) {
        let Some(ctx) = &self.ctx else { return };
        self.clock.poll(ctx.current_time());
        for notice in ctx.drain_notices() {
            let Notice::VoiceEnded(id) = notice;
            for instrument in self.instruments.values_mut() {
                instrument.voice_ended(id);
            }
        }
        for instrument in self.instruments.values_mut() {
            instrument.update();
        }
    }

    /// Tick every [`LOOKAHEAD`] until `shutdown` resolves, calling `on_tick`
    /// after each pass.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>, mut on_tick: impl FnMut(&mut Self)) {
        let mut interval = tokio::time::interval(LOOKAHEAD);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.tick();
                    on_tick(self);
                }
            }
        }
    }

    // --- Offline rendering ---

    /// Render `frames` frames of an offline session, ticking once per block.
    pub fn render_frames(&mut self, frames: usize) -> Result<Vec<Frame>, SessionError> {
        let ctx = self.ctx.clone().ok_or(SessionError::NoContext)?;
        let mut out = Vec::with_capacity(frames);
        while out.len() < frames {
            self.tick();
            let chunk = (frames - out.len()).min(BLOCK_SIZE);
            out.extend(ctx.render(chunk)?);
        }
        Ok(out)
    }

    /// Render `seconds` of an offline session as a 16-bit WAV file.
    pub fn render_to_wav(&mut self, seconds: f64) -> Result<Vec<u8>, SessionError> {
        let sample_rate = self.ctx.as_ref().ok_or(SessionError::NoContext)?.sample_rate();
        let frames = (seconds.max(0.0) * sample_rate as f64).round() as usize;
        let rendered = self.render_frames(frames)?;
        Ok(nt_formats::frames_to_wav(&rendered, sample_rate))
    }

    fn dispose_instruments(&mut self) {
        for (_, mut instrument) in std::mem::take(&mut self.instruments) {
            instrument.dispose();
        }
    }

    /// Dispose every instrument and close the context.
    pub fn close(&mut self) {
        self.dispose_instruments();
        self.listeners.clear();
        self.clock.stop();
        self.contexts.close();
        self.ctx = None;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use nt_ir::{SamplerConfig, SynthConfig, Timbre};

    const RATE: u32 = 8000;

    fn offline_config() -> SessionConfig {
        SessionConfig { context: ContextConfig::offline(RATE), ..SessionConfig::default() }
    }

    fn session(config: SessionConfig) -> Session {
        Session::new(config, Arc::new(MemorySource::new()), Handle::current())
    }

    fn organ() -> InstrumentConfig {
        InstrumentConfig::Synth(SynthConfig { timbre: Timbre::Organ, ..SynthConfig::default() })
    }

    #[tokio::test]
    async fn calls_without_context_are_noops() {
        let mut s = session(offline_config());
        assert!(!s.is_ready());
        s.trigger_note("lead", Note::C4, 1.0);
        s.start_transport();
        assert!(!s.clock().is_playing());
        assert!(matches!(s.create_instrument("lead", organ()), Err(SessionError::NoContext)));
        assert!(matches!(s.render_frames(16), Err(SessionError::NoContext)));
    }

    #[tokio::test]
    async fn activate_builds_configured_instruments() {
        let mut config = offline_config();
        config.instruments.insert("lead".into(), organ());
        let mut s = session(config);
        s.activate().unwrap();
        assert!(s.is_ready());
        assert_eq!(s.instrument_ids().collect::<Vec<_>>(), vec!["lead"]);
        assert_eq!(s.instrument_state("lead"), Some(LoadState::Loaded));

        s.trigger_note("lead", Note::A4, 1.0);
        let frames = s.render_frames(2048).unwrap();
        assert!(frames.iter().any(|f| f.peak() > 0.01));
    }

    #[tokio::test]
    async fn unknown_instrument_is_ignored() {
        let mut s = session(offline_config());
        s.activate().unwrap();
        s.trigger_note("ghost", Note::C4, 1.0);
        s.release_note("ghost", Note::C4);
        assert!(!s.remove_instrument("ghost"));
    }

    #[tokio::test]
    async fn beats_fire_during_render() {
        let mut s = session(offline_config());
        s.activate().unwrap();
        let beats = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&beats);
        s.clock_mut().on_beat(move |beat, time| seen.lock().unwrap().push((beat, time)));
        s.start_transport();
        s.render_frames(RATE as usize).unwrap();

        let beats = beats.lock().unwrap();
        assert_eq!(beats.len(), 3);
        assert_eq!(beats[0], (0, 0.0));
        assert_eq!(beats[1], (1, 0.5));
        assert_eq!(beats[2], (2, 1.0));
    }

    #[tokio::test]
    async fn reconfigure_rebuilds_instruments_on_new_context() {
        let mut s = session(offline_config());
        s.activate().unwrap();
        s.create_instrument("lead", organ()).unwrap();
        let before = s.context().cloned().unwrap();
        s.reconfigure(ContextConfig::offline(16000)).unwrap();
        let after = s.context().unwrap();
        assert!(!after.ptr_eq(&before));
        assert_eq!(after.sample_rate(), 16000);
        assert_eq!(s.instrument_state("lead"), Some(LoadState::Loaded));
    }

    #[tokio::test]
    async fn state_listeners_follow_rebuilt_instruments() {
        let mut s = session(offline_config());
        s.activate().unwrap();
        let keys = InstrumentConfig::Sampler(SamplerConfig { sample: "missing.wav".into(), ..SamplerConfig::default() });
        s.create_instrument("keys", keys).unwrap();
        let states = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&states);
        assert!(s.on_instrument_state("keys", Box::new(move |state| seen.lock().unwrap().push(state))));
        assert!(!s.on_instrument_state("ghost", Box::new(|_| {})));

        s.reconfigure(ContextConfig::offline(16000)).unwrap();
        s.trigger_note("keys", Note::C4, 1.0);
        s.wait_for_loads().await;
        assert_eq!(*states.lock().unwrap(), vec![LoadState::Loading, LoadState::Error]);
    }

    #[tokio::test]
    async fn master_volume_scales_output() {
        let mut s = session(offline_config());
        s.activate().unwrap();
        s.create_instrument("lead", organ()).unwrap();
        s.trigger_note("lead", Note::A4, 1.0);
        assert!(s.render_frames(BLOCK_SIZE * 4).unwrap().iter().any(|f| f.peak() > 0.01));

        s.set_master_volume(0.0);
        let muted = s.render_frames(BLOCK_SIZE * 2).unwrap();
        assert!(muted[BLOCK_SIZE..].iter().all(|f| f.peak() < 1e-6));
    }

    #[tokio::test]
    async fn render_to_wav_has_expected_length() {
        let mut s = session(offline_config());
        s.activate().unwrap();
        let wav = s.render_to_wav(0.5).unwrap();
        let info = nt_formats::probe_wav(&wav).unwrap();
        assert_eq!(info.frames, (RATE / 2) as usize);
    }

    #[tokio::test]
    async fn close_disposes_everything() {
        let mut s = session(offline_config());
        s.activate().unwrap();
        s.create_instrument("lead", organ()).unwrap();
        s.close();
        assert!(s.context().is_none());
        assert_eq!(s.instrument_ids().count(), 0);
    }
}
