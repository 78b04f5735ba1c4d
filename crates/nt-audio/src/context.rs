//! The shared audio context.
//!
//! One [`AudioContext`] exists per [`ContextManager`]. It owns the render
//! engine (on the audio thread for realtime output, behind a mutex for
//! offline rendering) and hands out voice and bus ids. Every component that
//! makes sound holds a clone of the handle.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nt_engine::{
    link, BusId, Command, ControlLink, Engine, Frame, Notice, ParamEvent, ParamTarget, VoiceId, DEFAULT_CAPACITY,
    MASTER_BUS,
};
use serde::{Deserialize, Serialize};

use crate::cpal_backend::{DeviceHandle, DeviceMsg};
use crate::latency::LatencyReport;
use crate::traits::AudioError;

/// Lifecycle state of a context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

impl ContextState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ContextState::Suspended,
            1 => ContextState::Running,
            _ => ContextState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ContextState::Suspended => 0,
            ContextState::Running => 1,
            ContextState::Closed => 2,
        }
    }
}

/// Requested device buffer size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyHint {
    #[default]
    Interactive,
    Balanced,
    Playback,
}

impl LatencyHint {
    pub fn buffer_frames(self) -> u32 {
        match self {
            LatencyHint::Interactive => 128,
            LatencyHint::Balanced => 512,
            LatencyHint::Playback => 2048,
        }
    }
}

/// Where rendered audio goes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// The default output device.
    #[default]
    Realtime,
    /// Nothing is played; frames are pulled with [`AudioContext::render`].
    Offline,
}

/// Sample rate used offline when none is configured.
pub const DEFAULT_OFFLINE_RATE: u32 = 48_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Preferred sample rate. `None` takes the device default.
    pub sample_rate: Option<u32>,
    pub latency_hint: LatencyHint,
    pub mode: RenderMode,
    pub master_gain: f32,
    /// Capacity of the command and notice rings.
    pub command_capacity: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            sample_rate: None,
            latency_hint: LatencyHint::default(),
            mode: RenderMode::default(),
            master_gain: 1.0,
            command_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl ContextConfig {
    pub fn offline(sample_rate: u32) -> Self {
        Self { sample_rate: Some(sample_rate), mode: RenderMode::Offline, ..Self::default() }
    }
}

enum Backend {
    Realtime(Mutex<Option<DeviceHandle>>),
    Offline(Mutex<Engine>),
}

struct Inner {
    state: AtomicU8,
    sample_rate: u32,
    clock: Arc<AtomicU64>,
    control: Mutex<ControlLink>,
    backend: Backend,
    next_voice: AtomicU64,
    next_bus: AtomicU32,
    base_latency_ms: f64,
    output_latency_us: Arc<AtomicU64>,
    /// f32 bits.
    master_gain: AtomicU32,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle to a shared audio context.
#[derive(Clone)]
pub struct AudioContext {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioContext")
            .field("state", &self.state())
            .field("sample_rate", &self.inner.sample_rate)
            .finish()
    }
}

impl AudioContext {
    /// Create a suspended context.
    pub fn new(config: &ContextConfig) -> Result<Self, AudioError> {
        let capacity = config.command_capacity.max(16);
        let hint_frames = config.latency_hint.buffer_frames();

        let (sample_rate, clock, control, backend, base_frames, output_latency_us) = match config.mode {
            RenderMode::Offline => {
                let sample_rate = config.sample_rate.unwrap_or(DEFAULT_OFFLINE_RATE);
                let (control, engine_link) = link(capacity);
                let engine = Engine::new(sample_rate, engine_link);
                let clock = engine.clock();
                (sample_rate, clock, control, Backend::Offline(Mutex::new(engine)), 0, Arc::new(AtomicU64::new(0)))
            }
            RenderMode::Realtime => {
                let (handle, ready) = DeviceHandle::spawn(config.sample_rate, Some(hint_frames), capacity)?;
                let base_frames = ready.buffer_frames.unwrap_or(hint_frames);
                tracing::info!(
                    sample_rate = ready.sample_rate,
                    buffer_frames = base_frames,
                    "audio device opened"
                );
                (
                    ready.sample_rate,
                    ready.clock,
                    ready.control,
                    Backend::Realtime(Mutex::new(Some(handle))),
                    base_frames,
                    ready.latency_us,
                )
            }
        };

        let ctx = Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(ContextState::Suspended.as_u8()),
                sample_rate,
                clock,
                control: Mutex::new(control),
                backend,
                next_voice: AtomicU64::new(1),
                next_bus: AtomicU32::new(MASTER_BUS + 1),
                base_latency_ms: base_frames as f64 * 1000.0 / sample_rate as f64,
                output_latency_us,
                master_gain: AtomicU32::new(1.0f32.to_bits()),
            }),
        };
        ctx.set_master_gain(config.master_gain)?;
        Ok(ctx)
    }

    pub fn state(&self) -> ContextState {
        ContextState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == ContextState::Running
    }

    pub fn is_offline(&self) -> bool {
        matches!(self.inner.backend, Backend::Offline(_))
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// Seconds of audio rendered so far.
    pub fn current_time(&self) -> f64 {
        self.inner.clock.load(Ordering::Acquire) as f64 / self.inner.sample_rate as f64
    }

    pub fn master_bus(&self) -> BusId {
        MASTER_BUS
    }

    fn transition(&self, to: ContextState) -> Result<(), AudioError> {
        let from = self.state();
        if from == ContextState::Closed {
            return Err(AudioError::Closed);
        }
        if from == to {
            return Ok(());
        }
        self.inner.state.store(to.as_u8(), Ordering::Release);
        if let Backend::Realtime(device) = &self.inner.backend {
            if let Some(handle) = lock(device).as_ref() {
                handle.send(match to {
                    ContextState::Running => DeviceMsg::Start,
                    _ => DeviceMsg::Stop,
                });
            }
        }
        tracing::debug!(?from, ?to, "context state changed");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), AudioError> {
        self.transition(ContextState::Running)
    }

    /// Pause output. The clock stops advancing.
    pub fn suspend(&self) -> Result<(), AudioError> {
        self.transition(ContextState::Suspended)
    }

    /// Close the context and release the device. Idempotent.
    pub fn close(&self) {
        let prev = self.inner.state.swap(ContextState::Closed.as_u8(), Ordering::AcqRel);
        if ContextState::from_u8(prev) == ContextState::Closed {
            return;
        }
        if let Backend::Realtime(device) = &self.inner.backend {
            if let Some(mut handle) = lock(device).take() {
                handle.close();
            }
        }
        tracing::debug!("context closed");
    }

    /// Queue a command for the render thread.
    pub fn send(&self, command: Command) -> Result<(), AudioError> {
        if self.state() == ContextState::Closed {
            return Err(AudioError::Closed);
        }
        lock(&self.inner.control).send(command).map_err(|rejected| {
            tracing::warn!(command = ?rejected, "command queue full, dropping");
            AudioError::QueueFull
        })
    }

    /// Collect notices the render thread has posted since the last call.
    pub fn drain_notices(&self) -> Vec<Notice> {
        let mut control = lock(&self.inner.control);
        std::iter::from_fn(|| control.poll_notice()).collect()
    }

    /// Allocate a fresh voice id. Ids are never reused.
    pub fn next_voice_id(&self) -> VoiceId {
        self.inner.next_voice.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a bus mixing into `parent` and return its id.
    pub fn create_bus(&self, parent: BusId, gain: f32) -> Result<BusId, AudioError> {
        let id = self.inner.next_bus.fetch_add(1, Ordering::Relaxed);
        self.send(Command::CreateBus { id, parent, gain })?;
        Ok(id)
    }

    /// Remove a bus and everything routed to it.
    pub fn remove_bus(&self, id: BusId) -> Result<(), AudioError> {
        if id == MASTER_BUS {
            return Ok(());
        }
        self.send(Command::RemoveBus(id))
    }

    /// Set the master volume, clamped to `0.0..=1.0`.
    pub fn set_master_gain(&self, gain: f32) -> Result<(), AudioError> {
        let gain = if gain.is_finite() { gain.clamp(0.0, 1.0) } else { 1.0 };
        self.inner.master_gain.store(gain.to_bits(), Ordering::Relaxed);
        self.send(Command::Automate {
            target: ParamTarget::MasterGain,
            event: ParamEvent::SetValue { value: gain, time: self.current_time() },
        })
    }

    pub fn master_gain(&self) -> f32 {
        f32::from_bits(self.inner.master_gain.load(Ordering::Relaxed))
    }

    /// Render `frames` frames of an offline context.
    ///
    /// A suspended context yields silence without advancing its clock.
    pub fn render(&self, frames: usize) -> Result<Vec<Frame>, AudioError> {
        let Backend::Offline(engine) = &self.inner.backend else {
            return Err(AudioError::NotOffline);
        };
        match self.state() {
            ContextState::Closed => Err(AudioError::Closed),
            ContextState::Suspended => Ok(vec![Frame::silence(); frames]),
            ContextState::Running => Ok(lock(engine).render_frames(frames)),
        }
    }

    /// Current latency breakdown.
    pub fn latency(&self) -> LatencyReport {
        let output_ms = self.inner.output_latency_us.load(Ordering::Relaxed) as f64 / 1000.0;
        LatencyReport::new(self.inner.base_latency_ms, output_ms)
    }

    /// Whether two handles refer to the same context.
    pub fn ptr_eq(&self, other: &AudioContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Owns the single live [`AudioContext`].
#[derive(Default)]
pub struct ContextManager {
    current: Mutex<Option<AudioContext>>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live context, creating and resuming it if needed.
    ///
    /// A suspended context is resumed rather than replaced. The lock is held
    /// across creation, so racing callers all get the same context.
    pub fn initialize(&self, config: &ContextConfig) -> Result<AudioContext, AudioError> {
        let mut current = lock(&self.current);
        if let Some(ctx) = current.as_ref() {
            match ctx.state() {
                ContextState::Running => return Ok(ctx.clone()),
                ContextState::Suspended => {
                    ctx.resume()?;
                    return Ok(ctx.clone());
                }
                ContextState::Closed => {}
            }
        }
        let ctx = AudioContext::new(config)?;
        ctx.resume()?;
        *current = Some(ctx.clone());
        Ok(ctx)
    }

    /// Close the live context and create a fresh one from `config`.
    pub fn reconfigure(&self, config: &ContextConfig) -> Result<AudioContext, AudioError> {
        let mut current = lock(&self.current);
        if let Some(old) = current.take() {
            old.close();
        }
        let ctx = AudioContext::new(config)?;
        ctx.resume()?;
        *current = Some(ctx.clone());
        tracing::info!(sample_rate = ctx.sample_rate(), "audio context reconfigured");
        Ok(ctx)
    }

    pub fn current(&self) -> Option<AudioContext> {
        lock(&self.current).clone()
    }

    /// Whether a context exists and is running.
    pub fn is_ready(&self) -> bool {
        lock(&self.current).as_ref().is_some_and(AudioContext::is_running)
    }

    pub fn close(&self) {
        if let Some(ctx) = lock(&self.current).take() {
            ctx.close();
        }
    }
}
