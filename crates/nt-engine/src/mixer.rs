//! Main render engine.
//!
//! Renders fixed [`BLOCK_SIZE`] blocks: drain commands, render voices into
//! their buses, run inserts, mix buses into their parents and finally apply
//! the master gain. Device callbacks of any size are served from the last
//! rendered block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nt_ir::{AudioBuffer, BLOCK_SIZE};

use crate::command::{Command, EngineLink, Notice, ParamTarget};
use crate::frame::Frame;
use crate::insert::Insert;
use crate::param::Param;
use crate::voice::{BusId, MASTER_BUS};
use crate::voice_pool::VoicePool;

/// Buses reserved up front so creation never reallocates mid-stream.
pub const MAX_BUSES: usize = 128;

struct Bus {
    id: BusId,
    parent: BusId,
    gain: Param,
    insert: Option<Box<dyn Insert>>,
    block: AudioBuffer,
}

/// The render engine. Lives on the audio thread.
pub struct Engine {
    sample_rate: u32,
    /// Frames rendered so far; context time is `frames / sample_rate`.
    frames: u64,
    clock: Arc<AtomicU64>,
    link: EngineLink,
    voices: VoicePool,
    /// Buses in creation order. Parents always precede their children.
    buses: Vec<Bus>,
    master_gain: Param,
    master: AudioBuffer,
    gains: Vec<f32>,
    /// Last rendered block, interleaved stereo.
    pending: Vec<f32>,
    /// Next unread frame in `pending`.
    cursor: usize,
}

impl Engine {
    /// Create an engine fed by `link`.
    pub fn new(sample_rate: u32, link: EngineLink) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frames: 0,
            clock: Arc::new(AtomicU64::new(0)),
            link,
            voices: VoicePool::new(),
            buses: Vec::with_capacity(MAX_BUSES),
            master_gain: Param::new(1.0),
            master: AudioBuffer::new(2, BLOCK_SIZE, sample_rate),
            gains: vec![0.0; BLOCK_SIZE],
            pending: vec![0.0; BLOCK_SIZE * 2],
            cursor: BLOCK_SIZE,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Shared frame counter, readable from any thread.
    pub fn clock(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.clock)
    }

    /// Context time of the next block to render.
    pub fn current_time(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    /// Number of live voices.
    pub fn active_voices(&self) -> usize {
        self.voices.active_count()
    }

    /// Number of buses besides master.
    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    /// Fill an interleaved device buffer. Channels past the first two are
    /// zeroed; a mono device gets the left channel.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        #[cfg(feature = "alloc_check")]
        {
            assert_no_alloc::assert_no_alloc(|| self.render_interleaved(out, channels));
        }
        #[cfg(not(feature = "alloc_check"))]
        self.render_interleaved(out, channels);
    }

    fn render_interleaved(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        for chunk in out.chunks_mut(channels) {
            let frame = self.next_frame();
            for (i, sample) in chunk.iter_mut().enumerate() {
                *sample = match i {
                    0 => frame.left,
                    1 => frame.right,
                    _ => 0.0,
                };
            }
        }
    }

    /// Render a single frame.
    pub fn next_frame(&mut self) -> Frame {
        if self.cursor >= BLOCK_SIZE {
            self.render_block();
        }
        let i = self.cursor * 2;
        self.cursor += 1;
        Frame { left: self.pending[i], right: self.pending[i + 1] }
    }

    /// Render `count` frames for offline use.
    pub fn render_frames(&mut self, count: usize) -> Vec<Frame> {
        (0..count).map(|_| self.next_frame()).collect()
    }

    fn render_block(&mut self) {
        self.drain_commands();

        let sr = self.sample_rate;
        let dt = 1.0 / sr as f64;
        let t0 = self.current_time();

        self.master.silence();
        for bus in &mut self.buses {
            bus.block.silence();
        }

        for voice in self.voices.voices_mut() {
            let target = match self.buses.iter_mut().find(|b| b.id == voice.bus) {
                Some(bus) => &mut bus.block,
                None => &mut self.master,
            };
            voice.render(target, BLOCK_SIZE, t0, sr);
        }
        let link = &mut self.link;
        self.voices.reap_finished(|id| link.notify(Notice::VoiceEnded(id)));

        for i in (0..self.buses.len()).rev() {
            let (head, tail) = self.buses.split_at_mut(i);
            let bus = &mut tail[0];
            if let Some(insert) = bus.insert.as_mut() {
                insert.process(&mut bus.block, BLOCK_SIZE, t0, dt);
            }
            for (j, g) in self.gains.iter_mut().enumerate() {
                *g = bus.gain.advance(t0 + j as f64 * dt);
            }
            let target = match head.iter_mut().find(|b| b.id == bus.parent) {
                Some(parent) => &mut parent.block,
                None => &mut self.master,
            };
            mix_into(&bus.block, target, &self.gains);
        }

        let (left, right) = (self.master.channel(0), self.master.channel(1));
        for j in 0..BLOCK_SIZE {
            let g = self.master_gain.advance(t0 + j as f64 * dt);
            self.pending[j * 2] = (left[j] * g).clamp(-1.0, 1.0);
            self.pending[j * 2 + 1] = (right[j] * g).clamp(-1.0, 1.0);
        }

        self.frames += BLOCK_SIZE as u64;
        self.clock.store(self.frames, Ordering::Release);
        self.cursor = 0;
    }

    fn drain_commands(&mut self) {
        #[cfg(feature = "alloc_check")]
        {
            assert_no_alloc::permit_alloc(|| self.drain_commands_inner());
        }
        #[cfg(not(feature = "alloc_check"))]
        self.drain_commands_inner();
    }

    fn drain_commands_inner(&mut self) {
        while let Some(command) = self.link.next_command() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: Command) {
        let now = self.current_time();
        match command {
            Command::StartVoice(voice) => {
                if let Some(stolen) = self.voices.allocate(*voice) {
                    self.link.notify(Notice::VoiceEnded(stolen));
                }
            }
            Command::StopVoice { id, at } => self.voices.stop_at(id, at),
            Command::KillVoice(id) => {
                if self.voices.kill(id) {
                    self.link.notify(Notice::VoiceEnded(id));
                }
            }
            Command::CreateBus { id, parent, gain } => {
                if id == MASTER_BUS || self.buses.iter().any(|b| b.id == id) {
                    tracing::debug!(bus = id, "ignoring duplicate bus");
                    return;
                }
                self.buses.push(Bus {
                    id,
                    parent,
                    gain: Param::new(gain),
                    insert: None,
                    block: AudioBuffer::new(2, BLOCK_SIZE, self.sample_rate),
                });
            }
            Command::RemoveBus(id) => {
                if let Some(pos) = self.buses.iter().position(|b| b.id == id) {
                    self.buses.remove(pos);
                }
                let link = &mut self.link;
                self.voices.kill_bus(id, |voice| link.notify(Notice::VoiceEnded(voice)));
            }
            Command::SetInsert { bus, insert } => {
                if let Some(b) = self.buses.iter_mut().find(|b| b.id == bus) {
                    b.insert = insert;
                }
            }
            Command::Automate { target, event } => {
                let param = match target {
                    ParamTarget::VoiceGain(id) => self.voices.get_mut(id).map(|v| &mut v.gain),
                    ParamTarget::BusGain(id) => self.buses.iter_mut().find(|b| b.id == id).map(|b| &mut b.gain),
                    ParamTarget::MasterGain => Some(&mut self.master_gain),
                    ParamTarget::Insert { bus, param } => self
                        .buses
                        .iter_mut()
                        .find(|b| b.id == bus)
                        .and_then(|b| b.insert.as_mut())
                        .and_then(|insert| insert.param_mut(param)),
                };
                if let Some(param) = param {
                    if !param.schedule(event, now) {
                        tracing::warn!(?target, "automation timeline full, event dropped");
                    }
                }
            }
        }
    }
}

/// Sum the first two channels of `src` into `dst` with per-frame gains.
fn mix_into(src: &AudioBuffer, dst: &mut AudioBuffer, gains: &[f32]) {
    for ch in 0..2 {
        let input = src.channel(ch);
        for ((d, s), g) in dst.channel_mut(ch).iter_mut().zip(input).zip(gains) {
            *d += s * g;
        }
    }
}
