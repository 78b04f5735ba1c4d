//! VoicePool: fixed-capacity voice storage for the render thread.

use nt_ir::AudioBuffer;

use crate::voice::{BusId, Voice, VoiceId, VoiceState};

/// Maximum number of simultaneous voices across all instruments.
pub const MAX_VOICES: usize = 256;

/// Fixed slots of voices. Never reallocates after construction.
pub struct VoicePool {
    slots: Vec<Option<Voice>>,
    next_age: u64,
}

impl Default for VoicePool {
    fn default() -> Self {
        Self::new()
    }
}

impl VoicePool {
    /// Create a new empty voice pool.
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_VOICES).map(|_| None).collect(),
            next_age: 0,
        }
    }

    /// Insert a voice, stealing a slot if the pool is full.
    ///
    /// Steal priority: releasing voices first, then the oldest voice.
    /// Returns the id of the stolen voice, if any.
    pub fn allocate(&mut self, mut voice: Voice) -> Option<VoiceId> {
        voice.age = self.next_age;
        self.next_age += 1;
        if let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) {
            *slot = Some(voice);
            return None;
        }
        let idx = self.find_steal_candidate();
        let stolen = self.slots[idx].replace(voice);
        stolen.map(|v| v.id)
    }

    fn find_steal_candidate(&self) -> usize {
        let priority = |state: VoiceState| match state {
            VoiceState::Finished => 0,
            VoiceState::Releasing => 1,
            VoiceState::Pending | VoiceState::Playing => 2,
        };
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (i, (priority(v.state), v.age))))
            .min_by_key(|(_, key)| *key)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    pub fn get(&self, id: VoiceId) -> Option<&Voice> {
        self.slots.iter().flatten().find(|v| v.id == id)
    }

    pub fn get_mut(&mut self, id: VoiceId) -> Option<&mut Voice> {
        self.slots.iter_mut().flatten().find(|v| v.id == id)
    }

    /// Remove a voice immediately. Returns whether it existed.
    pub fn kill(&mut self, id: VoiceId) -> bool {
        match self.slots.iter_mut().find(|s| s.as_ref().is_some_and(|v| v.id == id)) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    /// Schedule a voice's stop time.
    pub fn stop_at(&mut self, id: VoiceId, time: f64) {
        if let Some(voice) = self.get_mut(id) {
            voice.stop_at(time);
        }
    }

    /// Remove every voice routed to `bus`, passing each id to `on_killed`.
    pub fn kill_bus(&mut self, bus: BusId, mut on_killed: impl FnMut(VoiceId)) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|v| v.bus == bus) {
                if let Some(v) = slot.take() {
                    on_killed(v.id);
                }
            }
        }
    }

    /// Remove finished voices, passing each id to `on_reaped`.
    pub fn reap_finished(&mut self, mut on_reaped: impl FnMut(VoiceId)) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(Voice::is_finished) {
                if let Some(v) = slot.take() {
                    on_reaped(v.id);
                }
            }
        }
    }

    /// Count of occupied slots.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Mutable access to every live voice.
    pub fn voices_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.slots.iter_mut().flatten()
    }

    /// Render every voice routed to `bus` into `out`.
    pub fn render_bus(&mut self, bus: BusId, out: &mut AudioBuffer, frames: usize, t0: f64, sample_rate: u32) {
        for voice in self.voices_mut().filter(|v| v.bus == bus) {
            voice.render(out, frames, t0, sample_rate);
        }
    }
}
