//! Control-side voice bookkeeping.
//!
//! The render thread owns the actual voices. An instrument tracks which of
//! its notes are sounding, which voices are in their release tail, and when
//! each released voice may be forgotten.

use nt_engine::VoiceId;
use nt_ir::Note;

/// Control record of a voice.
#[derive(Clone, Debug, PartialEq)]
pub struct Voice {
    pub id: VoiceId,
    pub note: Note,
    /// Context time the voice started at.
    pub started: f64,
    pub releasing: bool,
}

/// Voices of one instrument in start order.
#[derive(Debug, Default)]
pub struct VoiceSet {
    voices: Vec<Voice>,
}

impl VoiceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, voice: Voice) {
        self.voices.push(voice);
    }

    /// The held (not releasing) voice for `note`.
    pub fn active(&self, note: Note) -> Option<&Voice> {
        self.voices.iter().find(|v| v.note == note && !v.releasing)
    }

    pub fn is_active(&self, note: Note) -> bool {
        self.active(note).is_some()
    }

    /// Mark the held voice for `note` as releasing and return its id.
    pub fn start_release(&mut self, note: Note) -> Option<VoiceId> {
        let voice = self.voices.iter_mut().find(|v| v.note == note && !v.releasing)?;
        voice.releasing = true;
        Some(voice.id)
    }

    /// Ids of voices for `note` in their release tail.
    pub fn releasing(&self, note: Note) -> Vec<VoiceId> {
        self.voices.iter().filter(|v| v.note == note && v.releasing).map(|v| v.id).collect()
    }

    pub fn remove(&mut self, id: VoiceId) -> Option<Voice> {
        let idx = self.voices.iter().position(|v| v.id == id)?;
        Some(self.voices.remove(idx))
    }

    /// The longest-running voice.
    pub fn oldest(&self) -> Option<&Voice> {
        self.voices.first()
    }

    /// Notes currently held, in trigger order.
    pub fn active_notes(&self) -> Vec<Note> {
        self.voices.iter().filter(|v| !v.releasing).map(|v| v.note).collect()
    }

    /// Every tracked voice, held or releasing.
    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }

    pub fn drain(&mut self) -> Vec<Voice> {
        std::mem::take(&mut self.voices)
    }
}

/// Pending cleanups keyed by context time.
///
/// Every release schedules one. Disposal cancels them all, so nothing runs
/// against a torn-down instrument.
#[derive(Debug, Default)]
pub struct CleanupQueue {
    /// Sorted by time; equal times keep insertion order.
    entries: Vec<(f64, VoiceId)>,
}

impl CleanupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `id` for cleanup at `at`, replacing an earlier schedule.
    pub fn schedule(&mut self, at: f64, id: VoiceId) {
        self.cancel(id);
        let pos = self.entries.iter().position(|(t, _)| *t > at).unwrap_or(self.entries.len());
        self.entries.insert(pos, (at, id));
    }

    pub fn cancel(&mut self, id: VoiceId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(_, v)| *v != id);
        self.entries.len() != before
    }

    /// Cancel everything. Returns how many were pending.
    pub fn cancel_all(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    /// Remove and return every cleanup due at or before `now`.
    pub fn due(&mut self, now: f64) -> Vec<VoiceId> {
        let split = self.entries.iter().position(|(t, _)| *t > now).unwrap_or(self.entries.len());
        self.entries.drain(..split).map(|(_, id)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(id: VoiceId, note: &str) -> Voice {
        Voice { id, note: note.parse().unwrap(), started: 0.0, releasing: false }
    }

    #[test]
    fn release_moves_voice_out_of_active() {
        let mut set = VoiceSet::new();
        set.insert(voice(1, "C4"));
        let c4: Note = "C4".parse().unwrap();
        assert!(set.is_active(c4));
        assert_eq!(set.start_release(c4), Some(1));
        assert!(!set.is_active(c4));
        assert_eq!(set.releasing(c4), vec![1]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.start_release(c4), None);
    }

    #[test]
    fn oldest_is_first_inserted() {
        let mut set = VoiceSet::new();
        set.insert(voice(3, "E4"));
        set.insert(voice(1, "C4"));
        assert_eq!(set.oldest().map(|v| v.id), Some(3));
        set.remove(3);
        assert_eq!(set.oldest().map(|v| v.id), Some(1));
    }

    #[test]
    fn cleanups_come_due_in_time_order() {
        let mut queue = CleanupQueue::new();
        queue.schedule(0.5, 1);
        queue.schedule(0.2, 2);
        queue.schedule(0.9, 3);
        assert_eq!(queue.due(0.1), Vec::<VoiceId>::new());
        assert_eq!(queue.due(0.5), vec![2, 1]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn reschedule_replaces_and_cancel_all_clears() {
        let mut queue = CleanupQueue::new();
        queue.schedule(1.0, 1);
        queue.schedule(0.3, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.due(0.3), vec![1]);
        queue.schedule(1.0, 2);
        queue.schedule(2.0, 3);
        assert_eq!(queue.cancel_all(), 2);
        assert!(queue.is_empty());
    }
}
