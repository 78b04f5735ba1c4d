//! Beat clock with lookahead scheduling.
//!
//! The clock is polled every [`LOOKAHEAD`] from the control loop and
//! schedules every beat that falls within [`SCHEDULE_AHEAD`] of the audio
//! context's time. The coarse poll decides when work happens; the audio
//! clock decides when beats are.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use nt_ir::{clamp_beats_per_bar, Tempo};
use slotmap::SlotMap;

/// Poll interval of the control loop.
pub const LOOKAHEAD: Duration = Duration::from_millis(25);

/// How far ahead of the context time beats are scheduled (seconds).
pub const SCHEDULE_AHEAD: f64 = 0.1;

slotmap::new_key_type! {
    /// Handle returned by the subscribe methods.
    pub struct SubscriptionKey;
}

/// Observable transport state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BeatClockState {
    pub bpm: f64,
    pub beats_per_bar: u32,
    pub playing: bool,
    /// Beats scheduled since start.
    pub current_beat: u64,
    pub start_time: f64,
}

pub type BeatCallback = Box<dyn FnMut(u64, f64) + Send>;
pub type StateCallback = Box<dyn FnMut(&BeatClockState) + Send>;
pub type EventCallback = Box<dyn FnOnce(u64, f64) + Send>;

/// Beat and state callbacks share one key space.
enum Subscriber {
    Beat(BeatCallback),
    State(StateCallback),
}

pub struct BeatClock {
    tempo: Tempo,
    beats_per_bar: u32,
    playing: bool,
    current_beat: u64,
    next_beat_time: f64,
    last_beat_time: f64,
    start_time: f64,
    subscribers: SlotMap<SubscriptionKey, Subscriber>,
    events: BTreeMap<u64, Vec<EventCallback>>,
}

impl Default for BeatClock {
    fn default() -> Self {
        Self::new(Tempo::default(), 4)
    }
}

impl BeatClock {
    pub fn new(tempo: Tempo, beats_per_bar: u32) -> Self {
        Self {
            tempo,
            beats_per_bar: clamp_beats_per_bar(beats_per_bar),
            playing: false,
            current_beat: 0,
            next_beat_time: 0.0,
            last_beat_time: 0.0,
            start_time: 0.0,
            subscribers: SlotMap::with_key(),
            events: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> BeatClockState {
        BeatClockState {
            bpm: self.tempo.bpm(),
            beats_per_bar: self.beats_per_bar,
            playing: self.playing,
            current_beat: self.current_beat,
            start_time: self.start_time,
        }
    }

    // --- Transport ---

    /// Start at context time `now`. Beat 0 falls on `now`.
    pub fn start(&mut self, now: f64) {
        if self.playing {
            return;
        }
        self.playing = true;
        self.start_time = now;
        self.next_beat_time = now;
        self.last_beat_time = now;
        self.current_beat = 0;
        tracing::debug!(now, bpm = self.tempo.bpm(), "beat clock started");
        self.notify_state();
    }

    /// Stop and discard every pending one-shot event.
    pub fn stop(&mut self) {
        if !self.playing {
            return;
        }
        self.playing = false;
        let dropped: usize = self.events.values().map(Vec::len).sum();
        self.events.clear();
        tracing::debug!(dropped, "beat clock stopped");
        self.notify_state();
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Set the tempo, clamped into range.
    pub fn set_bpm(&mut self, bpm: f64) {
        self.tempo = Tempo::new(bpm);
        self.notify_state();
    }

    /// Set the meter, clamped into range.
    pub fn set_beats_per_bar(&mut self, beats: u32) {
        self.beats_per_bar = clamp_beats_per_bar(beats);
        self.notify_state();
    }

    pub fn bpm(&self) -> f64 {
        self.tempo.bpm()
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    pub fn seconds_per_beat(&self) -> f64 {
        self.tempo.seconds_per_beat()
    }

    pub fn current_beat(&self) -> u64 {
        self.current_beat
    }

    /// Time of the most recently scheduled beat, or the start time before
    /// any beat was scheduled.
    pub fn current_beat_time(&self) -> f64 {
        self.last_beat_time
    }

    /// Position within the bar.
    pub fn bar_position(&self) -> u32 {
        (self.current_beat % self.beats_per_bar as u64) as u32
    }

    /// Round `time` to the nearest beat measured from the start time.
    pub fn snap_to_beat(&self, time: f64) -> f64 {
        self.tempo.snap_to_beat(self.start_time, time)
    }

    // --- Subscriptions ---

    /// Call `callback(beat, time)` for every scheduled beat.
    pub fn on_beat(&mut self, callback: impl FnMut(u64, f64) + Send + 'static) -> SubscriptionKey {
        self.subscribers.insert(Subscriber::Beat(Box::new(callback)))
    }

    /// Call `callback` on every state change.
    pub fn on_state_change(&mut self, callback: impl FnMut(&BeatClockState) + Send + 'static) -> SubscriptionKey {
        self.subscribers.insert(Subscriber::State(Box::new(callback)))
    }

    pub fn unsubscribe(&mut self, key: SubscriptionKey) -> bool {
        self.subscribers.remove(key).is_some()
    }

    /// Run `callback` once when `beat` is scheduled.
    ///
    /// Beats already scheduled are rejected.
    pub fn schedule_at(&mut self, beat: u64, callback: impl FnOnce(u64, f64) + Send + 'static) -> bool {
        if self.playing && beat < self.current_beat {
            tracing::debug!(beat, current = self.current_beat, "event for a past beat dropped");
            return false;
        }
        self.events.entry(beat).or_default().push(Box::new(callback));
        true
    }

    pub fn pending_events(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    // --- Scheduling ---

    /// Schedule every beat before `now + SCHEDULE_AHEAD`. Returns how many
    /// beats were scheduled.
    pub fn poll(&mut self, now: f64) -> usize {
        if !self.playing {
            return 0;
        }
        let horizon = now + SCHEDULE_AHEAD;
        let mut scheduled = 0;
        while self.next_beat_time < horizon {
            let (beat, time) = (self.current_beat, self.next_beat_time);
            for (key, sub) in self.subscribers.iter_mut() {
                let Subscriber::Beat(callback) = sub else { continue };
                if catch_unwind(AssertUnwindSafe(|| callback(beat, time))).is_err() {
                    tracing::error!(?key, beat, "beat subscriber panicked");
                }
            }
            for event in self.events.remove(&beat).unwrap_or_default() {
                if catch_unwind(AssertUnwindSafe(|| event(beat, time))).is_err() {
                    tracing::error!(beat, "scheduled event panicked");
                }
            }
            self.last_beat_time = time;
            self.next_beat_time += self.seconds_per_beat();
            self.current_beat += 1;
            scheduled += 1;
        }
        if scheduled > 0 {
            self.notify_state();
        }
        scheduled
    }

    fn notify_state(&mut self) {
        let state = self.state();
        for (key, sub) in self.subscribers.iter_mut() {
            let Subscriber::State(callback) = sub else { continue };
            if catch_unwind(AssertUnwindSafe(|| callback(&state))).is_err() {
                tracing::error!(?key, "state subscriber panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(clock: &mut BeatClock) -> Arc<Mutex<Vec<(u64, f64)>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        clock.on_beat(move |beat, time| sink.lock().unwrap().push((beat, time)));
        log
    }

    // === Scheduling tests ===

    #[test]
    fn beats_follow_tempo() {
        let mut clock = BeatClock::new(Tempo::new(120.0), 4);
        let log = recorder(&mut clock);
        let start = 1.0;
        clock.start(start);
        let mut now = start;
        while now < start + 5.0 {
            clock.poll(now);
            now += 0.025;
        }
        let beats = log.lock().unwrap().clone();
        assert!(beats.len() >= 10);
        for (i, (beat, time)) in beats.iter().enumerate() {
            assert_eq!(*beat, i as u64);
            assert!((time - (start + *beat as f64 * 0.5)).abs() < 1e-9);
        }
        assert!(beats.windows(2).all(|w| w[1].1 > w[0].1));
    }

    #[test]
    fn poll_schedules_within_window_only() {
        let mut clock = BeatClock::new(Tempo::new(120.0), 4);
        clock.start(0.0);
        assert_eq!(clock.poll(0.0), 1);
        assert_eq!(clock.poll(0.3), 0);
        assert_eq!(clock.poll(0.41), 1);
        assert_eq!(clock.current_beat(), 2);
        assert_eq!(clock.current_beat_time(), 0.5);
    }

    #[test]
    fn stopped_clock_schedules_nothing() {
        let mut clock = BeatClock::default();
        let log = recorder(&mut clock);
        assert_eq!(clock.poll(10.0), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn one_shot_events_fire_once() {
        let mut clock = BeatClock::new(Tempo::new(120.0), 4);
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        clock.start(0.0);
        assert!(clock.schedule_at(2, move |beat, time| sink.lock().unwrap().push((beat, time))));
        for i in 0..40 {
            clock.poll(i as f64 * 0.025);
        }
        assert_eq!(*fired.lock().unwrap(), vec![(2, 1.0)]);
        assert_eq!(clock.pending_events(), 0);
        assert!(!clock.schedule_at(0, |_, _| {}));
    }

    #[test]
    fn stop_discards_events() {
        let mut clock = BeatClock::default();
        let fired = Arc::new(Mutex::new(false));
        let sink = Arc::clone(&fired);
        clock.start(0.0);
        clock.schedule_at(100, move |_, _| *sink.lock().unwrap() = true);
        clock.stop();
        assert_eq!(clock.pending_events(), 0);
        clock.start(0.0);
        for i in 0..100 {
            clock.poll(i as f64);
        }
        assert!(!*fired.lock().unwrap());
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let mut clock = BeatClock::default();
        clock.on_beat(|_, _| panic!("bad subscriber"));
        let log = recorder(&mut clock);
        clock.start(0.0);
        clock.poll(0.0);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    // === State tests ===

    #[test]
    fn setters_clamp_and_notify_while_stopped() {
        let mut clock = BeatClock::default();
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        clock.on_state_change(move |s| sink.lock().unwrap().push(*s));

        clock.set_bpm(500.0);
        clock.set_beats_per_bar(0);
        let states = states.lock().unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].bpm, 300.0);
        assert_eq!(states[1].beats_per_bar, 1);
        assert!(!states[1].playing);
    }

    #[test]
    fn unsubscribe_stops_callbacks() {
        let mut clock = BeatClock::default();
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        let key = clock.on_beat(move |_, _| *sink.lock().unwrap() += 1);
        clock.start(0.0);
        clock.poll(0.0);
        assert!(clock.unsubscribe(key));
        assert!(!clock.unsubscribe(key));
        clock.poll(1.0);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn unsubscribe_removes_only_the_given_listener() {
        let mut clock = BeatClock::default();
        let beats = Arc::new(Mutex::new(0));
        let states = Arc::new(Mutex::new(0));
        let (b, s) = (Arc::clone(&beats), Arc::clone(&states));
        let beat_key = clock.on_beat(move |_, _| *b.lock().unwrap() += 1);
        let state_key = clock.on_state_change(move |_| *s.lock().unwrap() += 1);
        assert_ne!(beat_key, state_key);

        assert!(clock.unsubscribe(state_key));
        assert!(!clock.unsubscribe(state_key));
        clock.start(0.0);
        clock.poll(0.0);
        assert_eq!(*beats.lock().unwrap(), 1);
        assert_eq!(*states.lock().unwrap(), 0);

        assert!(clock.unsubscribe(beat_key));
        clock.poll(1.0);
        assert_eq!(*beats.lock().unwrap(), 1);
    }

    #[test]
    fn beat_time_survives_tempo_change() {
        let mut clock = BeatClock::new(Tempo::new(120.0), 4);
        clock.start(0.0);
        clock.poll(0.45);
        assert_eq!(clock.current_beat_time(), 0.5);
        clock.set_bpm(60.0);
        assert_eq!(clock.current_beat_time(), 0.5);
        clock.poll(0.95);
        assert_eq!(clock.current_beat_time(), 1.0);
        assert_eq!(clock.current_beat(), 3);
    }

    #[test]
    fn derived_queries() {
        let mut clock = BeatClock::new(Tempo::new(120.0), 3);
        clock.start(2.0);
        assert_eq!(clock.seconds_per_beat(), 0.5);
        assert_eq!(clock.snap_to_beat(2.74), 2.5);
        assert_eq!(clock.snap_to_beat(2.76), 3.0);
        for i in 0..20 {
            clock.poll(2.0 + i as f64 * 0.025);
        }
        // beats 0..=1 scheduled by t = 2.475 (horizon 2.575)
        assert_eq!(clock.current_beat(), 2);
        assert_eq!(clock.bar_position(), 2);
    }
}
