//! Sample-accurate parameter automation.
//!
//! A `Param` holds a small timeline of events in absolute context time
//! (seconds). The render loop calls [`Param::advance`] once per frame with
//! the frame's time; completed events collapse into an anchor `(time, value)`
//! so the timeline stays short.

use arrayvec::ArrayVec;

/// Maximum number of pending events per parameter.
pub const MAX_EVENTS: usize = 16;

/// One automation event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamEvent {
    /// Jump to `value` at `time`.
    SetValue { value: f32, time: f64 },
    /// Ramp linearly from the previous event to reach `value` at `time`.
    LinearRamp { value: f32, time: f64 },
    /// Approach `target` exponentially starting at `time`.
    SetTarget { target: f32, time: f64, time_constant: f32 },
    /// Drop every pending event and hold the value reached when applied.
    CancelAndHold,
}

impl ParamEvent {
    fn time(&self) -> f64 {
        match *self {
            ParamEvent::SetValue { time, .. }
            | ParamEvent::LinearRamp { time, .. }
            | ParamEvent::SetTarget { time, .. } => time,
            ParamEvent::CancelAndHold => f64::NEG_INFINITY,
        }
    }
}

/// An automatable value.
#[derive(Clone, Debug)]
pub struct Param {
    value: f32,
    anchor_time: f64,
    anchor_value: f32,
    events: ArrayVec<ParamEvent, MAX_EVENTS>,
}

impl Param {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            anchor_time: 0.0,
            anchor_value: value,
            events: ArrayVec::new(),
        }
    }

    /// Value computed by the last `advance`.
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Number of pending events.
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    /// Add an event to the timeline.
    ///
    /// `now` is the render time the event arrives at. An event added to an
    /// empty timeline starts from the held value at `now`, so a ramp never
    /// reaches back before it was scheduled. Returns `false` if the
    /// timeline is full.
    pub fn schedule(&mut self, event: ParamEvent, now: f64) -> bool {
        if let ParamEvent::CancelAndHold = event {
            let held = self.advance(now);
            self.events.clear();
            self.anchor_time = now;
            self.anchor_value = held;
            return true;
        }
        if self.events.is_empty() && self.anchor_time < now {
            self.anchor_time = now;
        }
        let time = event.time();
        let pos = self.events.iter().position(|e| e.time() > time).unwrap_or(self.events.len());
        self.events.try_insert(pos, event).is_ok()
    }

    /// Compute the value at `t`, retiring events that have completed.
    ///
    /// `t` must not decrease between calls.
    pub fn advance(&mut self, t: f64) -> f32 {
        while let Some(&event) = self.events.first() {
            match event {
                ParamEvent::SetValue { value, time } => {
                    if time > t {
                        break;
                    }
                    self.retire(time, value);
                }
                ParamEvent::LinearRamp { value, time } => {
                    if time <= t {
                        self.retire(time, value);
                        continue;
                    }
                    let span = time - self.anchor_time;
                    let frac = if span <= 0.0 { 1.0 } else { ((t - self.anchor_time) / span).clamp(0.0, 1.0) };
                    self.value = self.anchor_value + (value - self.anchor_value) * frac as f32;
                    return self.value;
                }
                ParamEvent::SetTarget { target, time, time_constant } => {
                    if time > t {
                        break;
                    }
                    let start = time.max(self.anchor_time);
                    let next = self.events.get(1).map(ParamEvent::time);
                    match next {
                        Some(next_time) if next_time <= t => {
                            let v = approach(self.anchor_value, target, next_time - start, time_constant);
                            self.retire(next_time, v);
                        }
                        _ => {
                            self.value = approach(self.anchor_value, target, t - start, time_constant);
                            return self.value;
                        }
                    }
                }
                ParamEvent::CancelAndHold => {
                    self.events.remove(0);
                }
            }
        }
        self.value = self.anchor_value;
        self.value
    }

    fn retire(&mut self, time: f64, value: f32) {
        self.events.remove(0);
        self.anchor_time = time;
        self.anchor_value = value;
    }
}

/// Exponential approach from `from` toward `to` after `elapsed` seconds.
fn approach(from: f32, to: f32, elapsed: f64, time_constant: f32) -> f32 {
    if time_constant <= 0.0 {
        return to;
    }
    let k = (-elapsed.max(0.0) / time_constant as f64).exp() as f32;
    to + (from - to) * k
}
