//! Allocation-free render path tests.
//!
//! Commands are applied on the first block, outside the check. Every block
//! after that must render without touching the heap: voices running out,
//! automation ramps, bus mixing and the convolution insert.
//!
//! Just run `cargo test`, no feature flags needed.

use std::sync::Arc;

use assert_no_alloc::{assert_no_alloc, AllocDisabler};

#[cfg(debug_assertions)]
#[global_allocator]
static A: AllocDisabler = AllocDisabler;

use nt_engine::effects::{synthetic_impulse, ResonanceInsert, PARAM_WET};
use nt_engine::{
    link, BufferPlayer, Command, ControlLink, Engine, OscillatorBank, ParamEvent, ParamTarget, Partial,
    Source, Voice, Waveform, MASTER_BUS,
};
use nt_ir::{AudioBuffer, BLOCK_SIZE};

const SR: u32 = 48000;

fn engine() -> (Engine, ControlLink) {
    let (control, engine_link) = link(256);
    (Engine::new(SR, engine_link), control)
}

/// Render `seconds` after one warm-up block, aborting on any heap allocation.
fn assert_render_alloc_free(engine: &mut Engine, seconds: usize) {
    let mut out = vec![0.0f32; BLOCK_SIZE * 2];
    engine.render(&mut out, 2);
    let blocks = seconds * SR as usize / BLOCK_SIZE;
    assert_no_alloc(|| {
        for _ in 0..blocks {
            engine.render(&mut out, 2);
        }
    });
}

#[test]
fn oscillators_with_envelopes_alloc_free() {
    let (mut engine, mut control) = engine();
    for i in 0..32u64 {
        let partials = [
            Partial { frequency: 110.0 + i as f32 * 20.0, gain: 0.2, waveform: Waveform::Sine },
            Partial { frequency: 220.0 + i as f32 * 40.0, gain: 0.1, waveform: Waveform::Sawtooth },
        ];
        let envelope = [
            ParamEvent::LinearRamp { value: 0.5, time: 0.01 },
            ParamEvent::SetTarget { target: 0.2, time: 0.01, time_constant: 0.1 },
        ];
        let voice = Voice::new(i, MASTER_BUS, Source::Oscillator(OscillatorBank::new(&partials)), 0.0)
            .with_gain(0.0, &envelope);
        control.send(Command::StartVoice(Box::new(voice))).ok();
        // Half of them stop mid-render and get reaped.
        if i % 2 == 0 {
            control.send(Command::StopVoice { id: i, at: 1.0 }).ok();
        }
    }
    assert_render_alloc_free(&mut engine, 3);
}

#[test]
fn samples_on_buses_alloc_free() {
    let (mut engine, mut control) = engine();
    let buffer = Arc::new(AudioBuffer::from_planes(
        vec![(0..SR as usize).map(|i| (i as f32 * 0.02).sin()).collect(); 2],
        44100,
    ));
    control.send(Command::CreateBus { id: 1, parent: MASTER_BUS, gain: 0.8 }).ok();
    control.send(Command::CreateBus { id: 2, parent: 1, gain: 0.5 }).ok();
    for i in 0..16u64 {
        let mut player = BufferPlayer::new(Arc::clone(&buffer), 1.0 + i as f64 * 0.05, SR);
        if i % 2 == 0 {
            player = player.with_loop(0.2, 0.8);
        }
        let bus = if i % 2 == 0 { 1 } else { 2 };
        let voice = Voice::new(i, bus, Source::Buffer(player), 0.0);
        control.send(Command::StartVoice(Box::new(voice))).ok();
    }
    control
        .send(Command::Automate { target: ParamTarget::BusGain(2), event: ParamEvent::LinearRamp { value: 0.0, time: 2.0 } })
        .ok();
    assert_render_alloc_free(&mut engine, 3);
}

#[test]
fn resonance_insert_alloc_free() {
    let (mut engine, mut control) = engine();
    let impulse = synthetic_impulse(SR, 1.0, 7);
    control.send(Command::CreateBus { id: 1, parent: MASTER_BUS, gain: 1.0 }).ok();
    control.send(Command::SetInsert { bus: 1, insert: Some(Box::new(ResonanceInsert::new(&impulse, 1.0, 0.0))) }).ok();
    let bank = OscillatorBank::new(&[Partial { frequency: 330.0, gain: 0.4, waveform: Waveform::Triangle }]);
    control.send(Command::StartVoice(Box::new(Voice::new(1, 1, Source::Oscillator(bank), 0.0)))).ok();
    control
        .send(Command::Automate {
            target: ParamTarget::Insert { bus: 1, param: PARAM_WET },
            event: ParamEvent::LinearRamp { value: 0.4, time: 0.5 },
        })
        .ok();
    assert_render_alloc_free(&mut engine, 2);
}
