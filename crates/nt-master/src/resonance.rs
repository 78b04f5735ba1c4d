//! Pedal-driven sympathetic resonance.
//!
//! Installs a convolution insert on an instrument bus and crossfades its
//! wet and dry paths when the sustain pedal moves.

use nt_audio::AudioContext;
use nt_engine::effects::{resample, synthetic_impulse, ResonanceInsert, PARAM_DRY, PARAM_WET};
use nt_engine::{BusId, Command, ParamEvent, ParamTarget};
use nt_ir::{AudioBuffer, ResonanceConfig};

/// Seed for synthetic impulses, so renders are repeatable.
const IMPULSE_SEED: u64 = 0x5EED;

pub struct ResonanceStage {
    bus: BusId,
    wet: f32,
    ramp: f64,
    pedal_down: bool,
}

impl ResonanceStage {
    /// Install the insert on `bus`, fully dry.
    ///
    /// Without `impulse`, a synthetic one of `config.decay` seconds is used.
    pub fn install(
        ctx: &AudioContext,
        bus: BusId,
        config: &ResonanceConfig,
        impulse: Option<&AudioBuffer>,
    ) -> Self {
        let sample_rate = ctx.sample_rate();
        let impulse = match impulse {
            Some(ir) if ir.sample_rate() == sample_rate => ir.clone(),
            Some(ir) => resample(ir, sample_rate),
            None => synthetic_impulse(sample_rate, config.decay.max(0.05), IMPULSE_SEED),
        };
        let insert = ResonanceInsert::new(&impulse, 1.0, 0.0);
        if let Err(e) = ctx.send(Command::SetInsert { bus, insert: Some(Box::new(insert)) }) {
            tracing::warn!(error = %e, "resonance insert not installed");
        }
        Self { bus, wet: config.wet.clamp(0.0, 1.0), ramp: config.ramp.max(0.0) as f64, pedal_down: false }
    }

    pub fn is_pedal_down(&self) -> bool {
        self.pedal_down
    }

    /// Crossfade toward the pedal-down wet mix, or back to fully dry.
    pub fn set_pedal_down(&mut self, ctx: &AudioContext, down: bool) {
        if self.pedal_down == down {
            return;
        }
        self.pedal_down = down;
        let (dry, wet) = if down { (1.0 - self.wet * 0.5, self.wet) } else { (1.0, 0.0) };
        let end = ctx.current_time() + self.ramp;
        for (param, value) in [(PARAM_DRY, dry), (PARAM_WET, wet)] {
            let target = ParamTarget::Insert { bus: self.bus, param };
            let sent = ctx
                .send(Command::Automate { target, event: ParamEvent::CancelAndHold })
                .and_then(|()| ctx.send(Command::Automate { target, event: ParamEvent::LinearRamp { value, time: end } }));
            if let Err(e) = sent {
                tracing::warn!(error = %e, "resonance crossfade dropped");
            }
        }
    }

    /// Remove the insert from the bus.
    pub fn uninstall(&self, ctx: &AudioContext) {
        let _ = ctx.send(Command::SetInsert { bus: self.bus, insert: None });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nt_audio::ContextConfig;
    use nt_engine::{OscillatorBank, Partial, Source, Voice, Waveform};

    #[test]
    fn pedal_brings_in_the_wet_path() {
        let ctx = AudioContext::new(&ContextConfig::offline(8000)).unwrap();
        ctx.resume().unwrap();
        let bus = ctx.create_bus(ctx.master_bus(), 1.0).unwrap();
        let config = ResonanceConfig { impulse: None, wet: 0.8, decay: 0.5, ramp: 0.05 };
        let mut stage = ResonanceStage::install(&ctx, bus, &config, None);

        let bank = OscillatorBank::new(&[Partial { frequency: 200.0, gain: 0.5, waveform: Waveform::Sine }]);
        let id = ctx.next_voice_id();
        let voice = Voice::new(id, bus, Source::Oscillator(bank), 0.0);
        ctx.send(Command::StartVoice(Box::new(voice))).unwrap();

        ctx.render(2048).unwrap();
        stage.set_pedal_down(&ctx, true);
        assert!(stage.is_pedal_down());
        ctx.render(2048).unwrap();
        ctx.send(Command::KillVoice(id)).unwrap();

        // With the source gone, only the reverb tail is left.
        let tail = ctx.render(1024).unwrap();
        assert!(tail.iter().any(|f| f.peak() > 1e-4));

        stage.set_pedal_down(&ctx, false);
        ctx.render(4096).unwrap();
        let silent = ctx.render(512).unwrap();
        assert!(silent.iter().all(|f| f.peak() < 1e-6));
    }
}
