//! CPAL-based audio output backend.
//!
//! The stream is owned by a dedicated audio thread: cpal streams are not
//! `Send` on every platform, while the context handle must be shareable.
//! The thread builds the device, moves the engine into the callback, then
//! waits for start/stop/close requests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleRate, Stream, StreamConfig, SupportedBufferSize};
use nt_engine::{link, ControlLink, Engine};

use crate::traits::{AudioError, AudioOutput};

/// CPAL-based audio output.
pub struct CpalOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    running: Arc<AtomicBool>,
    /// Callback-to-playback delay reported by the host, in microseconds.
    output_latency_us: Arc<AtomicU64>,
}

impl CpalOutput {
    /// Open the default output device.
    ///
    /// `sample_rate` is used when the device supports it; `buffer_frames`
    /// is clamped into the device's supported range.
    pub fn new(sample_rate: Option<u32>, buffer_frames: Option<u32>) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;

        let default = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceInit(e.to_string()))?;

        let mut config: StreamConfig = default.config();
        // Force stereo output; the engine renders two channels.
        config.channels = 2;

        if let Some(rate) = sample_rate {
            if supports_rate(&device, rate) {
                config.sample_rate = SampleRate(rate);
            } else {
                tracing::warn!(rate, default = config.sample_rate.0, "sample rate unsupported, using device default");
            }
        }

        config.buffer_size = match (buffer_frames, default.buffer_size()) {
            (Some(frames), SupportedBufferSize::Range { min, max }) => BufferSize::Fixed(frames.clamp(*min, *max)),
            _ => BufferSize::Default,
        };

        Ok(Self {
            device,
            config,
            stream: None,
            running: Arc::new(AtomicBool::new(false)),
            output_latency_us: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn latency_probe(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.output_latency_us)
    }

    /// Build the stream with `engine` rendering in the callback.
    ///
    /// The stream plays immediately but outputs silence, without advancing
    /// the engine, until [`AudioOutput::start`].
    pub fn build_stream(&mut self, mut engine: Engine) -> Result<(), AudioError> {
        let running = Arc::clone(&self.running);
        let latency = Arc::clone(&self.output_latency_us);
        let channels = self.config.channels as usize;

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                    if !running.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }
                    let ts = info.timestamp();
                    if let Some(delay) = ts.playback.duration_since(&ts.callback) {
                        latency.store(delay.as_micros() as u64, Ordering::Relaxed);
                    }
                    engine.render(data, channels);
                },
                |err| tracing::error!(error = %err, "audio stream error"),
                None,
            )
            .map_err(|e| AudioError::StreamCreate(e.to_string()))?;

        stream.play().map_err(|e| AudioError::Playback(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }
}

fn supports_rate(device: &Device, rate: u32) -> bool {
    device
        .supported_output_configs()
        .map(|mut configs| {
            configs.any(|c| c.channels() >= 2 && (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&rate))
        })
        .unwrap_or(false)
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn buffer_frames(&self) -> Option<u32> {
        match self.config.buffer_size {
            BufferSize::Fixed(frames) => Some(frames),
            BufferSize::Default => None,
        }
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.running.store(true, Ordering::Relaxed);
        if let Some(ref stream) = self.stream {
            stream.play().map_err(|e| AudioError::Playback(e.to_string()))?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::Relaxed);
        if let Some(ref stream) = self.stream {
            stream.pause().map_err(|e| AudioError::Playback(e.to_string()))?;
        }
        Ok(())
    }
}

// --- Audio thread ---

pub(crate) enum DeviceMsg {
    Start,
    Stop,
    Close,
}

/// What the audio thread hands back once the stream is live.
pub(crate) struct DeviceReady {
    pub sample_rate: u32,
    pub buffer_frames: Option<u32>,
    pub control: ControlLink,
    pub clock: Arc<AtomicU64>,
    pub latency_us: Arc<AtomicU64>,
}

/// Control handle for the audio thread. Dropping it closes the device.
pub(crate) struct DeviceHandle {
    tx: Sender<DeviceMsg>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceHandle {
    /// Open the default device on a new audio thread and wait until the
    /// stream is built.
    pub fn spawn(
        sample_rate: Option<u32>,
        buffer_frames: Option<u32>,
        capacity: usize,
    ) -> Result<(Self, DeviceReady), AudioError> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (tx, rx) = mpsc::channel::<DeviceMsg>();

        let thread = thread::Builder::new()
            .name("nt-audio".to_string())
            .spawn(move || {
                let mut output = match CpalOutput::new(sample_rate, buffer_frames) {
                    Ok(output) => output,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let (control, engine_link) = link(capacity);
                let engine = Engine::new(output.sample_rate(), engine_link);
                let clock = engine.clock();
                if let Err(e) = output.build_stream(engine) {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
                let ready = DeviceReady {
                    sample_rate: output.sample_rate(),
                    buffer_frames: output.buffer_frames(),
                    control,
                    clock,
                    latency_us: output.latency_probe(),
                };
                if ready_tx.send(Ok(ready)).is_err() {
                    return;
                }

                while let Ok(msg) = rx.recv() {
                    let result = match msg {
                        DeviceMsg::Start => output.start(),
                        DeviceMsg::Stop => output.stop(),
                        DeviceMsg::Close => break,
                    };
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "device control failed");
                    }
                }
                tracing::debug!("audio thread exiting");
            })
            .map_err(|e| AudioError::Thread(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| AudioError::Thread("audio thread exited during startup".to_string()))??;
        Ok((Self { tx, thread: Some(thread) }, ready))
    }

    pub fn send(&self, msg: DeviceMsg) {
        let _ = self.tx.send(msg);
    }

    /// Stop the stream and join the audio thread.
    pub fn close(&mut self) {
        let _ = self.tx.send(DeviceMsg::Close);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("audio thread panicked");
            }
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}
