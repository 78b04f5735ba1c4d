//! Audio output trait and error types.

use thiserror::Error;

/// Error type for audio operations.
#[derive(Debug, Error)]
pub enum AudioError {
    /// No audio device available
    #[error("no audio output device available")]
    NoDevice,
    /// Failed to initialize audio device
    #[error("device init error: {0}")]
    DeviceInit(String),
    /// Failed to create audio stream
    #[error("stream create error: {0}")]
    StreamCreate(String),
    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),
    /// The audio thread could not be started or died
    #[error("audio thread error: {0}")]
    Thread(String),
    /// The context was closed
    #[error("audio context is closed")]
    Closed,
    /// Offline-only operation on a realtime context
    #[error("operation requires an offline context")]
    NotOffline,
    /// The render thread is not draining commands
    #[error("command queue full")]
    QueueFull,
}

/// Trait for audio output backends.
pub trait AudioOutput {
    /// Get the sample rate.
    fn sample_rate(&self) -> u32;

    /// Device buffer size in frames, when fixed.
    fn buffer_frames(&self) -> Option<u32>;

    /// Start playback.
    fn start(&mut self) -> Result<(), AudioError>;

    /// Stop playback. The engine stops advancing.
    fn stop(&mut self) -> Result<(), AudioError>;
}
