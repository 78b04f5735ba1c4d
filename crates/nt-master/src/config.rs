//! Session configuration, loaded from TOML.
//!
//! ```toml
//! load_timeout_secs = 30
//! sample_root = "samples"
//!
//! [context]
//! latency_hint = "interactive"
//!
//! [transport]
//! bpm = 96
//!
//! [instruments.lead]
//! kind = "synth"
//! timbre = "organ"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nt_audio::ContextConfig;
use nt_ir::{clamp_beats_per_bar, InstrumentConfig, Tempo};
use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::ConfigError;
use crate::loader::LOAD_TIMEOUT;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub bpm: f64,
    pub beats_per_bar: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { bpm: 120.0, beats_per_bar: 4 }
    }
}

impl TransportConfig {
    pub fn tempo(&self) -> Tempo {
        Tempo::new(self.bpm)
    }

    pub fn beats_per_bar(&self) -> u32 {
        clamp_beats_per_bar(self.beats_per_bar)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub context: ContextConfig,
    pub cache: CacheConfig,
    pub transport: TransportConfig,
    pub load_timeout_secs: u64,
    /// Directory samples are read from. Relative paths resolve against the
    /// config file's directory.
    pub sample_root: Option<PathBuf>,
    pub instruments: BTreeMap<String, InstrumentConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            context: ContextConfig::default(),
            cache: CacheConfig::default(),
            transport: TransportConfig::default(),
            load_timeout_secs: LOAD_TIMEOUT.as_secs(),
            sample_root: None,
            instruments: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        if let (Some(root), Some(dir)) = (config.sample_root.as_mut(), path.parent()) {
            if root.is_relative() {
                *root = dir.join(&*root);
            }
        }
        Ok(config)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nt_audio::{LatencyHint, RenderMode};

    #[test]
    fn empty_config_uses_defaults() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.load_timeout(), LOAD_TIMEOUT);
        assert_eq!(config.transport.tempo().bpm(), 120.0);
    }

    #[test]
    fn full_config_parses() {
        let config = SessionConfig::from_toml_str(
            r#"
            load_timeout_secs = 5

            [context]
            mode = "offline"
            sample_rate = 22050
            latency_hint = "playback"

            [cache]
            max_entries = 10

            [transport]
            bpm = 90
            beats_per_bar = 40

            [instruments.bass]
            kind = "sampler"
            sample = "bass.wav"
            root_note = "E1"

            [instruments.pad]
            kind = "synth"
            timbre = "organ"
            "#,
        )
        .unwrap();
        assert_eq!(config.context.mode, RenderMode::Offline);
        assert_eq!(config.context.latency_hint, LatencyHint::Playback);
        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.transport.beats_per_bar(), 16);
        assert_eq!(config.load_timeout(), Duration::from_secs(5));
        assert_eq!(config.instruments.len(), 2);
        assert_eq!(config.instruments["bass"].kind(), "sampler");
    }

    #[test]
    fn unknown_instrument_kind_is_rejected() {
        let err = SessionConfig::from_toml_str("[instruments.x]\nkind = \"theremin\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
