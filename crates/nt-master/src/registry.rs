//! Preset registry.
//!
//! Presets are JSON zone maps fetched through the sample source; each zone
//! names a sample and the key range it covers. Loaded presets are shared
//! between instruments and reference counted: the last instrument to
//! release a preset removes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::try_join_all;
use futures::FutureExt;
use nt_ir::{AudioBuffer, LoopPoints, Note};
use serde::{Deserialize, Serialize};

use crate::cache::SampleCache;
use crate::error::LoadError;
use crate::flight::SingleFlight;
use crate::loader::load_sample;
use crate::source::SampleSource;

/// One zone of a preset file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub sample: String,
    pub root: Note,
    pub low: Note,
    pub high: Note,
    #[serde(default, rename = "loop")]
    pub loop_points: Option<LoopPoints>,
}

/// A preset file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresetSpec {
    #[serde(default)]
    pub name: String,
    pub zones: Vec<ZoneSpec>,
}

#[derive(Clone, Debug)]
pub struct Zone {
    pub root: Note,
    pub low: Note,
    pub high: Note,
    pub loop_points: Option<LoopPoints>,
    pub buffer: Arc<AudioBuffer>,
}

/// A preset with every zone decoded.
#[derive(Debug)]
pub struct LoadedPreset {
    pub name: String,
    pub zones: Vec<Zone>,
}

impl LoadedPreset {
    /// The zone covering `note`; the first match wins.
    pub fn zone_for(&self, note: Note) -> Option<&Zone> {
        self.zones.iter().find(|z| (z.low..=z.high).contains(&note))
    }
}

struct Held {
    preset: Arc<LoadedPreset>,
    refs: usize,
}

pub struct PresetRegistry {
    source: Arc<dyn SampleSource>,
    cache: Arc<SampleCache>,
    held: Mutex<HashMap<String, Held>>,
    flight: SingleFlight<String, Arc<LoadedPreset>>,
}

impl PresetRegistry {
    pub fn new(source: Arc<dyn SampleSource>, cache: Arc<SampleCache>) -> Self {
        Self { source, cache, held: Mutex::new(HashMap::new()), flight: SingleFlight::new() }
    }

    fn held(&self) -> MutexGuard<'_, HashMap<String, Held>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load `name`, reusing a held copy or joining a running load.
    ///
    /// Loading does not take a reference; see [`PresetRegistry::retain`].
    pub async fn load(&self, name: &str) -> Result<Arc<LoadedPreset>, LoadError> {
        let held = self.held().get(name).map(|h| Arc::clone(&h.preset));
        if let Some(preset) = held {
            return Ok(preset);
        }
        let key = name.to_string();
        let (source, cache) = (Arc::clone(&self.source), Arc::clone(&self.cache));
        let flight = self.flight.join(&key, || fetch_preset(source, cache, key.clone()).boxed());
        let result = flight.clone().await;
        self.flight.finish(&key, &flight);
        result
    }

    /// Take a reference on `preset`, registering it if needed.
    pub fn retain(&self, preset: &Arc<LoadedPreset>) {
        let mut held = self.held();
        held.entry(preset.name.clone())
            .or_insert_with(|| Held { preset: Arc::clone(preset), refs: 0 })
            .refs += 1;
    }

    /// Drop a reference; the preset is removed when none remain.
    pub fn release(&self, name: &str) {
        let mut held = self.held();
        let Some(entry) = held.get_mut(name) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            held.remove(name);
            tracing::debug!(name, "preset unloaded");
        }
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.held().contains_key(name)
    }

    pub fn ref_count(&self, name: &str) -> usize {
        self.held().get(name).map_or(0, |h| h.refs)
    }
}

async fn fetch_preset(
    source: Arc<dyn SampleSource>,
    cache: Arc<SampleCache>,
    name: String,
) -> Result<Arc<LoadedPreset>, LoadError> {
    let bytes = source.fetch(&name).await?;
    let spec: PresetSpec = serde_json::from_slice(&bytes)
        .map_err(|e| LoadError::Preset { name: name.clone(), reason: e.to_string() })?;
    if spec.zones.is_empty() {
        return Err(LoadError::Preset { name, reason: "no zones".to_string() });
    }

    let buffers = try_join_all(
        spec.zones
            .iter()
            .map(|z| load_sample(Arc::clone(&cache), Arc::clone(&source), z.sample.clone())),
    )
    .await?;

    let zones = spec
        .zones
        .into_iter()
        .zip(buffers)
        .map(|(z, buffer)| Zone { root: z.root, low: z.low, high: z.high, loop_points: z.loop_points, buffer })
        .collect();
    tracing::debug!(name, "preset loaded");
    Ok(Arc::new(LoadedPreset { name, zones }))
}
