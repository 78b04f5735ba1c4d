//! Where raw sample and preset bytes come from.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::LoadError;

/// Supplies raw bytes for a sample or preset id.
pub trait SampleSource: Send + Sync + 'static {
    fn fetch(&self, id: &str) -> BoxFuture<'static, Result<Arc<[u8]>, LoadError>>;
}

/// Reads ids as paths relative to a root directory.
#[derive(Clone, Debug)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SampleSource for FileSource {
    fn fetch(&self, id: &str) -> BoxFuture<'static, Result<Arc<[u8]>, LoadError>> {
        let path = self.root.join(id);
        let id = id.to_string();
        async move {
            tokio::fs::read(&path)
                .await
                .map(Arc::from)
                .map_err(|e| LoadError::Fetch { id, reason: e.to_string() })
        }
        .boxed()
    }
}

/// In-memory byte store, filled by the host application or tests.
#[derive(Default)]
pub struct MemorySource {
    entries: Mutex<HashMap<String, Arc<[u8]>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).insert(id.into(), bytes.into());
    }

    pub fn remove(&self, id: &str) -> bool {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).remove(id).is_some()
    }
}

impl SampleSource for MemorySource {
    fn fetch(&self, id: &str) -> BoxFuture<'static, Result<Arc<[u8]>, LoadError>> {
        let found = self.entries.lock().unwrap_or_else(PoisonError::into_inner).get(id).cloned();
        let result = found.ok_or_else(|| LoadError::Fetch { id: id.to_string(), reason: "not found".to_string() });
        futures::future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_source_roundtrip() {
        let source = MemorySource::new();
        source.insert("a", vec![1u8, 2, 3]);
        assert_eq!(&*source.fetch("a").await.unwrap(), &[1, 2, 3]);
        assert!(matches!(source.fetch("b").await, Err(LoadError::Fetch { .. })));
        assert!(source.remove("a"));
    }

    #[tokio::test]
    async fn file_source_missing_file_is_fetch_error() {
        let source = FileSource::new(std::env::temp_dir());
        let err = source.fetch("nodetone-does-not-exist.wav").await.unwrap_err();
        assert!(matches!(err, LoadError::Fetch { .. }));
    }
}
