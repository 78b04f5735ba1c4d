//! Background loading of instrument resources.
//!
//! A [`LoadTask`] runs a load future on the runtime under a timeout and
//! hands the result back through a oneshot channel. The control thread
//! polls it without blocking. Cancelling sets the token, which the task
//! checks before delivering, and aborts the task.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nt_ir::AudioBuffer;
use tokio::runtime::Handle;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::cache::SampleCache;
use crate::error::LoadError;
use crate::source::SampleSource;

/// Upper bound on any single instrument load.
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A running load whose result is collected on the control thread.
pub struct LoadTask<T> {
    rx: oneshot::Receiver<Result<T, LoadError>>,
    handle: JoinHandle<()>,
    token: CancelToken,
}

impl<T: Send + 'static> LoadTask<T> {
    /// Spawn `load` on `runtime`, failing it with [`LoadError::Timeout`]
    /// after `timeout`.
    pub fn spawn<F>(runtime: &Handle, timeout: Duration, load: F) -> Self
    where
        F: Future<Output = Result<T, LoadError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let token = CancelToken::new();
        let task_token = token.clone();
        let handle = runtime.spawn(async move {
            let result = match tokio::time::timeout(timeout, load).await {
                Ok(result) => result,
                Err(_) => Err(LoadError::Timeout(timeout)),
            };
            if task_token.is_cancelled() {
                return;
            }
            let _ = tx.send(result);
        });
        Self { rx, handle, token }
    }

    /// Take the result if the load has finished.
    pub fn poll(&mut self) -> Option<Result<T, LoadError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(LoadError::Cancelled)),
        }
    }

    /// Wait for the result.
    pub async fn wait(&mut self) -> Result<T, LoadError> {
        (&mut self.rx).await.unwrap_or(Err(LoadError::Cancelled))
    }

    pub fn cancel(&self) {
        self.token.cancel();
        self.handle.abort();
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

/// Fetch `id` from `source` and decode it off the async workers.
pub async fn fetch_and_decode(source: Arc<dyn SampleSource>, id: String) -> Result<AudioBuffer, LoadError> {
    let bytes = source.fetch(&id).await?;
    let decode_id = id.clone();
    tokio::task::spawn_blocking(move || nt_formats::decode_wav(&bytes).map_err(|e| LoadError::decode(&decode_id, e)))
        .await
        .map_err(|e| LoadError::Decode { id, reason: e.to_string() })?
}

/// Load a decoded sample through the cache.
pub async fn load_sample(
    cache: Arc<SampleCache>,
    source: Arc<dyn SampleSource>,
    id: String,
) -> Result<Arc<AudioBuffer>, LoadError> {
    let fetch_id = id.clone();
    cache.load(&id, move || fetch_and_decode(source, fetch_id)).await
}
