//! In-flight request table.
//!
//! The first caller for a key starts the work; everyone else joins the same
//! shared future until it is finished.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::error::LoadError;

pub type SharedLoad<V> = Shared<BoxFuture<'static, Result<V, LoadError>>>;

pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, SharedLoad<V>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self { inflight: Mutex::new(HashMap::new()) }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the load for `key`, starting it with `start` if none is running.
    ///
    /// `start` runs at most once per flight.
    pub fn join<F>(&self, key: &K, start: F) -> SharedLoad<V>
    where
        F: FnOnce() -> BoxFuture<'static, Result<V, LoadError>>,
    {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = inflight.get(key) {
            return existing.clone();
        }
        let shared = start().shared();
        inflight.insert(key.clone(), shared.clone());
        shared
    }

    /// Forget `flight` once it has resolved. A newer flight for the same key
    /// is left alone.
    pub fn finish(&self, key: &K, flight: &SharedLoad<V>) {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if inflight.get(key).is_some_and(|f| f.ptr_eq(flight)) {
            inflight.remove(key);
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn joiners_share_one_start() {
        let flight: SingleFlight<String, u32> = SingleFlight::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let key = "k".to_string();

        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let rx = Arc::new(Mutex::new(Some(rx)));
        let make = || {
            let starts = Arc::clone(&starts);
            let rx = Arc::clone(&rx);
            move || {
                starts.fetch_add(1, Ordering::SeqCst);
                let rx = rx.lock().unwrap().take().unwrap();
                async move { rx.await.map_err(|_| LoadError::Cancelled) }.boxed()
            }
        };

        let a = flight.join(&key, make());
        let b = flight.join(&key, make());
        assert!(flight.contains(&key));
        tx.send(7).unwrap();
        assert_eq!(a.clone().await, Ok(7));
        assert_eq!(b.await, Ok(7));
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        flight.finish(&key, &a);
        assert!(flight.is_empty());
    }

    #[tokio::test]
    async fn finish_ignores_stale_flight() {
        let flight: SingleFlight<u8, u8> = SingleFlight::new();
        let old = flight.join(&1, || async { Ok(1) }.boxed());
        flight.finish(&1, &old);
        let new = flight.join(&1, || async { Ok(2) }.boxed());
        flight.finish(&1, &old);
        assert!(flight.contains(&1));
        assert_eq!(new.await, Ok(2));
    }
}
