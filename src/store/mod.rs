//! Shared watch list and its single serialization boundary.
//!
//! Every mutation of the watch list happens while holding the one lock owned by
//! [`WatchStore`].  Callers that need a read-modify-write cycle must take the lock with
//! [`WatchStore::lock`] and keep the returned guard for the full cycle, otherwise two
//! concurrent cycles can read the same snapshot and the second write-back loses the first.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

pub use persist::{JsonFileBackend, StateBackend, StoreError};

mod persist;

/// Opaque identity of a party that wants to hear about changes.  In practice this is a chat
/// id handed to us by the conversational layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatcherId(pub i64);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for WatcherId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A single URL being tracked, keyed by exact string match on `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedResource {
    pub url: String,

    /// Last successfully extracted value, `None` until the first successful fetch.
    pub last_value: Option<String>,

    /// Never empty for a resource held by the store, and never contains duplicates.
    pub watchers: Vec<WatcherId>,
}

impl WatchedResource {
    pub fn new(url: impl Into<String>, last_value: Option<String>, watcher: WatcherId) -> Self {
        Self {
            url: url.into(),
            last_value,
            watchers: vec![watcher],
        }
    }

    pub fn is_watched_by(&self, watcher: WatcherId) -> bool {
        self.watchers.contains(&watcher)
    }

    /// Adds the watcher with set semantics.  Returns true if it was not already present.
    pub fn add_watcher(&mut self, watcher: WatcherId) -> bool {
        if self.is_watched_by(watcher) {
            return false;
        }
        self.watchers.push(watcher);
        true
    }
}

/// Process-wide watch list, optionally mirrored to a [`StateBackend`].
pub struct WatchStore {
    inner: Mutex<StoreState>,
}

struct StoreState {
    resources: Vec<WatchedResource>,
    backend: Option<Arc<dyn StateBackend>>,

    /// Set when the in-memory list is ahead of the durable copy.
    pending_flush: bool,
}

/// Exclusive access to the watch list.  The lock is released when the guard is dropped.
pub struct WatchStoreGuard<'a> {
    state: MutexGuard<'a, StoreState>,
}

impl WatchStore {
    /// Purely in-memory store; contents are lost when the process exits.
    pub fn in_memory() -> Self {
        Self::from_parts(Vec::new(), None)
    }

    /// Loads whatever the backend has persisted and keeps it in sync from then on.
    pub async fn open(backend: Arc<dyn StateBackend>) -> Result<Self, StoreError> {
        let loaded = backend.load().await?;
        let resources = repair_loaded(loaded);
        debug!("Loaded {} watched resource(s) from state", resources.len());
        Ok(Self::from_parts(resources, Some(backend)))
    }

    fn from_parts(resources: Vec<WatchedResource>, backend: Option<Arc<dyn StateBackend>>) -> Self {
        Self {
            inner: Mutex::new(StoreState {
                resources,
                backend,
                pending_flush: false,
            }),
        }
    }

    /// Enter the critical section.  Hold the guard across the whole snapshot, compute and
    /// write-back sequence, but never across network I/O.
    pub async fn lock(&self) -> WatchStoreGuard<'_> {
        WatchStoreGuard {
            state: self.inner.lock().await,
        }
    }

    /// Full copy of the current watch list.
    pub async fn snapshot(&self) -> Vec<WatchedResource> {
        self.lock().await.resources().to_vec()
    }

    /// Convenience wrapper acquiring the lock just for a single [`WatchStoreGuard::replace`].
    pub async fn replace(&self, resources: Vec<WatchedResource>) -> Result<(), StoreError> {
        self.lock().await.replace(resources).await
    }

    pub async fn get(&self, url: &str) -> Option<WatchedResource> {
        self.lock().await.find(url).cloned()
    }

    pub async fn len(&self) -> usize {
        self.lock().await.resources().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Bring a persisted list back in line with the store invariants: one record per URL,
/// watchers without duplicates, and no record without watchers.  Records sharing a URL are
/// merged in order, keeping the first record's value.
fn repair_loaded(loaded: Vec<WatchedResource>) -> Vec<WatchedResource> {
    let mut resources: Vec<WatchedResource> = Vec::with_capacity(loaded.len());
    for record in loaded {
        let position = resources.iter().position(|r| r.url == record.url);
        let target = match position {
            Some(index) => {
                warn!("Merging duplicate state record for {}", record.url);
                &mut resources[index]
            }
            None => {
                resources.push(WatchedResource {
                    url: record.url.clone(),
                    last_value: record.last_value.clone(),
                    watchers: Vec::new(),
                });
                let last = resources.len() - 1;
                &mut resources[last]
            }
        };
        for watcher in record.watchers {
            if !target.add_watcher(watcher) {
                warn!("Dropping duplicate watcher {watcher} of {}", target.url);
            }
        }
    }
    resources.retain(|r| {
        if r.watchers.is_empty() {
            warn!("Dropping state record for {} with no watchers", r.url);
        }
        !r.watchers.is_empty()
    });
    resources
}

impl WatchStoreGuard<'_> {
    pub fn resources(&self) -> &[WatchedResource] {
        &self.state.resources
    }

    pub fn find(&self, url: &str) -> Option<&WatchedResource> {
        self.state.resources.iter().find(|r| r.url == url)
    }

    /// Swap in a whole new watch list, all-or-nothing: the durable copy is written first and
    /// the in-memory list only changes once that succeeded.
    pub async fn replace(&mut self, resources: Vec<WatchedResource>) -> Result<(), StoreError> {
        if let Some(backend) = &self.state.backend {
            backend.save(&resources).await?;
        }
        self.state.resources = resources;
        self.state.pending_flush = false;
        Ok(())
    }

    /// Swap in a new watch list in memory only, deferring the durable write to
    /// [`Self::flush`].  Used where losing the in-memory update would be worse than a stale
    /// durable copy.
    pub fn stage(&mut self, resources: Vec<WatchedResource>) {
        self.state.resources = resources;
        self.state.pending_flush = self.state.backend.is_some();
    }

    pub fn needs_flush(&self) -> bool {
        self.state.pending_flush
    }

    /// Write the current list to the backend if it is ahead of the durable copy.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if !self.state.pending_flush {
            return Ok(());
        }
        if let Some(backend) = &self.state.backend {
            if let Err(e) = backend.save(&self.state.resources).await {
                warn!("Flushing watch list failed, will retry: {e}");
                return Err(e);
            }
        }
        self.state.pending_flush = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::store::{JsonFileBackend, WatchStore, WatchedResource, WatcherId};
    use crate::test_util::FlakyBackend;

    fn resource(url: &str, value: &str, watcher: i64) -> WatchedResource {
        WatchedResource::new(url, Some(value.to_string()), WatcherId(watcher))
    }

    #[test]
    fn test_add_watcher_is_set_like() {
        let mut r = resource("a", "1", 100);
        assert!(r.add_watcher(WatcherId(200)));
        assert!(!r.add_watcher(WatcherId(100)));
        assert_eq!(r.watchers, vec![WatcherId(100), WatcherId(200)]);
    }

    #[tokio::test]
    async fn test_replace_and_snapshot() {
        let store = WatchStore::in_memory();
        assert!(store.is_empty().await);

        store
            .replace(vec![resource("a", "1", 100), resource("b", "2", 100)])
            .await
            .unwrap();

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(store.get("b").await.unwrap().last_value.as_deref(), Some("2"));
        assert!(store.get("c").await.is_none());
    }

    #[tokio::test]
    async fn test_replace_is_all_or_nothing() {
        let backend = Arc::new(FlakyBackend::default());
        let store = WatchStore::open(backend.clone()).await.unwrap();
        store.replace(vec![resource("a", "1", 100)]).await.unwrap();

        backend.set_failing(true);
        let result = store.replace(vec![resource("a", "2", 100)]).await;
        assert!(result.is_err());
        assert_eq!(store.get("a").await.unwrap().last_value.as_deref(), Some("1"));
        assert_eq!(backend.saved().unwrap()[0].last_value.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_stage_then_flush_retries() {
        let backend = Arc::new(FlakyBackend::default());
        let store = WatchStore::open(backend.clone()).await.unwrap();
        backend.set_failing(true);

        let mut guard = store.lock().await;
        guard.stage(vec![resource("a", "1", 100)]);
        assert!(guard.needs_flush());
        assert!(guard.flush().await.is_err());
        assert!(guard.needs_flush());
        assert_eq!(guard.resources().len(), 1);

        backend.set_failing(false);
        guard.flush().await.unwrap();
        assert!(!guard.needs_flush());
        drop(guard);

        assert_eq!(backend.saved().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stage_without_backend_needs_no_flush() {
        let store = WatchStore::in_memory();
        let mut guard = store.lock().await;
        guard.stage(vec![resource("a", "1", 100)]);
        assert!(!guard.needs_flush());
    }

    #[tokio::test]
    async fn test_open_repairs_inconsistent_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"[
                {"url": "a", "lastValue": "1", "watchers": [100, 100]},
                {"url": "a", "lastValue": "5", "watchers": [200, 100]},
                {"url": "b", "lastValue": "1", "watchers": []},
                {"url": "c", "lastValue": null, "watchers": [300]}
            ]"#,
        )
        .unwrap();

        let store = WatchStore::open(Arc::new(JsonFileBackend::new(&path))).await.unwrap();
        assert_eq!(
            store.snapshot().await,
            vec![
                WatchedResource {
                    url: "a".into(),
                    last_value: Some("1".into()),
                    watchers: vec![WatcherId(100), WatcherId(200)],
                },
                WatchedResource {
                    url: "c".into(),
                    last_value: None,
                    watchers: vec![WatcherId(300)],
                },
            ]
        );
    }
}
