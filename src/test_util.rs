//! In-crate fakes for the external collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::extract::{ExtractionError, Extractor};
use crate::notify::{Notifier, NotifyError};
use crate::store::{StateBackend, StoreError, WatchedResource, WatcherId};

#[derive(Clone)]
enum Script {
    Value(String),
    Fail(ExtractionError),
    Hang,
}

/// Extractor answering from a per-URL script.  Unknown URLs are [`ExtractionError::NotFound`].
#[derive(Default)]
pub struct ScriptedExtractor {
    scripts: Mutex<HashMap<String, Script>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl ScriptedExtractor {
    pub fn set(&self, url: &str, value: &str) {
        self.script(url, Script::Value(value.to_string()));
    }

    pub fn fail(&self, url: &str, error: ExtractionError) {
        self.script(url, Script::Fail(error));
    }

    /// Fetches of `url` never complete.
    pub fn hang(&self, url: &str) {
        self.script(url, Script::Hang);
    }

    /// The next fetch of `url` parks until the returned gate is notified.
    pub fn hold(&self, url: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(url.to_string(), gate.clone());
        gate
    }

    fn script(&self, url: &str, script: Script) {
        self.scripts.lock().unwrap().insert(url.to_string(), script);
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn fetch(&self, url: &str) -> Result<String, ExtractionError> {
        let gate = self.gates.lock().unwrap().remove(url);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let script = self.scripts.lock().unwrap().get(url).cloned();
        match script {
            Some(Script::Value(value)) => Ok(value),
            Some(Script::Fail(e)) => Err(e),
            Some(Script::Hang) => std::future::pending().await,
            None => Err(ExtractionError::NotFound),
        }
    }
}

/// Notifier that records every delivered message, optionally refusing or never answering
/// for some watchers.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(WatcherId, String)>>,
    rejected: Mutex<HashSet<WatcherId>>,
    stalled: Mutex<HashSet<WatcherId>>,
}

impl RecordingNotifier {
    pub fn reject(&self, watcher: WatcherId) {
        self.rejected.lock().unwrap().insert(watcher);
    }

    /// Sends to `watcher` never complete.
    pub fn stall(&self, watcher: WatcherId) {
        self.stalled.lock().unwrap().insert(watcher);
    }

    pub fn sent(&self) -> Vec<(WatcherId, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, watcher: WatcherId, text: &str) -> Result<(), NotifyError> {
        let stalled = self.stalled.lock().unwrap().contains(&watcher);
        if stalled {
            std::future::pending::<()>().await;
        }
        if self.rejected.lock().unwrap().contains(&watcher) {
            return Err(NotifyError::Rejected {
                watcher,
                reason: "chat not found".to_string(),
            });
        }
        self.sent.lock().unwrap().push((watcher, text.to_string()));
        Ok(())
    }
}

/// In-memory state backend that can be switched into a failing mode.
#[derive(Default)]
pub struct FlakyBackend {
    saved: Mutex<Option<Vec<WatchedResource>>>,
    failing: AtomicBool,
    save_count: AtomicUsize,
}

impl FlakyBackend {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Option<Vec<WatchedResource>> {
        self.saved.lock().unwrap().clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateBackend for FlakyBackend {
    async fn load(&self) -> Result<Vec<WatchedResource>, StoreError> {
        Ok(self.saved().unwrap_or_default())
    }

    async fn save(&self, resources: &[WatchedResource]) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk on fire".to_string()));
        }
        *self.saved.lock().unwrap() = Some(resources.to_vec());
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
