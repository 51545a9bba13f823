use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::extract::{fetch_with_timeout, ExtractionError, Extractor};
use crate::store::{StoreError, WatchStore, WatchedResource, WatcherId};

/// Entry point for the conversational layer once a user has handed over a URL to watch.
#[derive(Clone)]
pub struct RegistrationHandler {
    store: Arc<WatchStore>,
    extractor: Arc<dyn Extractor>,
    fetch_timeout: Duration,
}

/// Result of a single [`RegistrationHandler::register`] call.  The `Display` impl is the
/// text meant to be shown to the requesting user.
#[derive(Debug)]
pub enum RegistrationOutcome {
    Registered {
        url: String,
        starting_value: String,

        /// False if the requester was already watching this URL.
        newly_watching: bool,
    },

    /// No value could be read from the page; the store was left alone.
    NoValueFound(ExtractionError),

    /// The watch list could not be written back; the store was left alone.
    StoreFailed(StoreError),
}

impl RegistrationOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered { .. })
    }
}

impl fmt::Display for RegistrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered { starting_value, .. } => {
                write!(f, "Starting stars: {starting_value}\nCorrectly set in watching")
            }
            Self::NoValueFound(_) => {
                write!(f, "can't find stars on page, retry with the stargazer page")
            }
            Self::StoreFailed(_) => write!(f, "something went wrong"),
        }
    }
}

impl RegistrationHandler {
    pub fn new(
        store: Arc<WatchStore>,
        extractor: Arc<dyn Extractor>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            extractor,
            fetch_timeout,
        }
    }

    /// Start (or refresh) `watcher`'s watch on `url`.  The page is fetched before the store
    /// lock is taken; the merge and write-back then happen as one unit.  Never notifies.
    pub async fn register(&self, url: &str, watcher: WatcherId) -> RegistrationOutcome {
        let fetched = fetch_with_timeout(self.extractor.as_ref(), url, self.fetch_timeout).await;
        let value = match fetched {
            Ok(value) => value,
            Err(e) => {
                debug!("Rejecting registration of {url} by {watcher}: {e}");
                return RegistrationOutcome::NoValueFound(e);
            }
        };

        let mut guard = self.store.lock().await;
        let mut resources = guard.resources().to_vec();
        let newly_watching = merge_registration(&mut resources, url, &value, watcher);
        if let Err(e) = guard.replace(resources).await {
            warn!("Unable to save registration of {url} by {watcher}: {e}");
            return RegistrationOutcome::StoreFailed(e);
        }
        drop(guard);

        info!("{watcher} watching {url} (starting value {value:?}, new watcher: {newly_watching})");
        RegistrationOutcome::Registered {
            url: url.to_string(),
            starting_value: value,
            newly_watching,
        }
    }
}

/// Fold one registration into the watch list, deduplicating by exact URL.  The stored value
/// is always overwritten with the freshly fetched one.  Returns true if `watcher` was added.
fn merge_registration(
    resources: &mut Vec<WatchedResource>,
    url: &str,
    value: &str,
    watcher: WatcherId,
) -> bool {
    match resources.iter_mut().find(|r| r.url == url) {
        Some(existing) => {
            existing.last_value = Some(value.to_string());
            existing.add_watcher(watcher)
        }
        None => {
            resources.push(WatchedResource::new(url, Some(value.to_string()), watcher));
            true
        }
    }
}
