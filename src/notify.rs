//! Outgoing change messages and the delivery seam towards the chat transport.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::store::WatcherId;

/// Delivers a text message to one watcher.  Implemented by whatever chat transport the
/// service is embedded into.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send(&self, watcher: WatcherId, text: &str) -> Result<(), NotifyError>;
}

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    /// The transport refused to deliver, e.g. the chat no longer exists.
    #[error("delivery to {watcher} rejected: {reason}")]
    Rejected { watcher: WatcherId, reason: String },

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// One pending message produced by a tick: `watcher` must learn that `url` now reads `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub watcher: WatcherId,
    pub url: String,
    pub value: String,
}

/// Renders change messages.  Specific values can be given a custom text ("milestones"),
/// everything else uses the default `new stars: N` form.
#[derive(Debug, Clone, Default)]
pub struct MessageTemplate {
    milestones: HashMap<String, String>,
}

impl MessageTemplate {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_milestones(milestones: HashMap<String, String>) -> Self {
        Self { milestones }
    }

    /// Send `text` instead of the default message whenever the value becomes exactly `value`.
    pub fn milestone(mut self, value: impl Into<String>, text: impl Into<String>) -> Self {
        self.milestones.insert(value.into(), text.into());
        self
    }

    pub fn render(&self, notification: &Notification) -> String {
        match self.milestones.get(&notification.value) {
            Some(text) => text.clone(),
            None => format!("new stars: {}", notification.value),
        }
    }
}
