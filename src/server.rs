use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::extract::{Extractor, HttpExtractor};
use crate::notify::{MessageTemplate, Notifier};
use crate::poller::{PollParameters, Poller};
use crate::registration::RegistrationHandler;
use crate::store::{JsonFileBackend, StateBackend, StoreError, WatchStore};

/// Primary API tying the watch list, the polling loop and the registration entry point
/// together.  Construct with [`WatchService::builder`], hand out
/// [`WatchService::registration_handler`] to the chat layer, then [`WatchService::serve`].
pub struct WatchService {
    store: Arc<WatchStore>,
    poller: Poller,
    registration: RegistrationHandler,
}

/// Builder API to configure the collaborators and timing of a [`WatchService`].
pub struct WatchServiceBuilder {
    extractor: Option<Arc<dyn Extractor>>,
    notifier: Option<Arc<dyn Notifier>>,
    backend: Option<Arc<dyn StateBackend>>,
    value_pattern: Option<String>,
    parameters: PollParameters,
    template: MessageTemplate,
}

impl Default for WatchServiceBuilder {
    fn default() -> Self {
        Self {
            extractor: None,
            notifier: None,
            backend: None,
            value_pattern: None,
            parameters: PollParameters::default(),
            template: MessageTemplate::default(),
        }
    }
}

impl WatchServiceBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Apply every setting from a loaded [`WatchConfig`].
    pub fn config(mut self, config: &WatchConfig) -> Result<Self, FatalServiceError> {
        self.parameters = config.poll_parameters()?;
        self.template = config.message_template();
        self.value_pattern = Some(config.value_pattern.clone());
        if let Some(path) = &config.state_file {
            self = self.state_file(path.clone());
        }
        Ok(self)
    }

    /// Use a custom extractor.  Defaults to an [`HttpExtractor`] built from the configured
    /// value pattern.
    pub fn extractor<E: Extractor>(mut self, extractor: Arc<E>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Required: where change messages go.
    pub fn notifier<N: Notifier>(mut self, notifier: Arc<N>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Persist the watch list as JSON at `path`, loading it on build.
    pub fn state_file(self, path: impl Into<PathBuf>) -> Self {
        self.state_backend(Arc::new(JsonFileBackend::new(path)))
    }

    pub fn state_backend<B: StateBackend>(mut self, backend: Arc<B>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn parameters(mut self, parameters: PollParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// See [`MessageTemplate::milestone`].
    pub fn milestone(mut self, value: impl Into<String>, text: impl Into<String>) -> Self {
        self.template = self.template.milestone(value, text);
        self
    }

    pub async fn build(self) -> Result<WatchService, FatalServiceError> {
        let notifier = self.notifier.ok_or(FatalServiceError::Missing("notifier"))?;
        let extractor: Arc<dyn Extractor> = match self.extractor {
            Some(extractor) => extractor,
            None => {
                let extractor = match &self.value_pattern {
                    Some(pattern) => HttpExtractor::with_pattern(pattern)?,
                    None => HttpExtractor::new()?,
                };
                Arc::new(extractor)
            }
        };
        let store = match self.backend {
            Some(backend) => WatchStore::open(backend).await?,
            None => WatchStore::in_memory(),
        };
        let store = Arc::new(store);

        let registration = RegistrationHandler::new(
            store.clone(),
            extractor.clone(),
            self.parameters.fetch_timeout(),
        );
        let poller = Poller::new(
            store.clone(),
            extractor,
            notifier,
            self.template,
            self.parameters,
        );
        Ok(WatchService {
            store,
            poller,
            registration,
        })
    }
}

impl WatchService {
    pub fn builder() -> WatchServiceBuilder {
        WatchServiceBuilder::new()
    }

    /// Cheap handle for the conversational layer; may be cloned freely and used concurrently
    /// with [`Self::serve`].
    pub fn registration_handler(&self) -> RegistrationHandler {
        self.registration.clone()
    }

    pub fn store(&self) -> Arc<WatchStore> {
        self.store.clone()
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    /// Run the polling loop until `shutdown` is cancelled, then make a last attempt at
    /// flushing any watch list changes the durable copy has not seen yet.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), FatalServiceError> {
        let watched = self.store.len().await;
        info!(
            "Watching {watched} resource(s) every {:?}",
            self.poller.parameters().interval()
        );
        self.poller.clone().run(shutdown).await;

        let mut guard = self.store.lock().await;
        if guard.needs_flush() {
            debug!("Flushing watch list before exit");
            guard.flush().await?;
        }
        Ok(())
    }
}

/// Fatal error preventing the service from starting or shutting down cleanly.  Failures
/// while running (unreachable pages, undeliverable messages, failed writes) are never fatal.
#[derive(thiserror::Error, Debug)]
pub enum FatalServiceError {
    #[error("missing required {0}")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("invalid setup: {0:#}")]
    Setup(#[from] anyhow::Error),

    #[error("watch list unavailable: {0}")]
    Store(#[from] StoreError),
}
