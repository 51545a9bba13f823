use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::{stream, StreamExt};
use log::{debug, info, warn};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;

use crate::extract::{fetch_with_timeout, ExtractionError, Extractor};
use crate::notify::{MessageTemplate, Notification, Notifier};
use crate::store::{WatchStore, WatchedResource};

/// Periodically re-reads every watched page and tells watchers about changed values.
#[derive(Clone)]
pub struct Poller {
    store: Arc<WatchStore>,
    extractor: Arc<dyn Extractor>,
    notifier: Arc<dyn Notifier>,
    template: Arc<MessageTemplate>,
    parameters: PollParameters,
}

#[derive(Debug, Clone, Copy)]
pub struct PollParameters {
    interval: Duration,
    fetch_timeout: Duration,
    max_concurrent_fetches: usize,
}

/// What happened during one [`Poller::tick`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Entries in the snapshot taken at the start of the tick.
    pub checked: usize,
    pub changed: usize,

    /// Entries whose value could not be obtained and were left untouched.
    pub failed: usize,

    /// True if the in-memory watch list was updated.
    pub store_written: bool,

    /// True if the durable copy could not be brought up to date; retried next tick.
    pub flush_failed: bool,

    pub delivered: usize,
    pub undelivered: usize,
}

impl Default for PollParameters {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(10),
            max_concurrent_fetches: 4,
        }
    }
}

impl PollParameters {
    pub fn new(
        interval: Duration,
        fetch_timeout: Duration,
        max_concurrent_fetches: usize,
    ) -> anyhow::Result<Self> {
        if interval.is_zero() {
            return Err(anyhow!("Invalid interval={interval:?}"));
        }
        if fetch_timeout.is_zero() {
            return Err(anyhow!("Invalid fetch_timeout={fetch_timeout:?}"));
        }
        if max_concurrent_fetches == 0 {
            return Err(anyhow!(
                "Invalid max_concurrent_fetches={max_concurrent_fetches}"
            ));
        }
        Ok(Self {
            interval,
            fetch_timeout,
            max_concurrent_fetches,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Upper bound for any single outbound call made on behalf of a tick, fetches and
    /// notification sends alike.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_concurrent_fetches
    }
}

impl Poller {
    pub fn new(
        store: Arc<WatchStore>,
        extractor: Arc<dyn Extractor>,
        notifier: Arc<dyn Notifier>,
        template: MessageTemplate,
        parameters: PollParameters,
    ) -> Self {
        Self {
            store,
            extractor,
            notifier,
            template: Arc::new(template),
            parameters,
        }
    }

    pub fn parameters(&self) -> &PollParameters {
        &self.parameters
    }

    /// Tick forever at the configured interval until `shutdown` is cancelled.  The first tick
    /// happens one interval after start.  A tick in progress is always allowed to finish.
    pub async fn run(self, shutdown: CancellationToken) {
        let period = self.parameters.interval;
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let ticks = IntervalStream::new(interval).take_until(shutdown.cancelled());
        tokio::pin!(ticks);
        while ticks.next().await.is_some() {
            let report = self.tick().await;
            if report.changed > 0 || report.flush_failed {
                info!("Tick complete: {report:?}");
            } else {
                debug!("Tick complete: {report:?}");
            }
        }
        debug!("Poller stopped");
    }

    /// Run a single polling cycle.  Fetches happen outside the store lock; the lock is then
    /// held for the whole compute and write-back step, and released before any notification
    /// goes out.
    pub async fn tick(&self) -> TickReport {
        let snapshot = self.store.snapshot().await;
        let mut report = TickReport {
            checked: snapshot.len(),
            ..Default::default()
        };

        let observed = self.fetch_all(snapshot).await;
        let notifications = self.reconcile(observed, &mut report).await;
        self.dispatch(notifications, &mut report).await;
        report
    }

    async fn fetch_all(
        &self,
        snapshot: Vec<WatchedResource>,
    ) -> Vec<(WatchedResource, Result<String, ExtractionError>)> {
        let timeout = self.parameters.fetch_timeout;
        stream::iter(snapshot)
            .map(|seen| async move {
                let result = fetch_with_timeout(self.extractor.as_ref(), &seen.url, timeout).await;
                (seen, result)
            })
            .buffered(self.parameters.max_concurrent_fetches)
            .collect()
            .await
    }

    /// Apply freshly observed values to the current watch list.  Values are compared against
    /// the list as it is now, not as it was when the tick started, so that registrations
    /// that landed while fetches were in flight are kept.  An entry whose value was
    /// refreshed by a registration since the snapshot is left alone: that reading is newer
    /// than ours.
    async fn reconcile(
        &self,
        observed: Vec<(WatchedResource, Result<String, ExtractionError>)>,
        report: &mut TickReport,
    ) -> Vec<Notification> {
        let mut guard = self.store.lock().await;
        let mut resources = guard.resources().to_vec();
        let mut notifications = Vec::new();

        for (seen, result) in observed {
            let url = seen.url;
            let value = match result {
                Ok(value) => value,
                Err(e) => {
                    debug!("No current value for {url}: {e}");
                    report.failed += 1;
                    continue;
                }
            };
            let Some(resource) = resources.iter_mut().find(|r| r.url == url) else {
                continue;
            };
            if resource.last_value != seen.last_value {
                debug!(
                    "{url} was refreshed to {:?} during the tick, discarding {value:?}",
                    resource.last_value
                );
                continue;
            }
            if resource.last_value.as_deref() == Some(value.as_str()) {
                continue;
            }

            info!(
                "{url} changed: {:?} -> {value:?}, notifying {} watcher(s)",
                resource.last_value,
                resource.watchers.len()
            );
            notifications.extend(resource.watchers.iter().map(|&watcher| Notification {
                watcher,
                url: url.clone(),
                value: value.clone(),
            }));
            resource.last_value = Some(value);
            report.changed += 1;
        }

        if report.changed > 0 {
            guard.stage(resources);
            report.store_written = true;
        }
        if guard.needs_flush() && guard.flush().await.is_err() {
            report.flush_failed = true;
        }

        notifications
    }

    async fn dispatch(&self, notifications: Vec<Notification>, report: &mut TickReport) {
        for notification in notifications {
            let text = self.template.render(&notification);
            let sent = time::timeout(
                self.parameters.fetch_timeout,
                self.notifier.send(notification.watcher, &text),
            )
            .await;
            match sent {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    let Notification { watcher, url, .. } = &notification;
                    warn!("Failed to notify {watcher} about {url}: {e}");
                    report.undelivered += 1;
                }
                Err(_) => {
                    let Notification { watcher, url, .. } = &notification;
                    warn!("Timed out notifying {watcher} about {url}");
                    report.undelivered += 1;
                }
            }
        }
    }
}
