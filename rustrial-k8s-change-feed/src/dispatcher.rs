use std::{
    collections::{BTreeSet, HashMap},
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use futures::{FutureExt, future::BoxFuture};
use tokio::time::{Instant, sleep_until};

use crate::{
    events::{ChangeEvent, Notification, ResourceIdentity},
    metrics::FeedMetrics,
    queue::EventQueue,
};

/// Debounce window of kinds without a registered one.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

/// The consumer of settled changes. Returning an error (or panicking) marks
/// the notification as not delivered.
pub type ChangeCallback =
    Arc<dyn Fn(Notification) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async function into a [`ChangeCallback`].
pub fn callback<F, Fut>(f: F) -> ChangeCallback
where
    F: Fn(Notification) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |n| f(n).boxed())
}

/// Debounce window per resource kind, written when a kind is started and
/// read by the dispatcher.
#[derive(Clone, Default)]
pub(crate) struct DebounceWindows {
    windows: Arc<RwLock<HashMap<String, Duration>>>,
}

impl DebounceWindows {
    pub(crate) fn insert(&self, kind: &str, window: Duration) {
        self.windows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.to_string(), window);
    }

    pub(crate) fn remove(&self, kind: &str) {
        self.windows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(kind);
    }

    pub(crate) fn contains(&self, kind: &str) -> bool {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(kind)
    }

    fn get(&self, kind: &str) -> Duration {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .copied()
            .unwrap_or(DEFAULT_DEBOUNCE)
    }
}

/// Latest unsettled change of one identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingUpdate {
    pub identity: ResourceIdentity,
    /// `None` if the latest change was a deletion.
    pub resource_version: Option<String>,
    /// Receipt time of the first change since the last dispatch. Never
    /// refreshed, so a continuously changing object is still dispatched.
    pub first_seen_at: Instant,
    pub due_at: Instant,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// Nothing pending.
    Idle,
    /// The earliest pending update settles at the given instant.
    WaitUntil(Instant),
    /// This update has settled and was removed from the pending set.
    Ready(PendingUpdate),
}

/// Folds change events into one pending update per identity and tracks the
/// version last delivered per identity.
pub(crate) struct Coalescer {
    windows: DebounceWindows,
    pending: HashMap<ResourceIdentity, PendingUpdate>,
    /// Pending identities ordered by due time, then identity.
    schedule: BTreeSet<(Instant, ResourceIdentity)>,
    dispatched: HashMap<ResourceIdentity, String>,
}

impl Coalescer {
    pub(crate) fn new(windows: DebounceWindows) -> Self {
        Self {
            windows,
            pending: Default::default(),
            schedule: Default::default(),
            dispatched: Default::default(),
        }
    }

    fn schedule(&mut self, update: PendingUpdate) {
        self.schedule
            .insert((update.due_at, update.identity.clone()));
        self.pending.insert(update.identity.clone(), update);
    }

    pub(crate) fn ingest(&mut self, event: ChangeEvent) {
        let identity = event.identity();
        let resource_version = event.version_or_none().map(|v| v.to_string());
        if let Some(pending) = self.pending.get_mut(&identity) {
            pending.resource_version = resource_version;
            return;
        }
        let window = self.windows.get(event.resource_kind.as_str());
        self.schedule(PendingUpdate {
            identity,
            resource_version,
            first_seen_at: event.observed_at,
            due_at: event.observed_at + window,
        });
    }

    pub(crate) fn poll(&mut self, now: Instant) -> Step {
        let due_at = match self.schedule.first() {
            Some((due_at, _)) => *due_at,
            None => return Step::Idle,
        };
        if due_at > now {
            return Step::WaitUntil(due_at);
        }
        match self
            .schedule
            .pop_first()
            .and_then(|(_, identity)| self.pending.remove(&identity))
        {
            Some(update) => Step::Ready(update),
            None => Step::Idle,
        }
    }

    /// The notification to deliver for a settled update, `None` if its
    /// version has already been delivered.
    pub(crate) fn resolve(&self, update: &PendingUpdate) -> Option<Notification> {
        let previous_version = self.dispatched.get(&update.identity).cloned();
        if previous_version == update.resource_version {
            return None;
        }
        Some(Notification {
            identity: update.identity.clone(),
            new_version: update.resource_version.clone(),
            previous_version,
        })
    }

    /// Record a successful delivery.
    pub(crate) fn complete(&mut self, notification: &Notification) {
        match &notification.new_version {
            Some(v) => {
                self.dispatched
                    .insert(notification.identity.clone(), v.clone());
            }
            None => {
                self.dispatched.remove(&notification.identity);
            }
        }
    }

    /// Put a failed update back, unless a newer change of the same identity
    /// is pending already.
    pub(crate) fn retry(&mut self, mut update: PendingUpdate, now: Instant, delay: Duration) {
        if self.pending.contains_key(&update.identity) {
            return;
        }
        update.first_seen_at = now;
        update.due_at = now + delay;
        self.schedule(update);
    }

    #[cfg(test)]
    pub(crate) fn dispatched_version(&self, identity: &ResourceIdentity) -> Option<&str> {
        self.dispatched.get(identity).map(|v| v.as_str())
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// The single asynchronous consumer of the [`EventQueue`] and the only
/// caller of the [`ChangeCallback`].
pub(crate) struct Dispatcher {
    queue: EventQueue,
    coalescer: Coalescer,
    callback: ChangeCallback,
    callback_retry: Option<Duration>,
    metrics: FeedMetrics,
}

impl Dispatcher {
    pub(crate) fn new(
        queue: EventQueue,
        windows: DebounceWindows,
        callback: ChangeCallback,
        callback_retry: Option<Duration>,
        metrics: FeedMetrics,
    ) -> Self {
        Self {
            queue,
            coalescer: Coalescer::new(windows),
            callback,
            callback_retry,
            metrics,
        }
    }

    fn drain(&mut self) {
        while let Some(event) = self.queue.get() {
            self.coalescer.ingest(event);
        }
    }

    async fn dispatch(&mut self, update: PendingUpdate) {
        let kind = update.identity.resource_kind.clone();
        let notification = match self.coalescer.resolve(&update) {
            Some(n) => n,
            None => {
                debug!(
                    "{} is unchanged at version {:?}, skipping",
                    update.identity, update.resource_version
                );
                self.metrics.duplicate_dropped(&kind);
                return;
            }
        };
        let callback = self.callback.clone();
        let call = {
            let notification = notification.clone();
            async move { callback(notification).await }
        };
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => {
                debug!(
                    "dispatched {} {:?} -> {:?}",
                    notification.identity,
                    notification.previous_version,
                    notification.new_version
                );
                self.coalescer.complete(&notification);
                self.metrics.notification_dispatched(&kind);
            }
            Ok(Err(e)) => {
                error!("callback failed for {}: {:#}", notification.identity, e);
                self.failed(update);
            }
            Err(_) => {
                error!("callback panicked for {}", notification.identity);
                self.failed(update);
            }
        }
    }

    fn failed(&mut self, update: PendingUpdate) {
        self.metrics
            .callback_failure(update.identity.resource_kind.as_str());
        if let Some(delay) = self.callback_retry {
            debug!("retrying {} in {:?}", update.identity, delay);
            self.coalescer.retry(update, Instant::now(), delay);
        }
    }

    /// Dispatch settled updates until the queue is closed and everything
    /// pending has been dispatched.
    pub(crate) async fn run(mut self) {
        loop {
            self.drain();
            match self.coalescer.poll(Instant::now()) {
                Step::Idle => match self.queue.next().await {
                    Some(event) => self.coalescer.ingest(event),
                    None => {
                        info!("event queue closed, stopping dispatcher");
                        return;
                    }
                },
                Step::WaitUntil(due_at) if self.queue.is_closed() => sleep_until(due_at).await,
                // An event arriving meanwhile may settle earlier, e.g. of a
                // kind with a shorter window.
                Step::WaitUntil(due_at) => tokio::select! {
                    _ = sleep_until(due_at) => (),
                    event = self.queue.next() => {
                        if let Some(event) = event {
                            self.coalescer.ingest(event);
                        }
                    }
                },
                Step::Ready(update) => self.dispatch(update).await,
            }
        }
    }
}
