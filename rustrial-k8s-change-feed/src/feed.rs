use std::{future::Future, sync::Arc, time::Duration};

use tokio::task::{JoinHandle, spawn_blocking};

use crate::{
    dispatcher::{ChangeCallback, DebounceWindows, Dispatcher, callback},
    errors::{ConfigError, FeedError},
    events::Notification,
    metrics::FeedMetrics,
    namespace_filter::NamespaceFilter,
    queue::EventQueue,
    remote::RemoteApi,
    session::{Phase, SessionWorker, WatchSession},
};

/// Tuning shared by all kinds of a [`ChangeFeed`].
#[derive(Clone, Debug, PartialEq)]
pub struct FeedSettings {
    /// Fixed pause before reconnecting a failed or closed watch.
    pub reconnect_backoff: Duration,
    /// Re-dispatch a notification this long after the callback failed,
    /// `None` gives up after the first failure.
    pub callback_retry: Option<Duration>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(2),
            callback_retry: None,
        }
    }
}

/// Validate a debounce window given in seconds.
pub fn debounce_window(seconds: f64) -> Result<Duration, ConfigError> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(ConfigError::InvalidDebounce(seconds));
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| ConfigError::InvalidDebounce(seconds))
}

/// Watches any number of resource kinds and delivers debounced,
/// deduplicated [`Notification`]s to a single callback.
///
/// Every started kind gets its own [`WatchSession`] thread, all of them
/// feed one [`EventQueue`] drained by one dispatcher task.
pub struct ChangeFeed {
    remote: Arc<dyn RemoteApi>,
    settings: FeedSettings,
    queue: EventQueue,
    windows: DebounceWindows,
    callback: Option<ChangeCallback>,
    sessions: Vec<WatchSession>,
    dispatcher: Option<JoinHandle<()>>,
    metrics: FeedMetrics,
}

impl ChangeFeed {
    pub fn new(remote: Arc<dyn RemoteApi>, settings: FeedSettings) -> Self {
        Self {
            remote,
            settings,
            queue: EventQueue::new(),
            windows: Default::default(),
            callback: None,
            sessions: Default::default(),
            dispatcher: None,
            metrics: FeedMetrics::new(),
        }
    }

    /// Set the consumer of all notifications. Must be called before the
    /// first [`start`](Self::start).
    pub fn register_callback<F, Fut>(&mut self, f: F)
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.dispatcher.is_some() {
            warn!("ignoring callback registered after the change feed was started");
            return;
        }
        self.callback = Some(callback(f));
    }

    /// Start watching `resource_kind` in the namespaces matching
    /// `namespace_patterns` (all namespaces if empty).
    ///
    /// Fails without starting anything on configuration errors and if the
    /// remote API permanently refuses to list the kind. Temporary failures
    /// are retried in the background.
    pub async fn start<S: AsRef<str>>(
        &mut self,
        resource_kind: &str,
        namespace_patterns: &[S],
        debounce_seconds: f64,
    ) -> Result<(), FeedError> {
        let kind = resource_kind.trim();
        if kind.is_empty() {
            return Err(ConfigError::EmptyKind.into());
        }
        if self.windows.contains(kind) {
            return Err(ConfigError::DuplicateKind(kind.to_string()).into());
        }
        let window = debounce_window(debounce_seconds)?;
        let filter = NamespaceFilter::new(namespace_patterns)?;
        let callback = self
            .callback
            .clone()
            .ok_or(ConfigError::MissingCallback)?;

        let mut worker = SessionWorker::new(
            kind,
            filter,
            self.remote.clone(),
            self.queue.clone(),
            self.settings.reconnect_backoff,
            self.metrics.clone(),
        );
        let remote = self.remote.clone();
        let list_kind = kind.to_string();
        let scope = worker.scope().map(|v| v.to_string());
        let initial_list = spawn_blocking(move || remote.list(&list_kind, scope.as_deref())).await?;
        let initial_list = match initial_list {
            Ok(list) => Some(list),
            Err(e) if e.is_permanent() => {
                return Err(FeedError::Remote {
                    kind: kind.to_string(),
                    source: e,
                });
            }
            Err(e) => {
                warn!(
                    "initial list of {} failed, retrying in the background: {}",
                    kind, e
                );
                None
            }
        };

        // Register the window before the first event of this kind is queued.
        self.windows.insert(kind, window);
        let phase = match initial_list {
            Some(list) => {
                info!(
                    "listed {} {} objects at resource version {}",
                    list.items.len(),
                    kind,
                    list.resource_version
                );
                worker.apply_list(list);
                Phase::Streaming
            }
            None => Phase::Listing,
        };
        if self.dispatcher.is_none() {
            let dispatcher = Dispatcher::new(
                self.queue.clone(),
                self.windows.clone(),
                callback,
                self.settings.callback_retry,
                self.metrics.clone(),
            );
            self.dispatcher = Some(tokio::spawn(dispatcher.run()));
        }
        self.launch(kind, WatchSession::spawn(worker, phase))?;
        info!("started change feed for {} with debounce {:?}", kind, window);
        Ok(())
    }

    fn launch(
        &mut self,
        kind: &str,
        spawned: std::io::Result<WatchSession>,
    ) -> Result<(), FeedError> {
        match spawned {
            Ok(session) => {
                self.sessions.push(session);
                Ok(())
            }
            Err(e) => {
                error!("failed to spawn the watch thread for {}: {}", kind, e);
                // Not started, a later start of the kind must not be a duplicate.
                self.windows.remove(kind);
                Err(e.into())
            }
        }
    }

    /// The kinds watched so far.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.sessions.iter().map(|s| s.kind())
    }

    fn stop_sessions(&mut self) {
        for session in self.sessions.drain(..) {
            session.stop();
        }
        self.queue.close();
    }

    /// Stop all watch threads and the dispatcher immediately, pending
    /// notifications are dropped.
    pub fn stop(&mut self) {
        self.stop_sessions();
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
    }

    /// Stop all watch threads and wait until every pending notification has
    /// been dispatched.
    pub async fn shutdown(mut self) {
        self.stop_sessions();
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                error!("dispatcher terminated abnormally: {}", e);
            }
        }
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        if self.dispatcher.is_some() {
            info!("stopping change feed as it is no longer used");
            self.stop();
        }
    }
}
