use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    cursor::WatchCursor,
    errors::WatchError,
    events::{ChangeEvent, EventKind},
    metrics::FeedMetrics,
    namespace_filter::NamespaceFilter,
    queue::EventQueue,
    remote::{ObjectList, RemoteApi, RemoteEvent, RemoteObject},
};

/// Longest uninterrupted sleep of a backing-off session, so a stop request
/// is noticed reasonably fast.
const PAUSE_SLICE: Duration = Duration::from_millis(100);

/// States of the list+watch protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Full list, then watch from the collection version.
    Listing,
    /// Consume the watch stream from the current cursor.
    Streaming,
    /// Back off, then resume streaming from the unchanged cursor.
    Reconnecting,
    /// The cursor expired, drop it and list again.
    Resyncing,
}

/// Drives the list+watch protocol of one resource kind. Runs on the
/// dedicated thread of its [`WatchSession`].
pub(crate) struct SessionWorker {
    kind: String,
    filter: NamespaceFilter,
    /// Namespace to list and watch directly instead of cluster-wide.
    scope: Option<String>,
    remote: Arc<dyn RemoteApi>,
    queue: EventQueue,
    cursor: WatchCursor,
    /// (namespace, name) -> last reported version of every object reported
    /// and not yet deleted, used to detect deletions missed across a resync.
    known: HashMap<(String, String), String>,
    /// Expired cursors since the last consumed watch event.
    expired_in_a_row: u32,
    reconnect_backoff: Duration,
    stop: Arc<AtomicBool>,
    metrics: FeedMetrics,
}

impl SessionWorker {
    pub(crate) fn new(
        kind: &str,
        filter: NamespaceFilter,
        remote: Arc<dyn RemoteApi>,
        queue: EventQueue,
        reconnect_backoff: Duration,
        metrics: FeedMetrics,
    ) -> Self {
        let scope = filter.single_namespace().map(|v| v.to_string());
        if let Some(ns) = &scope {
            // Optimize for the use-case where exactly one namespace is watched.
            info!("watching {} only in namespace {}", kind, ns);
        } else if filter.is_unrestricted() {
            info!("watching {} in all namespaces", kind);
        } else {
            info!("watching {} in namespaces matching {}", kind, filter);
        }
        Self {
            kind: kind.to_string(),
            cursor: WatchCursor::new(kind, scope.as_deref()),
            filter,
            scope,
            remote,
            queue,
            known: Default::default(),
            expired_in_a_row: 0,
            reconnect_backoff,
            stop: Default::default(),
            metrics,
        }
    }

    pub(crate) fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn enqueue(&self, event_kind: EventKind, object: &RemoteObject) {
        if self.queue.put(ChangeEvent::new(event_kind, &self.kind, object)) {
            self.metrics.event_enqueued(&self.kind);
        }
    }

    /// Sleep for the reconnect backoff, waking up early on stop.
    fn pause(&self) {
        let deadline = Instant::now() + self.reconnect_backoff;
        loop {
            let now = Instant::now();
            if now >= deadline || self.is_stopped() {
                return;
            }
            thread::sleep((deadline - now).min(PAUSE_SLICE));
        }
    }

    /// Report every listed object as [`EventKind::Resync`], every previously
    /// reported object missing from the list as [`EventKind::Deleted`], and
    /// continue from the collection's version.
    pub(crate) fn apply_list(&mut self, list: ObjectList) {
        let mut listed: HashMap<(String, String), String> = Default::default();
        for item in list.items.iter() {
            if !self.filter.matches(item.namespace.as_str()) {
                continue;
            }
            self.enqueue(EventKind::Resync, item);
            listed.insert(
                (item.namespace.clone(), item.name.clone()),
                item.resource_version.clone(),
            );
        }
        let mut vanished: Vec<RemoteObject> = self
            .known
            .drain()
            .filter(|(key, _)| !listed.contains_key(key))
            .map(|((namespace, name), resource_version)| RemoteObject {
                namespace,
                name,
                resource_version,
            })
            .collect();
        vanished.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        for object in vanished.iter() {
            info!(
                "{} {}/{} disappeared while the watch was interrupted",
                self.kind, object.namespace, object.name
            );
            self.enqueue(EventKind::Deleted, object);
        }
        self.known = listed;
        self.cursor.advance(list.resource_version.as_str());
    }

    fn consume(&mut self, event_kind: EventKind, object: RemoteObject) {
        self.expired_in_a_row = 0;
        self.cursor.advance(object.resource_version.as_str());
        if !self.filter.matches(object.namespace.as_str()) {
            return;
        }
        let key = (object.namespace.clone(), object.name.clone());
        if event_kind == EventKind::Deleted {
            self.known.remove(&key);
        } else {
            self.known.insert(key, object.resource_version.clone());
        }
        self.enqueue(event_kind, &object);
    }

    fn recover(&mut self, e: WatchError) -> Phase {
        match e {
            WatchError::Expired(message) => {
                self.expired_in_a_row += 1;
                warn!(
                    "resource version {} expired, resyncing {}: {}",
                    self.cursor.state(),
                    self.kind,
                    message
                );
                self.metrics.resync(&self.kind);
                Phase::Resyncing
            }
            e => {
                warn!(
                    "watch for {} failed, reconnecting from {}: {}",
                    self.kind,
                    self.cursor.state(),
                    e
                );
                self.metrics.reconnect(&self.kind);
                Phase::Reconnecting
            }
        }
    }

    fn stream(&mut self) -> Phase {
        let since = self.cursor.resource_version().to_string();
        let events = match self
            .remote
            .watch(self.kind.as_str(), self.scope.as_deref(), since.as_str())
        {
            Ok(events) => events,
            Err(e) => return self.recover(e),
        };
        debug!("watching {} from {}", self.kind, self.cursor.state());
        for event in events {
            if self.is_stopped() {
                return Phase::Streaming;
            }
            match event {
                Ok(RemoteEvent::Added(o)) => self.consume(EventKind::Added, o),
                Ok(RemoteEvent::Modified(o)) => self.consume(EventKind::Modified, o),
                Ok(RemoteEvent::Deleted(o)) => self.consume(EventKind::Deleted, o),
                Ok(RemoteEvent::Bookmark { resource_version }) => {
                    self.expired_in_a_row = 0;
                    self.cursor.advance(resource_version.as_str())
                }
                Err(WatchError::Malformed(message)) => {
                    warn!("dropping malformed {} event: {}", self.kind, message);
                    self.metrics.malformed_event(&self.kind);
                }
                Err(e) => return self.recover(e),
            }
        }
        // Regular end of a long-running watch (server side timeout).
        debug!(
            "watch for {} closed at {}, reconnecting",
            self.kind,
            self.cursor.state()
        );
        self.metrics.reconnect(&self.kind);
        Phase::Reconnecting
    }

    /// Run a single state transition.
    pub(crate) fn step(&mut self, phase: Phase) -> Phase {
        match phase {
            Phase::Listing => match self.remote.list(self.kind.as_str(), self.scope.as_deref()) {
                Ok(list) => {
                    info!(
                        "listed {} {} objects at resource version {}",
                        list.items.len(),
                        self.kind,
                        list.resource_version
                    );
                    self.apply_list(list);
                    Phase::Streaming
                }
                Err(e) => {
                    warn!("failed to list {}, retrying: {}", self.kind, e);
                    self.pause();
                    Phase::Listing
                }
            },
            Phase::Streaming => self.stream(),
            Phase::Reconnecting => {
                self.pause();
                Phase::Streaming
            }
            Phase::Resyncing => {
                if self.expired_in_a_row > 1 {
                    // The fresh list expired again before anything was consumed.
                    self.pause();
                }
                self.cursor.reset();
                Phase::Listing
            }
        }
    }

    fn run(mut self, mut phase: Phase) {
        while !self.is_stopped() {
            phase = self.step(phase);
        }
        info!("stopped watching {}", self.kind);
    }
}

/// Handle of a watch thread. The thread is never joined, it ends at the
/// next iteration after [`stop`](Self::stop) or with the process.
pub struct WatchSession {
    kind: String,
    stop: Arc<AtomicBool>,
}

impl WatchSession {
    /// Start `worker` in `phase` on a new thread named after its kind.
    pub(crate) fn spawn(worker: SessionWorker, phase: Phase) -> std::io::Result<Self> {
        let kind = worker.kind.clone();
        let stop = worker.stop.clone();
        thread::Builder::new()
            .name(format!("watch-{}", kind))
            .spawn(move || worker.run(phase))?;
        Ok(Self { kind, stop })
    }

    pub fn kind(&self) -> &str {
        self.kind.as_str()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.stop();
    }
}
