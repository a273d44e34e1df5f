use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Meter},
};

const CHANGE_FEED: &'static str = "change_feed";

pub(crate) fn metric_name(name: &str) -> String {
    format!("change_feed_{}", name)
}

/// Counters shared by all watch sessions and the dispatcher. Recording is a
/// no-op until a meter provider has been installed.
#[derive(Clone)]
pub(crate) struct FeedMetrics {
    events_enqueued: Counter<u64>,
    reconnects: Counter<u64>,
    resyncs: Counter<u64>,
    malformed_events: Counter<u64>,
    notifications_dispatched: Counter<u64>,
    duplicates_dropped: Counter<u64>,
    callback_failures: Counter<u64>,
}

impl FeedMetrics {
    pub fn new() -> Self {
        let meter: Meter = global::meter(CHANGE_FEED);
        let counter = |name: &str, description: &'static str| {
            meter
                .u64_counter(metric_name(name))
                .with_description(description)
                .build()
        };
        Self {
            events_enqueued: counter(
                "events_enqueued",
                "Count of change events put into the event queue",
            ),
            reconnects: counter(
                "reconnects",
                "Count of watch reconnects after transport failures or closed watches",
            ),
            resyncs: counter(
                "resyncs",
                "Count of full resyncs caused by expired resource versions",
            ),
            malformed_events: counter(
                "malformed_events",
                "Count of dropped watch events which could not be decoded",
            ),
            notifications_dispatched: counter(
                "notifications_dispatched",
                "Count of notifications delivered to the consumer callback",
            ),
            duplicates_dropped: counter(
                "duplicates_dropped",
                "Count of settled updates dropped because their version was already delivered",
            ),
            callback_failures: counter(
                "callback_failures",
                "Count of consumer callback invocations which failed",
            ),
        }
    }

    fn labels(kind: &str) -> [KeyValue; 1] {
        [KeyValue::new("kind", kind.to_string())]
    }

    pub fn event_enqueued(&self, kind: &str) {
        self.events_enqueued.add(1, &Self::labels(kind));
    }

    pub fn reconnect(&self, kind: &str) {
        self.reconnects.add(1, &Self::labels(kind));
    }

    pub fn resync(&self, kind: &str) {
        self.resyncs.add(1, &Self::labels(kind));
    }

    pub fn malformed_event(&self, kind: &str) {
        self.malformed_events.add(1, &Self::labels(kind));
    }

    pub fn notification_dispatched(&self, kind: &str) {
        self.notifications_dispatched.add(1, &Self::labels(kind));
    }

    pub fn duplicate_dropped(&self, kind: &str) {
        self.duplicates_dropped.add(1, &Self::labels(kind));
    }

    pub fn callback_failure(&self, kind: &str) {
        self.callback_failures.add(1, &Self::labels(kind));
    }
}
