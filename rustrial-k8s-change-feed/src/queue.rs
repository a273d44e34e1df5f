use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::task::spawn_blocking;

use crate::events::ChangeEvent;

/// Upper bound of a single blocking wait in [`EventQueue::next`]. The wait
/// ends early as soon as an event is put or the queue is closed, this only
/// bounds how long an abandoned waiter occupies a thread of the blocking pool.
const WAIT_SLICE: Duration = Duration::from_secs(1);

#[derive(Default)]
struct State {
    events: VecDeque<ChangeEvent>,
    /// Manual-reset event: set by `put`, cleared by `get` once empty.
    signaled: bool,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // No operation leaves the state half-updated, so a panic while
        // holding the lock cannot corrupt it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block the calling thread until an event was put, the queue got
    /// closed or `timeout` elapsed.
    fn wait(&self, timeout: Duration) {
        let guard = self.lock();
        let _ = self
            .ready
            .wait_timeout_while(guard, timeout, |s| !s.signaled && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// FIFO connecting the blocking watch threads (producers) with the single
/// asynchronous dispatcher (consumer).
///
/// [`put`](Self::put) and [`get`](Self::get) never block and may be called
/// from any thread. [`next`](Self::next) suspends the calling task until an
/// event is available without blocking the async runtime, the actual wait
/// is delegated to tokio's blocking pool.
#[derive(Clone, Default)]
pub struct EventQueue {
    shared: Arc<Shared>,
}

impl EventQueue {
    pub fn new() -> Self {
        Default::default()
    }

    /// Append an event and wake up the consumer. Returns `false` and drops
    /// the event if the queue has been closed.
    pub fn put(&self, event: ChangeEvent) -> bool {
        let mut state = self.shared.lock();
        if state.closed {
            return false;
        }
        state.events.push_back(event);
        state.signaled = true;
        drop(state);
        self.shared.ready.notify_all();
        true
    }

    /// Pop the oldest event, if any.
    pub fn get(&self) -> Option<ChangeEvent> {
        let mut state = self.shared.lock();
        let event = state.events.pop_front();
        if state.events.is_empty() {
            state.signaled = false;
        }
        event
    }

    /// Wait for and pop the oldest event. Returns `None` once the queue is
    /// closed and drained.
    ///
    /// While waiting, one thread of the blocking pool is parked on the queue
    /// and re-armed once per `WAIT_SLICE` (1s) of idleness. Wake-ups on
    /// `put` and `close` are immediate. A cancelled `next` leaves its wait
    /// behind until the next `put`, `close` or the end of the slice.
    pub async fn next(&self) -> Option<ChangeEvent> {
        loop {
            if let Some(event) = self.get() {
                return Some(event);
            }
            if self.is_closed() {
                return None;
            }
            let shared = self.shared.clone();
            if let Err(e) = spawn_blocking(move || shared.wait(WAIT_SLICE)).await {
                // Only happens while the runtime shuts down.
                debug!("event queue wait was cancelled: {}", e);
                return None;
            }
        }
    }

    /// Reject further events and wake up all waiters. Events already queued
    /// can still be taken.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn len(&self) -> usize {
        self.shared.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{events::EventKind, remote::testing::obj};
    use std::{thread, time::Instant};
    use tokio::time::timeout;

    fn event(name: &str, version: &str) -> ChangeEvent {
        ChangeEvent::new(EventKind::Added, "Pod", &obj("default", name, version))
    }

    #[test]
    fn fifo_and_signal() {
        let queue = EventQueue::new();
        assert!(queue.get().is_none());
        assert!(queue.put(event("a", "1")));
        assert!(queue.put(event("b", "2")));
        assert!(queue.shared.lock().signaled);
        assert_eq!(2, queue.len());
        assert_eq!("a", queue.get().unwrap().name);
        assert!(queue.shared.lock().signaled);
        assert_eq!("b", queue.get().unwrap().name);
        assert!(!queue.shared.lock().signaled);
        assert!(queue.is_empty());
    }

    #[test]
    fn closed_queue_rejects_but_drains() {
        let queue = EventQueue::new();
        queue.put(event("a", "1"));
        queue.close();
        assert!(!queue.put(event("b", "2")));
        assert_eq!("a", queue.get().unwrap().name);
        assert!(queue.get().is_none());
    }

    #[test]
    fn wait_returns_early_on_put() {
        let queue = EventQueue::new();
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.put(event("a", "1"));
        });
        let start = Instant::now();
        queue.shared.wait(Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!("a", queue.get().unwrap().name);
    }

    #[tokio::test]
    async fn next_waits_for_producer_thread() {
        let queue = EventQueue::new();
        let producer = queue.clone();
        thread::spawn(move || {
            for i in 0..3 {
                thread::sleep(Duration::from_millis(10));
                producer.put(event(&format!("o{}", i), &i.to_string()));
            }
        });
        for i in 0..3 {
            let e = timeout(Duration::from_secs(5), queue.next())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(format!("o{}", i), e.name);
        }
    }

    #[tokio::test]
    async fn next_ends_when_closed() {
        let queue = EventQueue::new();
        queue.put(event("a", "1"));
        let closer = queue.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });
        assert_eq!("a", queue.next().await.unwrap().name);
        let end = timeout(Duration::from_secs(5), queue.next()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn idle_next_wakes_on_put_not_on_slice() {
        let queue = EventQueue::new();
        let consumer = queue.clone();
        let waiting = tokio::spawn(async move {
            let e = consumer.next().await;
            (e, Instant::now())
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        let put_at = Instant::now();
        queue.put(event("a", "1"));
        let (e, received_at) = timeout(Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!("a", e.unwrap().name);
        assert!(received_at - put_at < WAIT_SLICE / 4);
    }
}
