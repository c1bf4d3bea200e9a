//! Delay queue of subaccount IDs
//!
//! FIFO work queue with optional delayed enqueue and at-most-once
//! in-flight semantics: a `get` for an ID cannot succeed again until
//! `done` was called for the previous one. An add that races with an
//! in-flight ID is remembered and re-queued on `done`, so an ID is never
//! queued, delayed and in flight at the same time.
//!
//! Internally one mutex guards a ready FIFO plus a heap of delayed items;
//! waiting getters are woken through a `Notify`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::observability::KmcMetrics;

#[derive(Debug, PartialEq, Eq)]
struct DelayedItem {
    ready_at: Instant,
    id: String,
}

impl Ord for DelayedItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ready_at
            .cmp(&other.ready_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for DelayedItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<String>,
    delayed: BinaryHeap<Reverse<DelayedItem>>,
    /// IDs currently in `ready` or `delayed`.
    queued: HashSet<String>,
    /// IDs handed to a worker and not yet done.
    processing: HashSet<String>,
    /// IDs added while in flight; re-queued on `done`.
    dirty: HashSet<String>,
    added_at: HashMap<String, Instant>,
    started_at: HashMap<String, Instant>,
}

impl Inner {
    /// Move everything whose delay has elapsed into the ready FIFO. Queue
    /// latency counts from here, not from scheduling, so the configured
    /// delay does not inflate the metric.
    fn promote_delayed(&mut self, now: Instant) {
        while let Some(Reverse(item)) = self.delayed.peek() {
            if item.ready_at > now {
                break;
            }

            let Reverse(item) = self.delayed.pop().expect("peeked item vanished");
            self.added_at.insert(item.id.clone(), now);
            self.ready.push_back(item.id);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.peek().map(|Reverse(item)| item.ready_at)
    }
}

/// Delay queue with workqueue-style metrics.
pub struct DelayQueue {
    name: String,
    inner: Mutex<Inner>,
    notify: Notify,
    metrics: KmcMetrics,
}

impl DelayQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            metrics: KmcMetrics::new(),
        }
    }

    /// Enqueue now. Suppressed when the ID is already queued or delayed;
    /// remembered for re-queueing when the ID is in flight.
    pub fn add(&self, id: &str) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        self.enqueue(&mut inner, id);
        self.record_gauges(&inner);
    }

    /// Enqueue after `delay`. Duplicate suppression is the same as [`add`].
    ///
    /// [`add`]: DelayQueue::add
    pub fn add_after(&self, id: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(id);
            return;
        }

        let mut inner = self.inner.lock().expect("queue lock poisoned");

        if inner.processing.contains(id) {
            inner.dirty.insert(id.to_string());
        } else if !inner.queued.contains(id) {
            inner.queued.insert(id.to_string());
            inner.delayed.push(Reverse(DelayedItem {
                ready_at: Instant::now() + delay,
                id: id.to_string(),
            }));
            self.metrics.inc_queue_adds(&self.name);
            self.metrics.inc_queue_retries(&self.name);
            self.notify.notify_one();
        }

        self.record_gauges(&inner);
    }

    /// Block until an item is ready and mark it in flight.
    pub async fn get(&self) -> String {
        loop {
            let deadline = {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                let now = Instant::now();
                inner.promote_delayed(now);

                if let Some(id) = inner.ready.pop_front() {
                    inner.queued.remove(&id);
                    inner.processing.insert(id.clone());
                    inner.started_at.insert(id.clone(), now);

                    if let Some(added) = inner.added_at.remove(&id) {
                        self.metrics
                            .observe_queue_latency(&self.name, (now - added).as_secs_f64());
                    }

                    // Notify stores a single permit; pass the wakeup on so
                    // a second waiter is not lost when adds raced.
                    if !inner.ready.is_empty() {
                        self.notify.notify_one();
                    }

                    self.record_gauges(&inner);

                    return id;
                }

                inner.next_deadline()
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Release an in-flight item. If it was re-added while processing it is
    /// put back on the ready FIFO.
    pub fn done(&self, id: &str) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");

        if inner.processing.remove(id) {
            if let Some(started) = inner.started_at.remove(id) {
                self.metrics
                    .observe_queue_work_duration(&self.name, started.elapsed().as_secs_f64());
            }
        }

        if inner.dirty.remove(id) {
            self.enqueue(&mut inner, id);
        }

        self.record_gauges(&inner);
    }

    /// Number of items ready to be handed out.
    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.promote_delayed(Instant::now());
        inner.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn enqueue(&self, inner: &mut Inner, id: &str) {
        if inner.processing.contains(id) {
            inner.dirty.insert(id.to_string());
            return;
        }

        if inner.queued.contains(id) {
            return;
        }

        inner.queued.insert(id.to_string());
        inner.added_at.insert(id.to_string(), Instant::now());
        inner.ready.push_back(id.to_string());
        self.metrics.inc_queue_adds(&self.name);
        self.notify.notify_one();
    }

    fn record_gauges(&self, inner: &Inner) {
        self.metrics
            .set_queue_depth(&self.name, inner.ready.len() as i64);

        let now = Instant::now();
        let mut unfinished = 0.0f64;
        let mut longest = 0.0f64;
        for started in inner.started_at.values() {
            let running = (now - *started).as_secs_f64();
            unfinished += running;
            longest = longest.max(running);
        }

        self.metrics.set_queue_unfinished_work(&self.name, unfinished);
        self.metrics.set_queue_longest_running(&self.name, longest);
    }
}
