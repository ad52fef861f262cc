//! WorkQueue — deduplicating, per-key serialized queue of claim names.
//!
//! A key is in at most one of three places: waiting in `ready`, being
//! processed by a worker, or neither. Adding a key that is already
//! waiting is a no-op; adding one that is being processed marks it
//! dirty, and `done` puts it back. This gives one in-flight evaluation
//! per key while many keys run in parallel.
//!
//! Delayed work is held as explicit deadlines. Nothing sleeps on a
//! per-key timer: `promote_due(now)` moves every key whose deadline has
//! passed into `ready`, which lets tests drive time with a fake clock.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tokio::sync::Notify;
use tracing::trace;

#[derive(Default)]
struct Inner {
    ready: VecDeque<String>,
    queued: HashSet<String>,
    processing: HashSet<String>,
    dirty: HashSet<String>,
    delayed: BTreeSet<(SystemTime, String)>,
    deadlines: HashMap<String, SystemTime>,
    shutdown: bool,
}

impl Inner {
    /// Returns whether a worker should be woken.
    fn enqueue(&mut self, key: &str) -> bool {
        if self.shutdown {
            return false;
        }
        if self.processing.contains(key) {
            self.dirty.insert(key.to_string());
            return false;
        }
        if self.queued.insert(key.to_string()) {
            self.ready.push_back(key.to_string());
            return true;
        }
        false
    }
}

#[derive(Default)]
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `key` ready for processing.
    pub fn add(&self, key: &str) {
        if self.lock().enqueue(key) {
            trace!(%key, "key queued");
            self.notify.notify_one();
        }
    }

    /// Schedule `key` to become ready at `at`. An earlier pending
    /// deadline for the same key wins.
    pub fn add_at(&self, key: &str, at: SystemTime) {
        let mut inner = self.lock();
        if inner.shutdown {
            return;
        }
        if let Some(existing) = inner.deadlines.get(key).copied() {
            if existing <= at {
                return;
            }
            inner.delayed.remove(&(existing, key.to_string()));
        }
        inner.deadlines.insert(key.to_string(), at);
        inner.delayed.insert((at, key.to_string()));
    }

    /// Move every key whose deadline is at or before `now` into `ready`.
    /// Returns how many were promoted.
    pub fn promote_due(&self, now: SystemTime) -> usize {
        let mut inner = self.lock();
        let mut woken = 0;
        let mut promoted = 0;
        while let Some((at, key)) = inner.delayed.first().cloned() {
            if at > now {
                break;
            }
            inner.delayed.pop_first();
            inner.deadlines.remove(&key);
            promoted += 1;
            if inner.enqueue(&key) {
                woken += 1;
            }
        }
        drop(inner);
        for _ in 0..woken {
            self.notify.notify_one();
        }
        promoted
    }

    /// Wait for the next ready key. Returns `None` once shut down.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if inner.shutdown {
                    return None;
                }
                if let Some(key) = inner.ready.pop_front() {
                    inner.queued.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Finish processing `key`. Re-queues it if it was added meanwhile.
    pub fn done(&self, key: &str) {
        let wake = {
            let mut inner = self.lock();
            inner.processing.remove(key);
            inner.dirty.remove(key) && inner.enqueue(key)
        };
        if wake {
            self.notify.notify_one();
        }
    }

    /// Drop any pending deadline for `key`.
    pub fn forget(&self, key: &str) {
        let mut inner = self.lock();
        if let Some(at) = inner.deadlines.remove(key) {
            inner.delayed.remove(&(at, key.to_string()));
        }
    }

    /// Stop handing out keys and wake every waiting worker.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.notify.notify_waiters();
    }

    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn delayed_len(&self) -> usize {
        self.lock().delayed.len()
    }

    /// Pending deadline for `key`, if any.
    pub fn deadline(&self, key: &str) -> Option<SystemTime> {
        self.lock().deadlines.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn duplicate_adds_collapse() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.add("a");
        queue.add("b");
        assert_eq!(queue.ready_len(), 2);

        assert_eq!(queue.get().await.as_deref(), Some("a"));
        assert_eq!(queue.get().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn key_added_while_processing_runs_again_after_done() {
        let queue = WorkQueue::new();
        queue.add("a");
        let key = queue.get().await.unwrap();

        queue.add("a");
        assert_eq!(queue.ready_len(), 0, "in-flight key must not be handed out twice");

        queue.done(&key);
        assert_eq!(queue.ready_len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("a"));
    }

    #[test]
    fn earliest_deadline_wins_and_promotes_on_time() {
        let queue = WorkQueue::new();
        queue.add_at("a", at(100));
        queue.add_at("a", at(50));
        queue.add_at("a", at(200));
        assert_eq!(queue.deadline("a"), Some(at(50)));
        assert_eq!(queue.delayed_len(), 1);

        assert_eq!(queue.promote_due(at(49)), 0);
        assert_eq!(queue.promote_due(at(50)), 1);
        assert_eq!(queue.ready_len(), 1);
        assert_eq!(queue.deadline("a"), None);
    }

    #[test]
    fn forget_drops_deadline() {
        let queue = WorkQueue::new();
        queue.add_at("a", at(10));
        queue.forget("a");
        assert_eq!(queue.promote_due(at(100)), 0);
        assert_eq!(queue.ready_len(), 0);
    }

    #[tokio::test]
    async fn shutdown_releases_waiting_workers() {
        let queue = Arc::new(WorkQueue::new());
        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.shutdown();
        assert_eq!(worker.await.unwrap(), None);

        queue.add("late");
        assert_eq!(queue.ready_len(), 0);
    }
}
