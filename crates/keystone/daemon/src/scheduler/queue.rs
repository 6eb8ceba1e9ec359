//! Deduplicating work queue
//!
//! A key is held by at most one worker at a time. Adding a key that is
//! already queued is a no-op; adding a key that is being processed marks it
//! dirty so it is queued again once the worker calls [`WorkQueue::done`].

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

struct QueueState<K> {
    queue: VecDeque<K>,
    queued: HashSet<K>,
    processing: HashSet<K>,
    dirty: HashSet<K>,
    shutdown: bool,
}

/// Work queue keyed by `K`
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    shutdown_tx: watch::Sender<bool>,
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                processing: HashSet::new(),
                dirty: HashSet::new(),
                shutdown: false,
            }),
            notify: Notify::new(),
            shutdown_tx,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<K>> {
        // State stays consistent across a panicking holder
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue `key` unless it is already waiting
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutdown {
            return;
        }
        if state.processing.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.queue.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Queue `key` once `delay` has passed. Dropped if the queue shuts down
    /// first, in which case the timer task ends right away.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) -> JoinHandle<()>
    where
        K: Sync,
    {
        let queue = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => queue.add(key),
                _ = shutdown.wait_for(|stopped| *stopped) => {}
            }
        })
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn next(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release `key` after processing
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.remove(key) && !state.shutdown && state.queued.insert(key.clone()) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out work and wake all waiting workers
    pub fn shutdown(&self) {
        self.state().shutdown = true;
        self.notify.notify_waiters();
        let _ = self.shutdown_tx.send(true);
    }

    /// Keys waiting to be processed
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently held by workers
    pub fn in_flight(&self) -> usize {
        self.state().processing.len()
    }
}
