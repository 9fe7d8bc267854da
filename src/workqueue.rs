//! Rate-limited, de-duplicating work queue
//!
//! Keys are handed to one worker at a time. Adding a key that is already
//! queued is a no-op; adding a key that a worker currently holds parks it
//! until that worker calls [`WorkQueue::done`], so one key is never processed
//! by two workers at once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

/// First retry delay for a failing key
const BASE_DELAY: Duration = Duration::from_millis(5);

/// Retry delays never grow past this
const MAX_DELAY: Duration = Duration::from_secs(1000);

/// Delay before the retry following `failures` earlier failures
pub fn backoff_for(failures: u32) -> Duration {
    let factor = 2u64.saturating_pow(failures);
    let millis = (BASE_DELAY.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(millis).min(MAX_DELAY)
}

/// Shared work queue handle; clones refer to the same queue
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<K> {
    name: String,
    state: Mutex<State<K>>,
    notify: Notify,
}

struct State<K> {
    /// Keys waiting for a worker, in arrival order
    queue: VecDeque<K>,
    /// Keys that need processing (queued, or re-added while processing)
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    /// Consecutive failures per key
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<K>> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue a key for processing
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(queue = %self.inner.name, ?key, "Key in flight, deferring until done");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Queue a key once `delay` has elapsed
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Queue a key after its per-key exponential backoff
    pub fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut state = self.state();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = backoff_for(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        trace!(queue = %self.inner.name, ?key, ?delay, "Re-queueing with backoff");
        self.add_after(key, delay);
    }

    /// Clear a key's failure history
    pub fn forget(&self, key: &K) {
        self.state().failures.remove(key);
    }

    /// Number of times a key has been re-queued since it was last forgotten
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.state().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key
    ///
    /// Returns `None` once the queue is shut down and has no keys left.
    /// Every key returned must be handed back with [`WorkQueue::done`].
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release a key obtained from [`WorkQueue::get`]
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting worker
    ///
    /// Keys already queued are still handed out.
    pub fn shutdown(&self) {
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Keys waiting for a worker
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
