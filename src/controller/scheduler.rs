//! Scheduler shell (spec.md §4.7): one rate-limited, de-duplicated work
//! queue per controller over namespaced-name keys.
//!
//! Mirrors client-go's `workqueue.RateLimitingInterface` shape (dirty set +
//! processing set gate re-admission, `done` re-queues a key that was
//! `add`ed again mid-processing) since that's the closed-form semantics
//! spec.md §4.7 and §5's "ordering guarantees" describe.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

/// Keys the scheduler operates over: cheap to clone, hashable, sendable
/// across the spawned delay tasks `add_after`/`add_rate_limited` use.
pub trait SchedKey: Clone + Eq + Hash + Send + Sync + std::fmt::Display + 'static {}
impl<T: Clone + Eq + Hash + Send + Sync + std::fmt::Display + 'static> SchedKey for T {}

/// Exponential backoff starting at 5ms, doubling up to ~82s over 15
/// retries; the 16th would-be retry is dropped with a terminal log
/// (spec.md §4.7).
#[derive(Clone, Copy, Debug)]
pub struct RateLimiter {
    base: Duration,
    max: Duration,
    max_retries: u32,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(5),
            max: Duration::from_secs(82),
            max_retries: 15,
        }
    }
}

impl RateLimiter {
    /// `attempt` is zero-based (the first retry is attempt 0). Returns
    /// `None` once `attempt >= max_retries`: caller drops the key.
    fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let millis = (self.base.as_millis() as u64).saturating_mul(1u64 << attempt.min(62));
        Some(Duration::from_millis(millis).min(self.max))
    }
}

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    retries: HashMap<K, u32>,
}

impl<K: SchedKey> Default for State<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            retries: HashMap::new(),
        }
    }
}

/// One controller's work queue (spec.md §4.7).
pub struct Scheduler<K: SchedKey> {
    state: Arc<Mutex<State<K>>>,
    notify: Arc<Notify>,
    limiter: RateLimiter,
}

impl<K: SchedKey> Clone for Scheduler<K> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            notify: self.notify.clone(),
            limiter: self.limiter,
        }
    }
}

impl<K: SchedKey> Scheduler<K> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            notify: Arc::new(Notify::new()),
            limiter: RateLimiter::default(),
        }
    }

    /// Enqueue `key` immediately, deduplicated. If `key` is currently being
    /// processed, it is instead marked dirty so `done` re-queues it once
    /// processing completes (spec.md §5 "the done marker gates re-admission").
    pub async fn add(&self, key: K) {
        let mut state = self.state.lock().await;
        if state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Enqueue `key` after `delay` elapses.
    pub fn add_after(&self, key: K, delay: Duration) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.add(key).await;
        });
    }

    /// Enqueue `key` with exponential backoff, per this key's retry count.
    /// Drops the key (with a terminal log) once the retry budget is spent.
    pub async fn add_rate_limited(&self, key: K) {
        let attempt = {
            let state = self.state.lock().await;
            *state.retries.get(&key).unwrap_or(&0)
        };
        match self.limiter.delay_for(attempt) {
            Some(delay) => {
                self.state.lock().await.retries.insert(key.clone(), attempt + 1);
                self.add_after(key, delay);
            }
            None => {
                self.state.lock().await.retries.remove(&key);
                warn!(%key, "retry budget exhausted, dropping key");
            }
        }
    }

    /// Block until a key is ready, mark it as processing, and return it.
    pub async fn get(&self) -> K {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return key;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Mark `key` as finished processing. If it was re-added while being
    /// processed, it re-enters the ready queue now.
    pub async fn done(&self, key: K) {
        let mut state = self.state.lock().await;
        state.processing.remove(&key);
        if state.dirty.contains(&key) {
            state.queue.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Reset the retry counter for `key` (spec.md §4.7 "forget").
    pub async fn forget(&self, key: K) {
        self.state.lock().await.retries.remove(&key);
    }
}

impl<K: SchedKey> Default for Scheduler<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one reconcile, in the shape the scheduler consumes to decide
/// the next queue action (spec.md §4.7 "Reconcile outcome mapping").
pub enum ReconcileOutcome {
    Error,
    RequeueAfter(Duration),
    Requeue,
    Done,
}

/// Apply spec.md §4.7's outcome → queue-action mapping.
pub async fn apply_outcome<K: SchedKey>(scheduler: &Scheduler<K>, key: K, outcome: ReconcileOutcome) {
    match outcome {
        ReconcileOutcome::Error => scheduler.add_rate_limited(key).await,
        ReconcileOutcome::RequeueAfter(delay) => {
            scheduler.forget(key.clone()).await;
            scheduler.add_after(key, delay);
        }
        ReconcileOutcome::Requeue => scheduler.add_rate_limited(key).await,
        ReconcileOutcome::Done => {
            info!(%key, "reconcile settled");
            scheduler.forget(key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn add_then_get_returns_the_key() {
        let scheduler: Scheduler<String> = Scheduler::new();
        scheduler.add("a".to_string()).await;
        let key = timeout(Duration::from_millis(100), scheduler.get())
            .await
            .unwrap();
        assert_eq!(key, "a");
    }

    #[tokio::test]
    async fn duplicate_add_is_deduped() {
        let scheduler: Scheduler<String> = Scheduler::new();
        scheduler.add("a".to_string()).await;
        scheduler.add("a".to_string()).await;
        let key = scheduler.get().await;
        scheduler.done(key).await;
        let result = timeout(Duration::from_millis(50), scheduler.get()).await;
        assert!(result.is_err(), "no second key should have been queued");
    }

    #[tokio::test]
    async fn add_while_processing_requeues_on_done() {
        let scheduler: Scheduler<String> = Scheduler::new();
        scheduler.add("a".to_string()).await;
        let key = scheduler.get().await; // now "processing"
        scheduler.add(key.clone()).await; // re-add while in flight
        scheduler.done(key).await;
        let key = timeout(Duration::from_millis(100), scheduler.get())
            .await
            .unwrap();
        assert_eq!(key, "a");
    }

    #[tokio::test]
    async fn add_after_delays_delivery() {
        let scheduler: Scheduler<String> = Scheduler::new();
        scheduler.add_after("a".to_string(), Duration::from_millis(30));
        let immediate = timeout(Duration::from_millis(5), scheduler.get()).await;
        assert!(immediate.is_err());
        let key = timeout(Duration::from_millis(200), scheduler.get())
            .await
            .unwrap();
        assert_eq!(key, "a");
    }

    #[test]
    fn rate_limiter_doubles_until_retries_are_exhausted() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.delay_for(0), Some(Duration::from_millis(5)));
        assert_eq!(limiter.delay_for(1), Some(Duration::from_millis(10)));
        assert_eq!(limiter.delay_for(14), Some(Duration::from_millis(81920)));
        assert_eq!(limiter.delay_for(15), None);
    }

    #[test]
    fn rate_limiter_clamps_to_the_cap() {
        let limiter = RateLimiter { max_retries: 20, ..RateLimiter::default() };
        assert_eq!(limiter.delay_for(18), Some(Duration::from_secs(82)));
    }

    #[tokio::test]
    async fn rate_limited_retries_increment_and_exhaust() {
        let scheduler: Scheduler<String> = Scheduler::new();
        for _ in 0..15 {
            scheduler.add_rate_limited("a".to_string()).await;
        }
        let retries = scheduler.state.lock().await.retries.get("a").copied();
        assert_eq!(retries, Some(15));
        // the 16th call exceeds the budget and clears the counter instead.
        scheduler.add_rate_limited("a".to_string()).await;
        let retries = scheduler.state.lock().await.retries.get("a").copied();
        assert_eq!(retries, None);
    }
}
