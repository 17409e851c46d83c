use async_trait::async_trait;
use serde::Serialize;
use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::diagnosis::DiagnosisResult;
use crate::models::token::CorrelationToken;

/// Counts of live (non-expired) entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub pending: usize,
    pub ready: usize,
}

/// Keyed table from correlation token to diagnosis result.
///
/// A missing or still-pending token is reported as `Ok(None)`; `Err` is
/// reserved for faults of the backend itself.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Mark a freshly dispatched token as pending. Leaves an entry that
    /// already holds a result untouched.
    fn register(&self, token: &CorrelationToken) -> Result<(), StoreError>;

    /// Tombstone a token whose dispatch failed. Until it expires the token
    /// reads as absent and results delivered for it are dropped.
    fn abandon(&self, token: &CorrelationToken) -> Result<(), StoreError>;

    /// Insert or overwrite the result for `token` and wake anyone waiting on it.
    /// Abandoned tokens are left untouched.
    fn put(&self, token: &CorrelationToken, result: DiagnosisResult) -> Result<(), StoreError>;

    /// Non-blocking lookup.
    fn get(&self, token: &CorrelationToken) -> Result<Option<DiagnosisResult>, StoreError>;

    fn is_pending(&self, token: &CorrelationToken) -> Result<bool, StoreError>;

    /// Wait up to `timeout` for a result to be stored under `token`.
    async fn wait_for(
        &self,
        token: &CorrelationToken,
        timeout: Duration,
    ) -> Result<Option<DiagnosisResult>, StoreError>;

    /// Drop entries older than the retention window. Returns how many went.
    fn evict_expired(&self) -> Result<usize, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Result store lock poisoned")]
    Poisoned,
}

#[derive(Debug)]
enum EntryState {
    Pending,
    Ready(DiagnosisResult),
    Abandoned,
}

#[derive(Debug)]
struct Entry {
    state: EntryState,
    created_at: Instant,
}

impl Entry {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }
}

/// Process-local store: one `RwLock` around the table, plus a one-shot
/// completion signal per token that somebody is waiting on.
#[derive(Debug)]
pub struct InMemoryResultStore {
    entries: RwLock<HashMap<CorrelationToken, Entry>>,
    waiters: Mutex<HashMap<CorrelationToken, Arc<Notify>>>,
    ttl: Duration,
}

impl InMemoryResultStore {
    /// Entries older than `ttl` (measured from creation) read as absent and
    /// are removed by the next sweep.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn waiter(&self, token: &CorrelationToken) -> Result<Arc<Notify>, StoreError> {
        let mut waiters = self.waiters.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(waiters.entry(token.clone()).or_default().clone())
    }

    fn release_waiter(&self, token: &CorrelationToken, notify: &Arc<Notify>) -> Result<(), StoreError> {
        let mut waiters = self.waiters.lock().map_err(|_| StoreError::Poisoned)?;
        // Only the map and this caller hold it: nobody else is waiting.
        let unused = waiters
            .get(token)
            .is_some_and(|current| Arc::ptr_eq(current, notify) && Arc::strong_count(notify) == 2);
        if unused {
            waiters.remove(token);
        }
        Ok(())
    }

    fn signal(&self, token: &CorrelationToken) -> Result<(), StoreError> {
        let notify = self
            .waiters
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .remove(token);
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
        Ok(())
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    fn register(&self, token: &CorrelationToken) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        match entries.entry(token.clone()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired(self.ttl, now) {
                    occupied.insert(Entry {
                        state: EntryState::Pending,
                        created_at: now,
                    });
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    state: EntryState::Pending,
                    created_at: now,
                });
            }
        }
        Ok(())
    }

    fn abandon(&self, token: &CorrelationToken) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(
            token.clone(),
            Entry {
                state: EntryState::Abandoned,
                created_at: Instant::now(),
            },
        );
        Ok(())
    }

    fn put(&self, token: &CorrelationToken, result: DiagnosisResult) -> Result<(), StoreError> {
        let now = Instant::now();
        {
            let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
            let live = entries
                .get(token)
                .filter(|entry| !entry.is_expired(self.ttl, now));
            if live.is_some_and(|entry| matches!(entry.state, EntryState::Abandoned)) {
                tracing::warn!(token = %token, "Dropping result for a job whose dispatch failed");
                return Ok(());
            }
            let created_at = live.map_or(now, |entry| entry.created_at);
            entries.insert(
                token.clone(),
                Entry {
                    state: EntryState::Ready(result),
                    created_at,
                },
            );
        }
        self.signal(token)
    }

    fn get(&self, token: &CorrelationToken) -> Result<Option<DiagnosisResult>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(match entries.get(token) {
            Some(entry) if !entry.is_expired(self.ttl, now) => match &entry.state {
                EntryState::Ready(result) => Some(result.clone()),
                EntryState::Pending | EntryState::Abandoned => None,
            },
            _ => None,
        })
    }

    fn is_pending(&self, token: &CorrelationToken) -> Result<bool, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(token).is_some_and(|entry| {
            matches!(entry.state, EntryState::Pending) && !entry.is_expired(self.ttl, now)
        }))
    }

    async fn wait_for(
        &self,
        token: &CorrelationToken,
        timeout: Duration,
    ) -> Result<Option<DiagnosisResult>, StoreError> {
        let notify = self.waiter(token)?;
        let notified = notify.notified();
        tokio::pin!(notified);
        // Register before looking so a put landing in between still wakes us.
        notified.as_mut().enable();

        let found = match self.get(token) {
            Ok(Some(result)) => Ok(Some(result)),
            Ok(None) => {
                let _ = tokio::time::timeout(timeout, notified).await;
                self.get(token)
            }
            Err(e) => Err(e),
        };
        self.release_waiter(token, &notify)?;
        found
    }

    fn evict_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let removed = {
            let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(self.ttl, now));
            before - entries.len()
        };
        let mut waiters = self.waiters.lock().map_err(|_| StoreError::Poisoned)?;
        waiters.retain(|_, notify| Arc::strong_count(notify) > 1);
        Ok(removed)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        let mut stats = StoreStats::default();
        for entry in entries.values().filter(|e| !e.is_expired(self.ttl, now)) {
            match entry.state {
                EntryState::Pending => stats.pending += 1,
                EntryState::Ready(_) => stats.ready += 1,
                EntryState::Abandoned => {}
            }
        }
        Ok(stats)
    }
}

/// Periodically evict expired entries until `shutdown` fires.
pub fn spawn_sweeper(
    store: Arc<dyn ResultStore>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match store.evict_expired() {
                Ok(0) => {}
                Ok(evicted) => {
                    metrics::counter!("diagnosis_results_evicted_total").increment(evicted as u64);
                    tracing::info!(evicted, "Evicted expired diagnosis entries");
                }
                Err(e) => tracing::error!(error = %e, "Result sweep failed"),
            }

            if let Ok(stats) = store.stats() {
                metrics::gauge!("diagnosis_store_entries").set((stats.pending + stats.ready) as f64);
            }
        }

        tracing::debug!("Result sweeper stopped");
    })
}
