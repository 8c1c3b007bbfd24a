use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CacheSettings;
use crate::models::AuthOutcome;

struct CachedOutcome {
    outcome: AuthOutcome,
    inserted_at: Instant,
    epoch: u64,
}

impl CachedOutcome {
    fn is_live(&self, ttl: Duration, epoch: u64) -> bool {
        self.epoch == epoch && self.inserted_at.elapsed() < ttl
    }
}

/// Successful fallback outcomes keyed by connection fingerprint.
///
/// Each entry belongs to the configuration epoch it was produced under and is
/// dropped once that epoch is superseded. Entries also expire after the TTL;
/// at capacity the oldest entry is evicted.
pub struct ResultCache {
    entries: DashMap<String, CachedOutcome>,
    ttl_seconds: AtomicU64,
    capacity: AtomicUsize,
}

impl ResultCache {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_seconds: AtomicU64::new(settings.ttl_seconds),
            capacity: AtomicUsize::new(settings.capacity),
        }
    }

    pub fn configure(&self, settings: &CacheSettings) {
        self.ttl_seconds.store(settings.ttl_seconds, Ordering::Relaxed);
        self.capacity.store(settings.capacity, Ordering::Relaxed);
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds.load(Ordering::Relaxed))
    }

    pub fn get(&self, fingerprint: &str, epoch: u64) -> Option<AuthOutcome> {
        let ttl = self.ttl();
        {
            let entry = self.entries.get(fingerprint)?;
            if entry.is_live(ttl, epoch) {
                return Some(entry.outcome.clone());
            }
        }

        // The read guard must be released before removing.
        self.entries
            .remove_if(fingerprint, |_, cached| !cached.is_live(ttl, epoch));
        None
    }

    pub fn remove(&self, fingerprint: &str) {
        self.entries.remove(fingerprint);
    }

    /// Failed outcomes are ignored.
    pub fn insert(&self, fingerprint: String, outcome: AuthOutcome, epoch: u64) {
        if !outcome.success || self.ttl().is_zero() {
            return;
        }

        let capacity = self.capacity.load(Ordering::Relaxed).max(1);
        if !self.entries.contains_key(&fingerprint) {
            self.purge_expired();
            while self.entries.len() >= capacity {
                let Some(oldest) = self.oldest_key() else {
                    break;
                };
                self.entries.remove(&oldest);
            }
        }

        self.entries.insert(
            fingerprint,
            CachedOutcome {
                outcome,
                inserted_at: Instant::now(),
                epoch,
            },
        );
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_expired(&self) {
        let ttl = self.ttl();
        self.entries
            .retain(|_, cached| cached.inserted_at.elapsed() < ttl);
    }

    fn oldest_key(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|entry| entry.value().inserted_at)
            .map(|entry| entry.key().clone())
    }
}
