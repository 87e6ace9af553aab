//! Component E: the materialization cache (spec §4.E).
//!
//! At-most-one concurrent build per key, shared delivery to waiters, LRU
//! eviction that skips pinned entries, and negative-TTL caching of failures.
//! Coordination follows the teacher's `parking_lot` usage elsewhere in this
//! crate; ordering is tracked with an `lru::LruCache<K, ()>` used purely as
//! an ordered key set layered over a `HashMap` holding the real entries.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::{Condvar, Mutex};

use crate::model::Artifact;

/// One cache-entry state (spec §4.E "State per key").
enum Slot {
    Building,
    Ready {
        artifact: Arc<Artifact>,
        refcount: usize,
        last_used: Instant,
    },
    Failed {
        message: String,
        expires_at: Instant,
    },
}

struct Inner<K> {
    slots: HashMap<K, Slot>,
    /// Tracks LRU order for `Ready` entries only; `Building`/`Failed` slots
    /// are absent from this structure.
    order: LruCache<K, ()>,
    resident_bytes: u64,
}

/// Memoizing, capacity-bounded, at-most-one-builder-per-key artifact cache.
pub struct MaterializationCache<K>
where
    K: std::hash::Hash + Eq + Clone,
{
    inner: Mutex<Inner<K>>,
    condvar: Condvar,
    capacity_bytes: u64,
    negative_ttl: Duration,
}

/// Error produced by a failed build, cached as a negative entry with `negative_ttl`.
#[derive(Debug, Clone)]
pub struct BuildFailed(pub String);

impl<K> MaterializationCache<K>
where
    K: std::hash::Hash + Eq + Clone,
{
    pub fn new(capacity_bytes: u64, negative_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                // Unbounded: the real budget is enforced on resident bytes,
                // not entry count; `lru` still needs some non-zero capacity.
                order: LruCache::new(NonZeroUsize::new(usize::MAX).unwrap()),
                resident_bytes: 0,
            }),
            condvar: Condvar::new(),
            capacity_bytes,
            negative_ttl,
        }
    }

    /// Fetch the artifact for `key`, building it via `build` on a miss.
    /// Exactly one caller per key runs `build`; all others wait and share
    /// its result. Pins the artifact (increments its refcount) on success —
    /// callers must call [`Self::release`] exactly once per successful `get`.
    pub fn get<F>(&self, key: &K, build: F) -> Result<Arc<Artifact>, BuildFailed>
    where
        F: FnOnce() -> Result<Artifact, BuildFailed>,
    {
        loop {
            let mut guard = self.inner.lock();
            match guard.slots.get_mut(key) {
                Some(Slot::Ready {
                    artifact,
                    refcount,
                    last_used,
                }) => {
                    *refcount += 1;
                    *last_used = Instant::now();
                    let artifact = artifact.clone();
                    guard.order.get_mut(key);
                    return Ok(artifact);
                }
                Some(Slot::Failed {
                    message,
                    expires_at,
                }) if Instant::now() < *expires_at => {
                    return Err(BuildFailed(message.clone()));
                }
                Some(Slot::Building) => {
                    self.condvar.wait(&mut guard);
                    continue;
                }
                _ => {
                    guard.slots.insert(key.clone(), Slot::Building);
                    drop(guard);
                    break;
                }
            }
        }

        let result = build();
        let mut guard = self.inner.lock();
        match result {
            Ok(artifact) => {
                let artifact = Arc::new(artifact);
                let bytes = artifact.len();
                guard.slots.insert(
                    key.clone(),
                    Slot::Ready {
                        artifact: artifact.clone(),
                        refcount: 1,
                        last_used: Instant::now(),
                    },
                );
                guard.order.put(key.clone(), ());
                guard.resident_bytes += bytes;
                evict_to_budget(&mut guard, self.capacity_bytes, Some(key));
                drop(guard);
                self.condvar.notify_all();
                Ok(artifact)
            }
            Err(failure) => {
                guard.slots.insert(
                    key.clone(),
                    Slot::Failed {
                        message: failure.0.clone(),
                        expires_at: Instant::now() + self.negative_ttl,
                    },
                );
                drop(guard);
                self.condvar.notify_all();
                Err(failure)
            }
        }
    }

    /// Drop one pin on `key`'s artifact. Once unpinned, it remains resident
    /// until an LRU sweep reclaims it.
    pub fn release(&self, key: &K) {
        let mut guard = self.inner.lock();
        let mut now_unpinned = false;
        if let Some(Slot::Ready { refcount, .. }) = guard.slots.get_mut(key) {
            *refcount = refcount.saturating_sub(1);
            now_unpinned = *refcount == 0;
        }
        if now_unpinned {
            evict_to_budget(&mut guard, self.capacity_bytes, None);
        }
    }

    pub fn resident_bytes(&self) -> u64 {
        self.inner.lock().resident_bytes
    }

    pub fn is_resident(&self, key: &K) -> bool {
        matches!(self.inner.lock().slots.get(key), Some(Slot::Ready { .. }))
    }
}

/// Evict `Ready` entries with `refcount == 0` in LRU order until resident
/// bytes fit `capacity_bytes`, or until only pinned/just-inserted entries
/// remain. `just_inserted` is never evicted by its own insertion, matching
/// spec §4.E's evict-on-release admission: a fresh artifact that still
/// doesn't fit after evicting everything unpinned is kept and reclaimed on
/// its own `release`.
fn evict_to_budget<K>(inner: &mut Inner<K>, capacity_bytes: u64, just_inserted: Option<&K>)
where
    K: std::hash::Hash + Eq + Clone,
{
    while inner.resident_bytes > capacity_bytes {
        // `order.iter()` yields most-recently-used first; collect then walk
        // back-to-front to find the least-recently-used eviction candidate.
        let ordered: Vec<K> = inner.order.iter().map(|(k, _)| k.clone()).collect();
        let victim: Option<K> = ordered.into_iter().rev().find(|k| {
            Some(k) != just_inserted
                && matches!(inner.slots.get(k), Some(Slot::Ready { refcount: 0, .. }))
        });
        match victim {
            Some(key) => {
                if let Some(Slot::Ready { artifact, .. }) = inner.slots.remove(&key) {
                    inner.resident_bytes = inner.resident_bytes.saturating_sub(artifact.len());
                }
                inner.order.pop(&key);
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn artifact(bytes: usize) -> Artifact {
        Artifact::in_memory(vec![0u8; bytes])
    }

    #[test]
    fn builds_once_and_caches() {
        let cache: MaterializationCache<&str> =
            MaterializationCache::new(10_000_000, Duration::from_secs(30));
        let build_count = AtomicUsize::new(0);
        let a = cache
            .get(&"k", || {
                build_count.fetch_add(1, Ordering::SeqCst);
                Ok(artifact(10))
            })
            .unwrap();
        cache.release(&"k");
        let b = cache
            .get(&"k", || {
                build_count.fetch_add(1, Ordering::SeqCst);
                Ok(artifact(10))
            })
            .unwrap();
        cache.release(&"k");
        assert_eq!(build_count.load(Ordering::SeqCst), 1);
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn failed_build_is_negatively_cached() {
        let cache: MaterializationCache<&str> =
            MaterializationCache::new(10_000_000, Duration::from_secs(30));
        let build_count = AtomicUsize::new(0);
        for _ in 0..3 {
            let err = cache.get(&"bad", || {
                build_count.fetch_add(1, Ordering::SeqCst);
                Err(BuildFailed("boom".into()))
            });
            assert!(err.is_err());
        }
        assert_eq!(build_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eviction_skips_pinned_entries() {
        let cache: MaterializationCache<&str> =
            MaterializationCache::new(1_000, Duration::from_secs(30));
        let pinned = cache.get(&"pinned", || Ok(artifact(600))).unwrap();
        // "pinned" stays pinned (no release); inserting "b" must not evict it.
        let _b = cache.get(&"b", || Ok(artifact(600))).unwrap();
        cache.release(&"b");
        assert!(cache.is_resident(&"pinned"));
        drop(pinned);
    }

    #[test]
    fn lru_eviction_reclaims_oldest_unpinned_entry() {
        let cache: MaterializationCache<&str> =
            MaterializationCache::new(1_000, Duration::from_secs(30));
        cache.get(&"a", || Ok(artifact(600))).unwrap();
        cache.release(&"a");
        cache.get(&"b", || Ok(artifact(600))).unwrap();
        cache.release(&"b");
        // budget 1000 < 1200: "a" (least recently used, unpinned) is evicted.
        assert!(!cache.is_resident(&"a"));
        assert!(cache.is_resident(&"b"));
    }

    #[test]
    fn oversized_artifact_is_admitted_anyway() {
        let cache: MaterializationCache<&str> =
            MaterializationCache::new(100, Duration::from_secs(30));
        let artifact = cache.get(&"big", || Ok(artifact(600))).unwrap();
        assert_eq!(artifact.len(), 600);
        assert!(cache.is_resident(&"big"));
    }
}
