//! # Keyed Lock Registries
//!
//! Per-key async mutexes: the engine's two serialization points.
//!
//! ## Why Two Registries
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Engine Serialization Points                          │
//! │                                                                         │
//! │  KeyedLocks<String>  (keyed by session id)                             │
//! │  ─────────────────────────────────────────                             │
//! │  All mutations of ONE session serialize here, so the sequence          │
//! │  "load → mutate → recalculate → persist row+snapshot" is atomic        │
//! │  with respect to other mutations of the same session. Different        │
//! │  sessions never contend: each key has its own mutex.                   │
//! │                                                                         │
//! │  KeyedLocks<(String, String)>  (keyed by user id + device id)          │
//! │  ───────────────────────────────────────────────────────────           │
//! │  create_session's quota check ("count open, insert if under cap")      │
//! │  is a check-then-act race under concurrent tab creation from the       │
//! │  same owner. Serializing on the owner key closes it; the partial       │
//! │  unique tab index in the store is the transactional backstop.          │
//! │                                                                         │
//! │  Lock order: owner lock and session lock are never held together.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A registry of async mutexes, one per key, created on first use.
///
/// Guards are owned (`OwnedMutexGuard`) so they can be held across await
/// points without borrowing the registry.
#[derive(Debug, Default)]
pub struct KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        KeyedLocks {
            locks: DashMap::new(),
        }
    }

    /// Acquires the mutex for `key`, waiting if another task holds it.
    ///
    /// The map shard guard is dropped before awaiting the mutex, so a
    /// blocked acquire never stalls lookups of other keys.
    pub async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(key).or_default().clone();
        mutex.lock_owned().await
    }

    /// Number of keys ever locked (idle mutexes are retained; sessions are
    /// bounded by the quota, so the registry stays small).
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no key has been locked yet.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = Arc::new(KeyedLocks::new());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("s-1".to_string()).await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let locks = KeyedLocks::new();

        let a = locks.acquire("s-1".to_string()).await;
        // Must not deadlock: s-2 has its own mutex
        let b = locks.acquire("s-2".to_string()).await;

        drop(a);
        drop(b);
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_tuple_keys() {
        let locks: KeyedLocks<(String, String)> = KeyedLocks::new();

        let _guard = locks
            .acquire(("user-1".to_string(), "dev-1".to_string()))
            .await;
        assert!(!locks.is_empty());
    }
}
