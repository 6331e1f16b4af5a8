//! Per-key serialization of fetch-and-merge.
//!
//! Two callers asking for the same `(entity, dataset)` at once would both
//! read stale metadata, both fetch, and the last save would win. Holding
//! a per-key mutex for the whole read-fetch-merge-save sequence rules that
//! out within a process. Different keys never block each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(key.to_string()).or_default())
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// A panic in an earlier holder does not poison the key; the guarded
    /// state lives on disk, not behind the mutex.
    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let lock = self.lock_for(key);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        self.release(key, lock);
        result
    }

    /// Forget `key` once no other caller holds or waits on it. Clones are
    /// only taken under the map lock, so the count cannot grow meanwhile.
    fn release(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&lock) == 2 {
            map.remove(key);
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    locks.with_lock("000858/history", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn different_keys_get_different_locks() {
        let locks = KeyedLocks::new();
        // Nested acquisition of distinct keys must not deadlock.
        let v = locks.with_lock("a", || locks.with_lock("b", || locks.len()));
        assert_eq!(v, 2);
        assert!(locks.is_empty());
    }

    #[test]
    fn idle_keys_are_forgotten() {
        let locks = KeyedLocks::new();
        for i in 0..100 {
            locks.with_lock(&format!("{i:06}/history_data_qfq"), || ());
        }
        assert!(locks.is_empty());
    }

    #[test]
    fn panic_does_not_poison_key() {
        let locks = Arc::new(KeyedLocks::new());
        let l2 = Arc::clone(&locks);
        let _ = thread::spawn(move || l2.with_lock("k", || panic!("boom"))).join();
        assert_eq!(locks.with_lock("k", || 1), 1);
    }
}
