//! Process-shared decode caches for the read path.
//!
//! Repeated reads of the same stored sample must not repeat the decode:
//! each distinct key decodes at most once even under concurrent lookups,
//! with every caller sharing the same `Arc`'d result. A failed decode
//! propagates its error and leaves the slot retryable.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// Keyed once-per-entry decode cache.
///
/// The outer map hands out per-key slots; decoding happens under the slot
/// lock only, so concurrent readers of the same key serialize while
/// readers of different keys proceed independently. The entry count is
/// bounded: on overflow roughly half the completed slots are evicted
/// (holders of an evicted `Arc` keep their value).
pub struct DecodeCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    max_entries: usize,
}

type Slot<V> = Arc<Mutex<Option<Arc<V>>>>;

impl<K: Eq + Hash + Clone, V> DecodeCache<K, V> {
    /// Create a cache bounded to `max_entries` decoded values.
    pub fn new(max_entries: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Fetch the value for `key`, running `load` at most once per key.
    pub fn get_or_load<E>(
        &self,
        key: K,
        load: impl FnOnce() -> std::result::Result<V, E>,
    ) -> std::result::Result<Arc<V>, E> {
        let slot = {
            let mut slots = self.slots.lock();
            if !slots.contains_key(&key) && slots.len() >= self.max_entries {
                Self::evict_some(&mut slots);
            }
            Arc::clone(slots.entry(key).or_default())
        };

        let mut value = slot.lock();
        if let Some(v) = value.as_ref() {
            return Ok(Arc::clone(v));
        }
        let loaded = Arc::new(load()?);
        *value = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Number of keyed slots currently held.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all cached values.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    fn evict_some(slots: &mut HashMap<K, Slot<V>>) {
        // Only completed slots are dropped; a slot mid-decode stays so the
        // decoding thread can publish into it.
        let victims: Vec<K> = slots
            .iter()
            .filter(|(_, slot)| slot.try_lock().map_or(false, |v| v.is_some()))
            .map(|(k, _)| k.clone())
            .collect();
        for key in victims.iter().take(victims.len() / 2 + 1) {
            slots.remove(key);
        }
    }
}

impl<K: Eq + Hash + Clone, V> Default for DecodeCache<K, V> {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_loads_once() {
        let cache: DecodeCache<u64, String> = DecodeCache::new(16);
        let calls = AtomicUsize::new(0);
        for _ in 0..5 {
            let v = cache
                .get_or_load::<Infallible>(7, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("seven".to_string())
                })
                .unwrap();
            assert_eq!(*v, "seven");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_leaves_slot_retryable() {
        let cache: DecodeCache<u64, String> = DecodeCache::new(16);
        let err = cache.get_or_load(1, || Err::<String, _>("boom"));
        assert_eq!(err.unwrap_err(), "boom");
        let ok = cache.get_or_load::<&str>(1, || Ok("fine".to_string())).unwrap();
        assert_eq!(*ok, "fine");
    }

    #[test]
    fn test_concurrent_single_decode() {
        let cache: Arc<DecodeCache<u64, u64>> = Arc::new(DecodeCache::new(64));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(std::thread::spawn(move || {
                let v = cache
                    .get_or_load::<Infallible>(42, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(4242)
                    })
                    .unwrap();
                assert_eq!(*v, 4242);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bounded_eviction() {
        let cache: DecodeCache<u64, u64> = DecodeCache::new(8);
        for i in 0..64 {
            cache
                .get_or_load::<Infallible>(i, || Ok(i * 2))
                .unwrap();
        }
        assert!(cache.len() <= 9);
    }

    #[test]
    fn test_evicted_arc_survives() {
        let cache: DecodeCache<u64, u64> = DecodeCache::new(2);
        let held = cache.get_or_load::<Infallible>(0, || Ok(99)).unwrap();
        for i in 1..10 {
            cache.get_or_load::<Infallible>(i, || Ok(i)).unwrap();
        }
        assert_eq!(*held, 99);
    }
}
