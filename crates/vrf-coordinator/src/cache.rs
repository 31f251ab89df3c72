//! Height-windowed cache tracking report items handed to the transmission
//! pipeline but not yet finalized on-chain.
//!
//! Entries are content-addressed: the lookup key is a digest of the item's
//! canonical serialization, so structurally-equal keys always collide
//! regardless of how they were produced. The cache carries no lock of its
//! own; the coordinator synchronizes the read and write paths over it.

use crate::primitives::{
    B256,
    keccak256,
};

use serde::Serialize;

use std::collections::HashMap;

#[derive(thiserror::Error, Debug)]
pub enum CacheKeyError {
    #[error("canonical serialization failed")]
    Serialize(#[source] bincode::Error),
}

/// Derives the canonical cache key for an item: the keccak digest of its
/// deterministic byte serialization.
///
/// # Errors
///
/// Returns an error if the item cannot be serialized.
pub fn cache_key<T: Serialize>(item: &T) -> Result<B256, CacheKeyError> {
    let bytes = bincode::serialize(item).map_err(CacheKeyError::Serialize)?;
    Ok(keccak256(&bytes))
}

#[derive(Debug)]
struct CacheEntry<T> {
    item: T,
    inserted_at: u64,
}

/// Bounded set of in-flight items, keyed by canonical digest and stamped
/// with the chain height at which each was inserted.
#[derive(Debug)]
pub struct TransmissionCache<T> {
    entries: HashMap<B256, CacheEntry<T>>,
    eviction_window: u64,
}

impl<T> TransmissionCache<T> {
    pub fn new(eviction_window: u64) -> Self {
        TransmissionCache {
            entries: HashMap::new(),
            eviction_window,
        }
    }

    /// Inserts an item, overwriting any previous entry under the same key.
    /// Presence checks are the caller's responsibility and must happen
    /// before insertion, under the same critical section.
    pub fn add(&mut self, item: T, key: B256, at_height: u64) {
        self.entries.insert(
            key,
            CacheEntry {
                item,
                inserted_at: at_height,
            },
        );
    }

    pub fn get(&self, key: &B256) -> Option<&T> {
        self.entries.get(key).map(|entry| &entry.item)
    }

    /// Removes every entry inserted more than `eviction_window` blocks
    /// before `current_height`. Called after every write batch.
    pub fn evict_expired(&mut self, current_height: u64) {
        let window = self.eviction_window;
        self.entries
            .retain(|_, entry| entry.inserted_at + window >= current_height);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::BlockId;

    fn test_block(block_number: u64) -> BlockId {
        BlockId {
            block_number,
            conf_delay: 3,
        }
    }

    #[test]
    fn test_cache_key_is_structural() {
        let a = test_block(90);
        let b = test_block(90);
        let c = test_block(91);

        assert_eq!(cache_key(&a).unwrap(), cache_key(&b).unwrap());
        assert_ne!(cache_key(&a).unwrap(), cache_key(&c).unwrap());
    }

    #[test]
    fn test_add_and_get() {
        let mut cache = TransmissionCache::new(10);
        let item = test_block(90);
        let key = cache_key(&item).unwrap();

        assert!(cache.get(&key).is_none());
        cache.add(item, key, 100);
        assert_eq!(cache.get(&key), Some(&item));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_add_overwrites() {
        let mut cache = TransmissionCache::new(10);
        let item = test_block(90);
        let key = cache_key(&item).unwrap();

        cache.add(item, key, 100);
        cache.add(item, key, 105);
        assert_eq!(cache.len(), 1);

        // The later insertion height wins: an eviction pass just past the
        // first window must keep the entry.
        cache.evict_expired(111);
        assert_eq!(cache.get(&key), Some(&item));
    }

    #[test]
    fn test_eviction_window_boundary() {
        let mut cache = TransmissionCache::new(10);
        let item = test_block(90);
        let key = cache_key(&item).unwrap();
        cache.add(item, key, 100);

        // Retrievable at exactly inserted_at + window.
        cache.evict_expired(110);
        assert_eq!(cache.get(&key), Some(&item));

        // Gone one block later.
        cache.evict_expired(111);
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_is_selective() {
        let mut cache = TransmissionCache::new(10);
        let old = test_block(80);
        let fresh = test_block(95);
        let old_key = cache_key(&old).unwrap();
        let fresh_key = cache_key(&fresh).unwrap();

        cache.add(old, old_key, 90);
        cache.add(fresh, fresh_key, 100);

        cache.evict_expired(105);
        assert!(cache.get(&old_key).is_none());
        assert_eq!(cache.get(&fresh_key), Some(&fresh));
    }
}
