//! A filter shared between threads behind one coarse lock.

use std::borrow::Borrow;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

use crate::{Adaptation, AdaptiveCuckooFilter, Error, InsertError, SlotIndex};

/// An [`AdaptiveCuckooFilter`] that can be shared between threads.
///
/// Every operation, reads included, takes the same exclusive lock for its whole duration, so
/// inserts, lookups and adaptations are linearized.
pub struct SharedFilter<K, H = DefaultHasher>
where
    K: Hash,
    H: Hasher + Default,
{
    filter: Mutex<AdaptiveCuckooFilter<K, H>>,
}

impl<K: Hash, H: Hasher + Default> SharedFilter<K, H> {
    pub fn new(filter: AdaptiveCuckooFilter<K, H>) -> Self {
        Self {
            filter: Mutex::new(filter),
        }
    }

    /// See [`AdaptiveCuckooFilter::insert`].
    pub fn insert(&self, key: K) -> Result<SlotIndex, InsertError<K>> {
        self.filter.lock().insert(key)
    }

    /// See [`AdaptiveCuckooFilter::contains`].
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
    {
        self.filter.lock().contains(key)
    }

    /// See [`AdaptiveCuckooFilter::adapt_false_positive`].
    pub fn adapt_false_positive<Q>(&self, key: &Q) -> Result<Adaptation, Error>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
    {
        self.filter.lock().adapt_false_positive(key)
    }

    /// Run `f` with exclusive access to the filter.
    pub fn with<R>(&self, f: impl FnOnce(&mut AdaptiveCuckooFilter<K, H>) -> R) -> R {
        let mut guard = self.filter.lock();
        f(&mut *guard)
    }

    pub fn into_inner(self) -> AdaptiveCuckooFilter<K, H> {
        self.filter.into_inner()
    }
}
