// Adaptive Cuckoo Filter
// A fixed-size approximate membership filter that keeps the true key behind every fingerprint,
// so that a false positive reported by the caller can be repaired by moving the colliding entry
// to another table instead of growing the filter.

use derive_builder::Builder;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::borrow::Borrow;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use tracing::debug;

mod adaptive;
mod delta;
mod fingerprint;
mod grid;
mod relocation;
mod sync;

pub use adaptive::Adaptation;
pub use delta::{RegisterUpdate, apply_register_delta};
pub use fingerprint::{Fingerprint, FingerprintEncoding, FingerprintEngine};
pub use grid::{BadStateSet, ShadowRecord, SlotIndex};
pub use relocation::RelocationStrategy;
pub use sync::SharedFilter;

use grid::SlotGrid;
use relocation::Relocator;

/// Error type for filter operations
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// No empty slot can be reached for the item; the filter is effectively full
    #[error("No free slot is reachable for this item.")]
    CapacityExhausted,
    /// The relocation search gave up after the given number of steps
    #[error("Relocation budget of {0} steps exhausted before a free slot was found.")]
    RelocationBudgetExceeded(usize),
    /// The resident item has no table left to move to and was dropped from the filter
    #[error("False positive cannot be repaired: every table is marked bad for the resident item.")]
    AdaptationUnresolvable,
    /// A slot has a fingerprint without a shadow record, or the other way around
    #[error("Slot {0} holds a fingerprint and shadow record that disagree.")]
    InconsistentState(SlotIndex),
    /// An external register snapshot does not have one value per bucket of every table
    #[error("Register snapshot must be {tables} tables of {buckets} buckets.")]
    SnapshotShape { tables: usize, buckets: usize },
}

/// A rejected insertion, carrying the key that could not be placed.
///
/// The filter is unchanged when this is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertError<K> {
    key: K,
    reason: Error,
}

impl<K> InsertError<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn into_key(self) -> K {
        self.key
    }

    pub fn reason(&self) -> &Error {
        &self.reason
    }
}

impl<K> fmt::Display for InsertError<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "insert failed: {}", self.reason)
    }
}

impl<K: fmt::Debug> std::error::Error for InsertError<K> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason)
    }
}

/// Slot usage of a single table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOccupancy {
    pub total: usize,
    pub filled: usize,
}

/// An approximate membership filter that can repair its own false positives.
///
/// ## Layout
///
/// The filter is `tables` independent hash tables of `buckets` buckets with `slots` slots each.
/// A key can live in exactly one candidate bucket per table. Each occupied slot holds a short
/// fingerprint and, in a parallel shadow grid, the original key plus the set of tables in which
/// that key is known to collide with something (its [`BadStateSet`]).
///
/// ## Adaptation
///
/// A lookup can report a false positive when an unrelated key shares a resident's bucket and
/// fingerprint. When the caller learns that `contains(x)` lied, [`adapt_false_positive`] finds
/// the resident responsible, marks its current table as bad for it and moves it elsewhere, so the
/// same query stops matching. Because a key never returns to a table in its bad set, repeated
/// adaptation of the same resident ends after at most `tables` steps.
///
/// ## Relocation
///
/// Inserting into full candidate buckets uses either a bounded random eviction chain or a
/// breadth-first search for the shortest chain of moves ([`RelocationStrategy`]). Both are
/// bounded by `max_relocations` and a failed insertion leaves the filter untouched.
///
/// ## Concurrency
///
/// The filter is a plain owned value mutated through `&mut self`. Use one instance per worker,
/// or wrap it in a [`SharedFilter`] when several threads must share one instance.
///
/// [`adapt_false_positive`]: AdaptiveCuckooFilter::adapt_false_positive
#[derive(Debug, Builder)]
#[builder(
    pattern = "owned",
    build_fn(private, name = "base_build", validate = "Self::validate")
)]
pub struct AdaptiveCuckooFilter<K, H = DefaultHasher>
where
    K: Hash,
    H: Hasher + Default,
{
    // Configuration parameters
    /// Number of hash tables (the filter degree), at most 64
    #[builder(default = "2")]
    tables: usize,

    /// Number of buckets in each table
    #[builder(default = "1024")]
    buckets: usize,

    /// Number of slots per bucket
    #[builder(default = "1")]
    slots: usize,

    /// Size of fingerprints in bits (1 to 32)
    #[builder(default = "16")]
    fingerprint_bits: u32,

    /// How insertions relocate residents when all candidate buckets are full
    #[builder(default)]
    strategy: RelocationStrategy,

    /// How fingerprints are cut from their hash
    #[builder(default)]
    encoding: FingerprintEncoding,

    /// Eviction chain length (random kicks) or node expansions (shortest path) before giving up
    #[builder(default = "1000")]
    max_relocations: usize,

    /// Divisor applied to fingerprints when mirroring them into external registers
    #[builder(default = "1")]
    register_scale: u64,

    /// Seed for the eviction RNG; drawn from the OS when unset
    #[builder(setter(strip_option), default)]
    seed: Option<u64>,

    // Internal values - automatically derived from the configuration
    /// Fingerprint and shadow storage
    #[builder(setter(skip))]
    grid: SlotGrid<K>,

    /// Hashing front-end
    #[builder(setter(skip))]
    engine: FingerprintEngine<H>,

    /// Source of eviction randomness
    #[builder(setter(skip), default = "StdRng::seed_from_u64(0)")]
    rng: StdRng,
}

impl<K: Hash, H: Hasher + Default> AdaptiveCuckooFilter<K, H> {
    /// Insert a key into the filter.
    ///
    /// A free slot in one of the key's candidate buckets is taken directly, lowest table first.
    /// Otherwise residents are relocated with the configured [`RelocationStrategy`].
    ///
    /// Returns the slot the key now occupies. On failure the filter is unchanged and the key is
    /// handed back inside the error, whose reason is [`Error::CapacityExhausted`] or
    /// [`Error::RelocationBudgetExceeded`].
    pub fn insert(&mut self, key: K) -> Result<SlotIndex, InsertError<K>> {
        let strategy = self.strategy;
        let placed = self.relocator().place(ShadowRecord::new(key), strategy);
        placed.map_err(|(reason, record)| {
            debug!(%reason, len = self.grid.len(), "insert failed");
            InsertError {
                key: record.into_key(),
                reason,
            }
        })
    }

    /// Check if a key is in the filter
    ///
    /// Returns `true` if the key is possibly in the filter (may have false positives),
    /// `false` if it is definitely not in the filter
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
    {
        self.membership_index(key).is_some()
    }

    /// First slot whose fingerprint matches `key`, probing tables in order and slots in order
    /// within each candidate bucket.
    pub fn membership_index<Q>(&self, key: &Q) -> Option<SlotIndex>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
    {
        (0..self.tables).find_map(|table| {
            let bucket = self.engine.bucket_index(key, table);
            self.grid.bucket_slots(table, bucket).find(|&index| {
                self.grid
                    .get(index)
                    .is_some_and(|stored| self.engine.matches(key, index, stored))
            })
        })
    }

    /// Slot that actually holds `key`, compared through the shadow records.
    pub fn location_of<Q>(&self, key: &Q) -> Option<SlotIndex>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + PartialEq,
    {
        (0..self.tables).find_map(|table| {
            let bucket = self.engine.bucket_index(key, table);
            self.grid.bucket_slots(table, bucket).find(|&index| {
                self.grid
                    .shadow_at(index)
                    .is_some_and(|record| record.key.borrow() == key)
            })
        })
    }

    /// Tables `key` has been moved out of by adaptation, if it is resident.
    pub fn bad_tables<Q>(&self, key: &Q) -> Option<BadStateSet>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + PartialEq,
    {
        let index = self.location_of(key)?;
        self.grid.shadow_at(index).map(ShadowRecord::bad_tables)
    }

    /// Total and filled slots of every table.
    pub fn occupancy_stats(&self) -> Vec<TableOccupancy> {
        let total = self.buckets * self.slots;
        self.grid
            .per_table_filled()
            .into_iter()
            .map(|filled| TableOccupancy { total, filled })
            .collect()
    }

    /// Get the number of keys in the filter
    pub fn len(&self) -> usize {
        self.grid.len()
    }

    /// Check if the filter is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of slots: `tables * buckets * slots`
    pub fn capacity(&self) -> usize {
        self.grid.capacity()
    }

    /// Fraction of slots in use
    pub fn load_factor(&self) -> f64 {
        self.len() as f64 / self.capacity() as f64
    }

    /// Resident keys in slot order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.grid.entries().map(|(_, _, record)| record.key())
    }

    /// Fingerprint stored at `index`, `None` if the slot is empty or out of range.
    pub fn slot(&self, index: SlotIndex) -> Option<Fingerprint> {
        self.in_range(index).then(|| self.grid.get(index)).flatten()
    }

    /// Shadow record stored at `index`, `None` if the slot is empty or out of range.
    pub fn shadow_at(&self, index: SlotIndex) -> Option<&ShadowRecord<K>> {
        self.in_range(index).then(|| self.grid.shadow_at(index)).flatten()
    }

    /// Clear the filter, removing all keys and forgetting every bad table
    pub fn clear(&mut self) {
        self.grid.reset();
    }

    /// Verify that every occupied slot has a shadow record whose key hashes to that slot and
    /// reproduces the stored fingerprint.
    pub fn check_consistency(&self) -> Result<(), Error> {
        self.grid.check_pairing()?;
        for (index, stored, record) in self.grid.entries() {
            if self.engine.bucket_index(&record.key, index.table) != index.bucket
                || !self.engine.matches(&record.key, index, stored)
                || record.bad_tables.contains(index.table)
            {
                return Err(Error::InconsistentState(index));
            }
        }
        Ok(())
    }

    /// The hashing front-end, for computing where a key would land.
    pub fn fingerprint_engine(&self) -> &FingerprintEngine<H> {
        &self.engine
    }

    pub fn tables(&self) -> usize {
        self.tables
    }

    pub fn buckets(&self) -> usize {
        self.buckets
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn strategy(&self) -> RelocationStrategy {
        self.strategy
    }

    fn in_range(&self, index: SlotIndex) -> bool {
        index.table < self.tables && index.bucket < self.buckets && index.slot < self.slots
    }

    fn relocator(&mut self) -> Relocator<'_, K, H> {
        Relocator {
            grid: &mut self.grid,
            engine: &self.engine,
            rng: &mut self.rng,
            tables: self.tables,
            max_relocations: self.max_relocations,
        }
    }
}

impl<K: Hash> AdaptiveCuckooFilter<K, DefaultHasher> {
    /// Create a new AdaptiveCuckooFilterBuilder with default settings
    pub fn builder() -> AdaptiveCuckooFilterBuilder<K, DefaultHasher> {
        AdaptiveCuckooFilterBuilder::default()
    }

    /// Create an empty filter of `tables` tables, `buckets` buckets per table and `slots` slots
    /// per bucket, storing `fingerprint_bits`-bit fingerprints
    pub fn new(
        tables: usize,
        buckets: usize,
        slots: usize,
        fingerprint_bits: u32,
    ) -> Result<Self, AdaptiveCuckooFilterBuilderError> {
        Self::builder()
            .tables(tables)
            .buckets(buckets)
            .slots(slots)
            .fingerprint_bits(fingerprint_bits)
            .build()
    }
}

impl<K: Hash, H: Hasher + Default> AdaptiveCuckooFilterBuilder<K, H> {
    /// Validate the builder configuration
    fn validate(&self) -> Result<(), String> {
        if let Some(tables) = self.tables
            && !(1..=64).contains(&tables)
        {
            return Err("tables must be between 1 and 64".into());
        }
        if self.buckets == Some(0) {
            return Err("buckets must be greater than zero".into());
        }
        if self.slots == Some(0) {
            return Err("slots must be greater than zero".into());
        }
        if let Some(bits) = self.fingerprint_bits
            && !(1..=32).contains(&bits)
        {
            return Err("fingerprint_bits must be between 1 and 32".into());
        }
        if self.register_scale == Some(0) {
            return Err("register_scale must be greater than zero".into());
        }
        Ok(())
    }

    /// Build an AdaptiveCuckooFilter with the specified configuration
    pub fn build(self) -> Result<AdaptiveCuckooFilter<K, H>, AdaptiveCuckooFilterBuilderError> {
        let mut filter = self.base_build()?;
        filter.grid = SlotGrid::new(filter.tables, filter.buckets, filter.slots);
        filter.engine = FingerprintEngine::new(filter.buckets, filter.fingerprint_bits, filter.encoding);
        filter.rng = match filter.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(filter)
    }
}
