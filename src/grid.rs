//! Slot storage: a `[table][bucket][slot]` grid of fingerprints and a parallel grid of shadow
//! records holding the true key behind each fingerprint.

use std::fmt;
use std::mem;

use crate::Error;
use crate::fingerprint::Fingerprint;

/// Address of a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex {
    pub table: usize,
    pub bucket: usize,
    pub slot: usize,
}

impl SlotIndex {
    pub fn new(table: usize, bucket: usize, slot: usize) -> Self {
        Self {
            table,
            bucket,
            slot,
        }
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.table, self.bucket, self.slot)
    }
}

/// Tables known to always collide for one particular key.
///
/// Stored as a bitmask, which caps the filter degree at 64 tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct BadStateSet(u64);

impl BadStateSet {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn contains(&self, table: usize) -> bool {
        (self.0 >> table) & 1 == 1
    }

    /// Marks `table` as bad. Returns `false` if it already was.
    pub(crate) fn insert(&mut self, table: usize) -> bool {
        let fresh = !self.contains(table);
        self.0 |= 1 << table;
        fresh
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Table indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..u64::BITS as usize).filter(|&table| self.contains(table))
    }
}

impl FromIterator<usize> for BadStateSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::new();
        for table in iter {
            set.insert(table);
        }
        set
    }
}

/// The true value behind an occupied slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowRecord<K> {
    pub(crate) key: K,
    pub(crate) bad_tables: BadStateSet,
}

impl<K> ShadowRecord<K> {
    pub(crate) fn new(key: K) -> Self {
        Self {
            key,
            bad_tables: BadStateSet::new(),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn bad_tables(&self) -> BadStateSet {
        self.bad_tables
    }

    pub fn into_key(self) -> K {
        self.key
    }
}

/// Fixed-size slot storage. Both grids are always written together.
#[derive(Debug, Clone)]
pub(crate) struct SlotGrid<K> {
    tables: usize,
    buckets: usize,
    slots: usize,
    fingerprints: Vec<Option<Fingerprint>>,
    shadows: Vec<Option<ShadowRecord<K>>>,
    len: usize,
}

impl<K> Default for SlotGrid<K> {
    fn default() -> Self {
        Self {
            tables: 0,
            buckets: 0,
            slots: 0,
            fingerprints: Vec::new(),
            shadows: Vec::new(),
            len: 0,
        }
    }
}

impl<K> SlotGrid<K> {
    pub(crate) fn new(tables: usize, buckets: usize, slots: usize) -> Self {
        let size = tables * buckets * slots;
        Self {
            tables,
            buckets,
            slots,
            fingerprints: vec![None; size],
            shadows: (0..size).map(|_| None).collect(),
            len: 0,
        }
    }

    #[inline]
    fn offset(&self, index: SlotIndex) -> usize {
        debug_assert!(index.table < self.tables && index.bucket < self.buckets && index.slot < self.slots);
        (index.table * self.buckets + index.bucket) * self.slots + index.slot
    }

    pub(crate) fn capacity(&self) -> usize {
        self.fingerprints.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub(crate) fn get(&self, index: SlotIndex) -> Option<Fingerprint> {
        self.fingerprints[self.offset(index)]
    }

    pub(crate) fn shadow_at(&self, index: SlotIndex) -> Option<&ShadowRecord<K>> {
        self.shadows[self.offset(index)].as_ref()
    }

    pub(crate) fn is_empty_at(&self, index: SlotIndex) -> bool {
        self.get(index).is_none()
    }

    /// Stores an entry in an empty slot.
    pub(crate) fn set(&mut self, index: SlotIndex, fingerprint: Fingerprint, record: ShadowRecord<K>) {
        let offset = self.offset(index);
        debug_assert!(
            self.fingerprints[offset].is_none() && self.shadows[offset].is_none(),
            "slot {index} was already occupied"
        );
        self.fingerprints[offset] = Some(fingerprint);
        self.shadows[offset] = Some(record);
        self.len += 1;
    }

    /// Swaps an entry into an occupied slot, handing back the previous occupant.
    ///
    /// An empty slot is left alone and `record` is handed back instead.
    pub(crate) fn replace(
        &mut self,
        index: SlotIndex,
        fingerprint: Fingerprint,
        record: ShadowRecord<K>,
    ) -> Result<(Fingerprint, ShadowRecord<K>), ShadowRecord<K>> {
        let offset = self.offset(index);
        match (self.fingerprints[offset].as_mut(), self.shadows[offset].as_mut()) {
            (Some(stored), Some(shadow)) => Ok((mem::replace(stored, fingerprint), mem::replace(shadow, record))),
            _ => Err(record),
        }
    }

    /// Rewrites the fingerprint of an occupied slot, keeping its shadow record.
    pub(crate) fn set_fingerprint(&mut self, index: SlotIndex, fingerprint: Fingerprint) {
        let offset = self.offset(index);
        debug_assert!(self.shadows[offset].is_some());
        self.fingerprints[offset] = Some(fingerprint);
    }

    /// Empties a slot in both grids.
    pub(crate) fn clear(&mut self, index: SlotIndex) -> Option<(Fingerprint, ShadowRecord<K>)> {
        let offset = self.offset(index);
        let fingerprint = self.fingerprints[offset].take();
        let record = self.shadows[offset].take();
        debug_assert_eq!(fingerprint.is_some(), record.is_some());
        match (fingerprint, record) {
            (Some(fingerprint), Some(record)) => {
                self.len -= 1;
                Some((fingerprint, record))
            }
            _ => None,
        }
    }

    /// First empty slot of a bucket.
    pub(crate) fn first_free(&self, table: usize, bucket: usize) -> Option<SlotIndex> {
        (0..self.slots)
            .map(|slot| SlotIndex::new(table, bucket, slot))
            .find(|&index| self.is_empty_at(index))
    }

    pub(crate) fn bucket_slots(&self, table: usize, bucket: usize) -> impl Iterator<Item = SlotIndex> + use<K> {
        (0..self.slots).map(move |slot| SlotIndex::new(table, bucket, slot))
    }

    /// Filled slots per table.
    pub(crate) fn per_table_filled(&self) -> Vec<usize> {
        let per_table = self.buckets * self.slots;
        if per_table == 0 {
            return vec![0; self.tables];
        }
        self.fingerprints
            .chunks(per_table)
            .map(|table| table.iter().filter(|fp| fp.is_some()).count())
            .collect()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (SlotIndex, Fingerprint, &ShadowRecord<K>)> {
        let (buckets, slots) = (self.buckets, self.slots);
        self.fingerprints
            .iter()
            .zip(&self.shadows)
            .enumerate()
            .filter_map(move |(offset, (fp, record))| {
                let index = SlotIndex::new(offset / (buckets * slots), (offset / slots) % buckets, offset % slots);
                Some((index, (*fp)?, record.as_ref()?))
            })
    }

    pub(crate) fn reset(&mut self) {
        self.fingerprints.iter_mut().for_each(|fp| *fp = None);
        self.shadows.iter_mut().for_each(|record| *record = None);
        self.len = 0;
    }

    /// Checks that every slot is either fully empty or fully occupied.
    pub(crate) fn check_pairing(&self) -> Result<(), Error> {
        let (buckets, slots) = (self.buckets, self.slots);
        for (offset, (fp, record)) in self.fingerprints.iter().zip(&self.shadows).enumerate() {
            if fp.is_some() != record.is_some() {
                return Err(Error::InconsistentState(SlotIndex::new(
                    offset / (buckets * slots),
                    (offset / slots) % buckets,
                    offset % slots,
                )));
            }
        }
        Ok(())
    }
}
