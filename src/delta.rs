//! Mirroring filter state into external per-bucket registers.
//!
//! The external device keeps one register per `(table, bucket)`, holding the fingerprint of the
//! bucket's first slot divided by the filter's `register_scale`. An empty slot reads as 0, and so
//! does any fingerprint smaller than the scale.

use std::hash::{Hash, Hasher};

use crate::{AdaptiveCuckooFilter, Error, SlotIndex};

/// A register write that brings one external register in line with the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterUpdate {
    pub table: usize,
    pub bucket: usize,
    pub value: u64,
}

impl<K: Hash, H: Hasher + Default> AdaptiveCuckooFilter<K, H> {
    /// Register value for one bucket.
    fn register_value(&self, table: usize, bucket: usize) -> u64 {
        self.grid
            .get(SlotIndex::new(table, bucket, 0))
            .map_or(0, |fingerprint| fingerprint.value() as u64 / self.register_scale)
    }

    /// What the external registers should hold: one row per table, one value per bucket.
    ///
    /// A fingerprint that scales down to 0 is indistinguishable from an empty first slot.
    pub fn register_view(&self) -> Vec<Vec<u64>> {
        (0..self.tables)
            .map(|table| {
                (0..self.buckets)
                    .map(|bucket| self.register_value(table, bucket))
                    .collect()
            })
            .collect()
    }

    /// Updates needed to turn `snapshot` into [`register_view`](Self::register_view), in table
    /// then bucket order. Empty when the snapshot is already current.
    ///
    /// Only the first slot of each bucket is mirrored. The filter is not modified.
    ///
    /// # Errors
    ///
    /// [`Error::SnapshotShape`] unless `snapshot` has exactly `tables` rows of `buckets` values.
    pub fn compute_register_delta<R: AsRef<[u64]>>(&self, snapshot: &[R]) -> Result<Vec<RegisterUpdate>, Error> {
        if snapshot.len() != self.tables || snapshot.iter().any(|row| row.as_ref().len() != self.buckets) {
            return Err(Error::SnapshotShape {
                tables: self.tables,
                buckets: self.buckets,
            });
        }
        let mut delta = Vec::new();
        for (table, row) in snapshot.iter().enumerate() {
            for (bucket, &current) in row.as_ref().iter().enumerate() {
                let value = self.register_value(table, bucket);
                if value != current {
                    delta.push(RegisterUpdate { table, bucket, value });
                }
            }
        }
        Ok(delta)
    }
}

/// Write `updates` into a register snapshot. Updates outside the snapshot are ignored.
pub fn apply_register_delta(snapshot: &mut [Vec<u64>], updates: &[RegisterUpdate]) {
    for update in updates {
        if let Some(register) = snapshot
            .get_mut(update.table)
            .and_then(|row| row.get_mut(update.bucket))
        {
            *register = update.value;
        }
    }
}
