//! False-positive repair.

use std::borrow::Borrow;
use std::hash::{Hash, Hasher};

use rand::Rng;
use tracing::{debug, warn};

use crate::{AdaptiveCuckooFilter, Error, FingerprintEncoding, SlotIndex};

/// Outcome of a successful [`AdaptiveCuckooFilter::adapt_false_positive`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adaptation {
    /// Nothing matches the key anymore, so there was nothing to repair.
    NotPresent,
    /// The resident stayed in place with its fingerprint re-cut from the next window of its hash.
    Rewindowed(SlotIndex),
    /// The resident traded places with another slot of its bucket and now lives at this slot.
    Swapped(SlotIndex),
    /// The resident was moved out of the colliding table and now lives at this slot.
    Relocated(SlotIndex),
}

impl<K: Hash, H: Hasher + Default> AdaptiveCuckooFilter<K, H> {
    /// Repair a false positive reported for `key`.
    ///
    /// The caller knows `key` is not in the set although [`contains`](Self::contains) said it
    /// was. The resident whose fingerprint matched is located through
    /// [`membership_index`](Self::membership_index) and:
    ///
    /// 1. with [`FingerprintEncoding::SlidingWindow`], while the resident's hash still has an
    ///    unused window, its fingerprint is re-cut in place from the next window;
    /// 2. with [`FingerprintEncoding::SlotOffset`] and more than one slot per bucket, it trades
    ///    places with an empty slot of its bucket, or with a random other resident of it, and
    ///    both fingerprints are re-cut for their new slots;
    /// 3. otherwise its current table is added to its [`BadStateSet`](crate::BadStateSet), its
    ///    slot is cleared and it is inserted again, avoiding every bad table.
    ///
    /// One call repairs one collision. If another resident also matches `key`, `contains` keeps
    /// returning `true` and the call can be repeated.
    ///
    /// Calling this for a key that no longer matches anything is a no-op returning
    /// [`Adaptation::NotPresent`].
    ///
    /// # Errors
    ///
    /// [`Error::AdaptationUnresolvable`] when the resident cannot be placed anywhere outside its
    /// bad tables. The resident has then been removed from the filter: the false positive is
    /// gone, but so is the resident's membership.
    pub fn adapt_false_positive<Q>(&mut self, key: &Q) -> Result<Adaptation, Error>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
    {
        let Some(index) = self.membership_index(key) else {
            return Ok(Adaptation::NotPresent);
        };
        let stored = self.grid.get(index).ok_or(Error::InconsistentState(index))?;
        let record = self.grid.shadow_at(index).ok_or(Error::InconsistentState(index))?;

        if let Some(window) = self.engine.next_window(stored) {
            let fingerprint = self.engine.fingerprint_at(&record.key, index.table, window);
            self.grid.set_fingerprint(index, fingerprint);
            debug!(%index, window, "fingerprint window advanced");
            return Ok(Adaptation::Rewindowed(index));
        }
        if self.engine.encoding() == FingerprintEncoding::SlotOffset && self.slots > 1 {
            return self.swap_within_bucket(index);
        }

        let Some((_, mut record)) = self.grid.clear(index) else {
            return Err(Error::InconsistentState(index));
        };
        record.bad_tables.insert(index.table);
        let bad_tables = record.bad_tables.len();

        let strategy = self.strategy;
        let placed = self.relocator().place(record, strategy);
        match placed {
            Ok(relocated) => {
                debug!(from = %index, to = %relocated, bad_tables, "resident relocated");
                Ok(Adaptation::Relocated(relocated))
            }
            Err((reason, _)) => {
                warn!(%index, %reason, bad_tables, "resident dropped, no table left to move it to");
                Err(Error::AdaptationUnresolvable)
            }
        }
    }

    fn swap_within_bucket(&mut self, index: SlotIndex) -> Result<Adaptation, Error> {
        let partner = match self.grid.first_free(index.table, index.bucket) {
            Some(free) => free,
            None => {
                let offset = self.rng.random_range(1..self.slots);
                SlotIndex::new(index.table, index.bucket, (index.slot + offset) % self.slots)
            }
        };
        let Some((_, resident)) = self.grid.clear(index) else {
            return Err(Error::InconsistentState(index));
        };
        let displaced = self.grid.clear(partner);

        let fingerprint = self.engine.slot_fingerprint(&resident.key, partner);
        self.grid.set(partner, fingerprint, resident);
        if let Some((_, other)) = displaced {
            let fingerprint = self.engine.slot_fingerprint(&other.key, index);
            self.grid.set(index, fingerprint, other);
        }
        debug!(from = %index, to = %partner, "resident swapped within its bucket");
        Ok(Adaptation::Swapped(partner))
    }
}
