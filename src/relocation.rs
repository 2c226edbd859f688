//! Cuckoo relocation: finding a home for a record when its candidate buckets are full.
//!
//! Two strategies are available. [`RelocationStrategy::RandomKick`] walks a random eviction chain
//! and undoes it if the chain runs out of budget. [`RelocationStrategy::ShortestPath`] runs a
//! breadth-first search over occupied slots and only touches the grid once a path is known.

use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};

use rand::Rng;
use rand::rngs::StdRng;
use tracing::trace;

use crate::Error;
use crate::fingerprint::{Fingerprint, FingerprintEngine};
use crate::grid::{ShadowRecord, SlotGrid, SlotIndex};

/// How a record is placed when none of its candidate buckets has a free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelocationStrategy {
    /// Evict a random occupant of a random allowed bucket and re-place it, up to
    /// `max_relocations` times.
    RandomKick,
    /// Breadth-first search for the shortest chain of moves ending in a free slot, expanding at
    /// most `max_relocations` nodes.
    #[default]
    ShortestPath,
}

/// Borrowed view of the filter state needed to place one record.
pub(crate) struct Relocator<'a, K, H> {
    pub(crate) grid: &'a mut SlotGrid<K>,
    pub(crate) engine: &'a FingerprintEngine<H>,
    pub(crate) rng: &'a mut StdRng,
    pub(crate) tables: usize,
    pub(crate) max_relocations: usize,
}

impl<K: Hash, H: Hasher + Default> Relocator<'_, K, H> {
    /// Place `record` somewhere outside its bad tables.
    ///
    /// Returns the slot the record itself ended up in. On failure the grid is left exactly as it
    /// was and the record is handed back.
    pub(crate) fn place(
        &mut self,
        record: ShadowRecord<K>,
        strategy: RelocationStrategy,
    ) -> Result<SlotIndex, (Error, ShadowRecord<K>)> {
        if let Some(index) = self.free_slot(&record) {
            let fingerprint = self.engine.slot_fingerprint(&record.key, index);
            self.grid.set(index, fingerprint, record);
            return Ok(index);
        }
        if self.grid.is_full() || record.bad_tables.len() >= self.tables {
            return Err((Error::CapacityExhausted, record));
        }
        match strategy {
            RelocationStrategy::RandomKick => self.kick(record),
            RelocationStrategy::ShortestPath => match self.shortest_path(&record) {
                Ok(path) => self.apply_path(record, &path),
                Err(error) => Err((error, record)),
            },
        }
    }

    /// Tables `record` may live in, ascending.
    fn allowed_tables(&self, record: &ShadowRecord<K>) -> impl Iterator<Item = usize> + use<K, H> {
        let bad_tables = record.bad_tables;
        (0..self.tables).filter(move |&table| !bad_tables.contains(table))
    }

    /// First empty slot among the record's candidate buckets, in table order.
    fn free_slot(&self, record: &ShadowRecord<K>) -> Option<SlotIndex> {
        self.allowed_tables(record).find_map(|table| {
            let bucket = self.engine.bucket_index(&record.key, table);
            self.grid.first_free(table, bucket)
        })
    }

    /// Random eviction chain.
    ///
    /// Victims are drawn uniformly from the carried record's allowed slots, revisits included,
    /// except that the slot the carried record was just evicted from is skipped while there is
    /// any other choice. Every swap is recorded; if the chain runs out of budget the swaps are
    /// replayed backwards so that each slot gets back the exact fingerprint and record it held,
    /// and the original record is returned to the caller.
    fn kick(&mut self, record: ShadowRecord<K>) -> Result<SlotIndex, (Error, ShadowRecord<K>)> {
        // Each entry is a slot written by the chain and the fingerprint it held before.
        let mut chain: Vec<(SlotIndex, Fingerprint)> = Vec::with_capacity(self.max_relocations.min(32));
        // Where the original record sits; `None` while it is the one being carried.
        let mut root_at: Option<SlotIndex> = None;
        let mut carried = record;

        let error = loop {
            if let Some(index) = self.free_slot(&carried) {
                let fingerprint = self.engine.slot_fingerprint(&carried.key, index);
                self.grid.set(index, fingerprint, carried);
                trace!(evictions = chain.len(), "kick chain found a free slot");
                return Ok(root_at.unwrap_or(index));
            }
            if chain.len() >= self.max_relocations {
                break Error::RelocationBudgetExceeded(self.max_relocations);
            }
            let mut candidates: Vec<SlotIndex> = self
                .allowed_tables(&carried)
                .flat_map(|table| {
                    let bucket = self.engine.bucket_index(&carried.key, table);
                    self.grid.bucket_slots(table, bucket)
                })
                .collect();
            if let Some(&(last, _)) = chain.last()
                && candidates.len() > 1
            {
                candidates.retain(|&index| index != last);
            }
            if candidates.is_empty() {
                break Error::CapacityExhausted;
            }
            let victim = candidates[self.rng.random_range(0..candidates.len())];
            let fingerprint = self.engine.slot_fingerprint(&carried.key, victim);
            let carrying_root = root_at.is_none();
            match self.grid.replace(victim, fingerprint, carried) {
                Ok((previous, evicted)) => {
                    chain.push((victim, previous));
                    carried = evicted;
                    if carrying_root {
                        root_at = Some(victim);
                    } else if root_at == Some(victim) {
                        root_at = None;
                    }
                }
                Err(rejected) => {
                    carried = rejected;
                    break Error::InconsistentState(victim);
                }
            }
        };

        // Undo: put each evicted occupant back and pick up what was carried into its slot.
        while let Some((index, previous)) = chain.pop() {
            match self.grid.replace(index, previous, carried) {
                Ok((_, displaced)) => carried = displaced,
                Err(rejected) => return Err((Error::InconsistentState(index), rejected)),
            }
        }
        trace!(%error, "kick chain rolled back");
        Err((error, carried))
    }

    /// Breadth-first search for a relocation path.
    ///
    /// The path lists where the root goes first, then where each displaced occupant goes, and
    /// ends at an empty slot.
    fn shortest_path(&self, root: &ShadowRecord<K>) -> Result<Vec<SlotIndex>, Error> {
        struct Node {
            at: Option<SlotIndex>,
            parent: usize,
        }

        let mut nodes = vec![Node { at: None, parent: 0 }];
        let mut queue = VecDeque::from([0usize]);
        let mut visited = HashSet::new();
        let mut expansions = 0;

        while let Some(current) = queue.pop_front() {
            if expansions == self.max_relocations {
                return Err(Error::RelocationBudgetExceeded(self.max_relocations));
            }
            expansions += 1;

            let record = match nodes[current].at {
                None => root,
                Some(index) => self.grid.shadow_at(index).ok_or(Error::InconsistentState(index))?,
            };
            let buckets: Vec<(usize, usize)> = self
                .allowed_tables(record)
                .map(|table| (table, self.engine.bucket_index(&record.key, table)))
                .collect();

            if let Some(free) = buckets
                .iter()
                .find_map(|&(table, bucket)| self.grid.first_free(table, bucket))
            {
                let mut path = vec![free];
                let mut node = current;
                while let Some(index) = nodes[node].at {
                    path.push(index);
                    node = nodes[node].parent;
                }
                path.reverse();
                return Ok(path);
            }

            for &(table, bucket) in &buckets {
                for index in self.grid.bucket_slots(table, bucket) {
                    if Some(index) != nodes[current].at && visited.insert(index) {
                        nodes.push(Node {
                            at: Some(index),
                            parent: current,
                        });
                        queue.push_back(nodes.len() - 1);
                    }
                }
            }
        }
        Err(Error::CapacityExhausted)
    }

    /// Shift every occupant along `path` one step and put `root` at its head.
    fn apply_path(
        &mut self,
        root: ShadowRecord<K>,
        path: &[SlotIndex],
    ) -> Result<SlotIndex, (Error, ShadowRecord<K>)> {
        trace!(?path, "applying relocation path");
        for hop in path.windows(2).rev() {
            let (from, to) = (hop[0], hop[1]);
            let Some((_, record)) = self.grid.clear(from) else {
                return Err((Error::InconsistentState(from), root));
            };
            let fingerprint = self.engine.slot_fingerprint(&record.key, to);
            self.grid.set(to, fingerprint, record);
        }
        let head = path[0];
        let fingerprint = self.engine.slot_fingerprint(&root.key, head);
        self.grid.set(head, fingerprint, root);
        Ok(head)
    }
}
