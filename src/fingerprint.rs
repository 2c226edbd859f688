//! Fingerprints and per-table bucket hashing.
//!
//! Every hash is re-keyed with the table index before the key is fed to the hasher, so the
//! same key lands in decorrelated buckets (and gets decorrelated fingerprints) in each table.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::grid::SlotIndex;

const BUCKET_SEED: u64 = 0x243F_6A88_85A3_08D3;
const FINGERPRINT_SEED: u64 = 0x1319_8A2E_0370_7344;
const SLOT_FINGERPRINT_SEED: u64 = 0xA409_3822_299F_31D0;

/// How fingerprints are cut from the per-table fingerprint hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FingerprintEncoding {
    /// Always the low `fingerprint_bits` of the hash.
    #[default]
    FixedOffset,
    /// Starts at the low bits; adapting a false positive may slide the window one bit up the
    /// 64-bit hash before falling back to relocation.
    SlidingWindow,
    /// Keyed by table and slot, so the same key has a different fingerprint in every slot of a
    /// bucket. Adapting a false positive swaps the resident with another slot of its bucket.
    SlotOffset,
}

/// A stored fingerprint together with the window it was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    value: u32,
    window: u8,
}

impl Fingerprint {
    /// The fingerprint bits.
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Bit offset into the 64-bit fingerprint hash.
    pub fn window(&self) -> u8 {
        self.window
    }
}

/// Pure hashing front-end shared by every filter component.
pub struct FingerprintEngine<H> {
    buckets: usize,
    bits: u32,
    mask: u64,
    encoding: FingerprintEncoding,
    _hasher: PhantomData<H>,
}

impl<H: Hasher + Default> FingerprintEngine<H> {
    pub(crate) fn new(buckets: usize, bits: u32, encoding: FingerprintEncoding) -> Self {
        Self {
            buckets,
            bits,
            mask: (1u64 << bits) - 1,
            encoding,
            _hasher: PhantomData,
        }
    }

    /// Hash `key` with a hasher re-keyed by `seed` and `table`.
    fn hash<T: ?Sized + Hash>(&self, seed: u64, table: usize, key: &T) -> u64 {
        let mut hasher = <H as Default>::default();
        hasher.write_u64(seed.wrapping_add(table as u64));
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Candidate bucket of `key` in `table`.
    ///
    /// Uses multiplication + shift to reduce the 64-bit hash into `0..buckets`, so the bucket
    /// count does not have to be a power of two.
    pub fn bucket_index<T: ?Sized + Hash>(&self, key: &T, table: usize) -> usize {
        let hash = self.hash(BUCKET_SEED, table, key);
        ((hash as u128 * self.buckets as u128) >> 64) as usize
    }

    /// Fingerprint of `key` for `table` at window 0.
    pub fn fingerprint<T: ?Sized + Hash>(&self, key: &T, table: usize) -> Fingerprint {
        self.fingerprint_at(key, table, 0)
    }

    /// Fingerprint of `key` for `table` cut at bit offset `window`.
    pub fn fingerprint_at<T: ?Sized + Hash>(&self, key: &T, table: usize, window: u8) -> Fingerprint {
        let hash = self.hash(FINGERPRINT_SEED, table, key);
        Fingerprint {
            value: ((hash >> window) & self.mask) as u32,
            window,
        }
    }

    /// Fingerprint `key` gets when stored at `index`.
    ///
    /// Same as [`fingerprint`](Self::fingerprint) unless the encoding is
    /// [`FingerprintEncoding::SlotOffset`], where the slot is mixed into the hash as well.
    pub fn slot_fingerprint<T: ?Sized + Hash>(&self, key: &T, index: SlotIndex) -> Fingerprint {
        match self.encoding {
            FingerprintEncoding::SlotOffset => {
                // Tables stay below 64, so shifting the slot past them keeps every pair distinct.
                let seed = SLOT_FINGERPRINT_SEED.wrapping_add((index.slot as u64) << 8);
                Fingerprint {
                    value: (self.hash(seed, index.table, key) & self.mask) as u32,
                    window: 0,
                }
            }
            _ => self.fingerprint(key, index.table),
        }
    }

    /// Whether `key` would produce `stored` at `index`.
    pub fn matches<T: ?Sized + Hash>(&self, key: &T, index: SlotIndex, stored: Fingerprint) -> bool {
        match self.encoding {
            FingerprintEncoding::SlotOffset => self.slot_fingerprint(key, index) == stored,
            _ => self.fingerprint_at(key, index.table, stored.window).value == stored.value,
        }
    }

    /// The next window `stored` may slide to, if the encoding allows one.
    pub fn next_window(&self, stored: Fingerprint) -> Option<u8> {
        match self.encoding {
            FingerprintEncoding::FixedOffset | FingerprintEncoding::SlotOffset => None,
            FingerprintEncoding::SlidingWindow => {
                let next = stored.window as u32 + 1;
                (next + self.bits <= u64::BITS).then_some(next as u8)
            }
        }
    }

    pub fn encoding(&self) -> FingerprintEncoding {
        self.encoding
    }

    /// Width of a fingerprint in bits.
    pub fn bits(&self) -> u32 {
        self.bits
    }
}

impl<H> Default for FingerprintEngine<H> {
    fn default() -> Self {
        Self {
            buckets: 1,
            bits: 1,
            mask: 1,
            encoding: FingerprintEncoding::default(),
            _hasher: PhantomData,
        }
    }
}

impl<H> Clone for FingerprintEngine<H> {
    fn clone(&self) -> Self {
        Self {
            buckets: self.buckets,
            bits: self.bits,
            mask: self.mask,
            encoding: self.encoding,
            _hasher: PhantomData,
        }
    }
}

impl<H> fmt::Debug for FingerprintEngine<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintEngine")
            .field("buckets", &self.buckets)
            .field("bits", &self.bits)
            .field("encoding", &self.encoding)
            .finish()
    }
}
