//! Open-addressing address → object index map.
//!
//! The map is the deduplication backbone of the crawl: every discovered object
//! address is inserted exactly once and later discoveries resolve through it.
//! It has to hold tens of millions of entries, so all state lives in a single
//! `Box<[u64]>` carved into four regions laid out back to back:
//!
//! ```text
//! [ values: C x u32 ][ keys: C x u64 ][ next: C x u32 ][ buckets: 2C x u32 ]
//! ```
//!
//! `C` (the slot capacity) is always a power of two. `u32` regions are packed
//! two per word. Each bucket heads a singly linked chain threaded through
//! `next`; removed slots are pushed onto a free list that is drained before the
//! bump cursor advances.

use crate::error::{CrawlError, CrawlResult};
use crate::index::ObjectIndex;

const NIL: u32 = u32::MAX;
/// Value marker for a slot sitting on the free list.
const FREE: u32 = u32::MAX;
const MIN_CAPACITY: usize = 4;
const FIBONACCI: u64 = 0x9E37_79B9_7F4A_7C15;

/// Word offsets of each region inside the backing allocation.
#[derive(Debug, Copy, Clone)]
struct Regions {
    values: usize,
    keys: usize,
    next: usize,
    buckets: usize,
    total: usize,
}

impl Regions {
    fn for_capacity(capacity: usize) -> Self {
        let values = 0;
        let keys = values + capacity / 2;
        let next = keys + capacity;
        let buckets = next + capacity / 2;
        let total = buckets + capacity;
        Self {
            values,
            keys,
            next,
            buckets,
            total,
        }
    }
}

/// Address → [`ObjectIndex`] hash map backed by one contiguous allocation.
///
/// # Examples
///
/// ```
/// use heapcrawl::address_map::AddressIndexMap;
/// use heapcrawl::index::ObjectIndex;
///
/// let mut map = AddressIndexMap::with_capacity(16);
/// assert!(map.try_add(0x1000, ObjectIndex(0)).is_some());
/// assert!(map.try_add(0x1000, ObjectIndex(5)).is_none()); // duplicate keys are refused
///
/// assert_eq!(map.find(0x1000), Some(ObjectIndex(0)));
/// assert_eq!(map.try_remove(0x1000), Some(0));
/// assert_eq!(map.find(0x1000), None);
/// ```
#[derive(Clone)]
pub struct AddressIndexMap {
    storage: Box<[u64]>,
    regions: Regions,
    capacity: usize,
    bucket_bits: u32,
    count: usize,
    /// Bump cursor: slots at or past this index have never been used
    next_unused: usize,
    first_free: u32,
}

impl Default for AddressIndexMap {
    fn default() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }
}

impl std::fmt::Debug for AddressIndexMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressIndexMap")
            .field("count", &self.count)
            .field("capacity", &self.capacity)
            .field("next_unused", &self.next_unused)
            .finish()
    }
}

impl AddressIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a map with room for at least `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        let regions = Regions::for_capacity(capacity);
        let mut storage = vec![0u64; regions.total].into_boxed_slice();
        storage[regions.buckets..].fill(u64::MAX);

        Self {
            storage,
            regions,
            capacity,
            bucket_bits: (capacity * 2).trailing_zeros(),
            count: 0,
            next_unused: 0,
            first_free: NIL,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.capacity * 2
    }

    #[inline]
    fn bucket_of(&self, key: u64) -> usize {
        (key.wrapping_mul(FIBONACCI) >> (64 - self.bucket_bits)) as usize
    }

    #[inline]
    fn half(&self, region: usize, index: usize) -> u32 {
        let word = self.storage[region + (index >> 1)];
        (word >> ((index & 1) * 32)) as u32
    }

    #[inline]
    fn set_half(&mut self, region: usize, index: usize, value: u32) {
        let shift = (index & 1) * 32;
        let word = &mut self.storage[region + (index >> 1)];
        *word = (*word & !(0xFFFF_FFFFu64 << shift)) | ((value as u64) << shift);
    }

    #[inline]
    fn key_at(&self, slot: usize) -> u64 {
        self.storage[self.regions.keys + slot]
    }

    #[inline]
    fn value_at(&self, slot: usize) -> u32 {
        self.half(self.regions.values, slot)
    }

    #[inline]
    fn next_at(&self, slot: usize) -> u32 {
        self.half(self.regions.next, slot)
    }

    #[inline]
    fn head_of(&self, bucket: usize) -> u32 {
        self.half(self.regions.buckets, bucket)
    }

    #[inline]
    fn set_head(&mut self, bucket: usize, slot: u32) {
        self.set_half(self.regions.buckets, bucket, slot);
    }

    #[inline]
    fn set_next(&mut self, slot: usize, next: u32) {
        self.set_half(self.regions.next, slot, next);
    }

    #[inline]
    fn write_slot(&mut self, slot: usize, key: u64, value: u32, next: u32) {
        self.storage[self.regions.keys + slot] = key;
        self.set_half(self.regions.values, slot, value);
        self.set_half(self.regions.next, slot, next);
    }

    /// Slot holding `key`, if present.
    pub fn find_slot(&self, key: u64) -> Option<usize> {
        let mut slot = self.head_of(self.bucket_of(key));
        while slot != NIL {
            let index = slot as usize;
            if self.key_at(index) == key {
                return Some(index);
            }
            slot = self.next_at(index);
        }
        None
    }

    /// Object index stored for `key`.
    #[inline]
    pub fn find(&self, key: u64) -> Option<ObjectIndex> {
        self.find_slot(key)
            .map(|slot| ObjectIndex(self.value_at(slot)))
    }

    #[inline]
    pub fn contains(&self, key: u64) -> bool {
        self.find_slot(key).is_some()
    }

    /// Insert `key → value`; returns the slot used, or `None` if `key` exists.
    ///
    /// Grows the allocation (doubling capacity) when the free list is empty
    /// and every slot has been handed out.
    pub fn try_add(&mut self, key: u64, value: ObjectIndex) -> Option<usize> {
        debug_assert!(value.0 != FREE, "object index collides with the free marker");
        if self.find_slot(key).is_some() {
            return None;
        }

        let slot = if self.first_free != NIL {
            let slot = self.first_free as usize;
            self.first_free = self.next_at(slot);
            slot
        } else {
            if self.next_unused == self.capacity {
                self.grow();
            }
            let slot = self.next_unused;
            self.next_unused += 1;
            slot
        };

        let bucket = self.bucket_of(key);
        let head = self.head_of(bucket);
        self.write_slot(slot, key, value.0, head);
        self.set_head(bucket, slot as u32);
        self.count += 1;
        Some(slot)
    }

    /// Remove `key`; returns the remaining entry count, or `None` if absent.
    pub fn try_remove(&mut self, key: u64) -> Option<usize> {
        let bucket = self.bucket_of(key);
        let mut previous = NIL;
        let mut slot = self.head_of(bucket);

        while slot != NIL {
            let index = slot as usize;
            let next = self.next_at(index);
            if self.key_at(index) == key {
                if previous == NIL {
                    self.set_head(bucket, next);
                } else {
                    self.set_next(previous as usize, next);
                }
                self.write_slot(index, 0, FREE, self.first_free);
                self.first_free = slot;
                self.count -= 1;
                return Some(self.count);
            }
            previous = slot;
            slot = next;
        }
        None
    }

    fn grow(&mut self) {
        let doubled = self.capacity * 2;
        // Doubling always fits the current entries.
        if let Err(error) = self.resize(doubled) {
            unreachable!("growing to {doubled} failed: {error}");
        }
    }

    /// Ensure room for `additional` more entries without growing mid-insert.
    pub fn reserve(&mut self, additional: usize) -> CrawlResult<()> {
        let needed = self.count.saturating_add(additional);
        if needed > self.capacity {
            self.resize(needed)?;
        }
        Ok(())
    }

    /// Reallocate to hold `new_capacity` slots (rounded up to a power of two)
    /// and reinsert every live entry by walking the old bucket chains.
    ///
    /// Slot numbers are compacted; object indices are preserved.
    pub fn resize(&mut self, new_capacity: usize) -> CrawlResult<()> {
        if new_capacity < self.count {
            return Err(CrawlError::CapacityTooSmall {
                requested: new_capacity,
                count: self.count,
            });
        }

        let mut resized = Self::with_capacity(new_capacity);
        for bucket in 0..self.bucket_count() {
            let mut slot = self.head_of(bucket);
            while slot != NIL {
                let index = slot as usize;
                resized.insert_fresh(self.key_at(index), self.value_at(index));
                slot = self.next_at(index);
            }
        }

        if resized.count != self.count {
            return Err(CrawlError::AddressMapCorrupted(format!(
                "resize reinserted {} of {} entries",
                resized.count, self.count
            )));
        }
        *self = resized;
        Ok(())
    }

    /// Insert a key known to be absent into a map with spare capacity.
    fn insert_fresh(&mut self, key: u64, value: u32) {
        let slot = self.next_unused;
        self.next_unused += 1;
        let bucket = self.bucket_of(key);
        let head = self.head_of(bucket);
        self.write_slot(slot, key, value, head);
        self.set_head(bucket, slot as u32);
        self.count += 1;
    }

    /// Checked access to a slot: `Ok(None)` for a slot on the free list or
    /// never handed out, an error past the allocation.
    pub fn slot(&self, slot: usize) -> CrawlResult<Option<(u64, ObjectIndex)>> {
        if slot >= self.capacity {
            return Err(CrawlError::SlotOutOfRange {
                slot,
                capacity: self.capacity,
            });
        }
        if slot >= self.next_unused || self.value_at(slot) == FREE {
            return Ok(None);
        }
        Ok(Some((self.key_at(slot), ObjectIndex(self.value_at(slot)))))
    }

    pub fn clear(&mut self) {
        *self = Self::with_capacity(self.capacity);
    }

    /// Entries in bucket order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            map: self,
            bucket: 0,
            slot: NIL,
        }
    }

    /// Walk every bucket chain and the free list, verifying that chains are
    /// acyclic, every key sits in the bucket its hash selects, and the number
    /// of reachable entries matches the recorded count.
    pub fn check_integrity(&self) -> CrawlResult<()> {
        let mut seen = vec![false; self.capacity];
        let mut live = 0usize;

        for bucket in 0..self.bucket_count() {
            let mut slot = self.head_of(bucket);
            while slot != NIL {
                let index = slot as usize;
                if index >= self.next_unused {
                    return Err(CrawlError::AddressMapCorrupted(format!(
                        "bucket {bucket} links to unused slot {index}"
                    )));
                }
                if std::mem::replace(&mut seen[index], true) {
                    return Err(CrawlError::AddressMapCorrupted(format!(
                        "slot {index} is linked twice"
                    )));
                }
                if self.bucket_of(self.key_at(index)) != bucket {
                    return Err(CrawlError::AddressMapCorrupted(format!(
                        "key {:#x} chained under the wrong bucket {bucket}",
                        self.key_at(index)
                    )));
                }
                live += 1;
                slot = self.next_at(index);
            }
        }

        if live != self.count {
            return Err(CrawlError::AddressMapCorrupted(format!(
                "{live} reachable entries but count is {}",
                self.count
            )));
        }

        let mut free = 0usize;
        let mut slot = self.first_free;
        while slot != NIL {
            let index = slot as usize;
            if index >= self.next_unused || std::mem::replace(&mut seen[index], true) {
                return Err(CrawlError::AddressMapCorrupted(format!(
                    "free list reaches slot {index} twice or past the cursor"
                )));
            }
            free += 1;
            slot = self.next_at(index);
        }

        if live + free != self.next_unused {
            return Err(CrawlError::AddressMapCorrupted(format!(
                "{live} live and {free} free slots do not account for {} used slots",
                self.next_unused
            )));
        }
        Ok(())
    }
}

/// Iterator over `(address, index)` pairs in bucket order.
pub struct Iter<'a> {
    map: &'a AddressIndexMap,
    bucket: usize,
    slot: u32,
}

impl Iterator for Iter<'_> {
    type Item = (u64, ObjectIndex);

    fn next(&mut self) -> Option<Self::Item> {
        while self.slot == NIL {
            if self.bucket >= self.map.bucket_count() {
                return None;
            }
            self.slot = self.map.head_of(self.bucket);
            self.bucket += 1;
        }
        let index = self.slot as usize;
        self.slot = self.map.next_at(index);
        Some((self.map.key_at(index), ObjectIndex(self.map.value_at(index))))
    }
}

impl<'a> IntoIterator for &'a AddressIndexMap {
    type Item = (u64, ObjectIndex);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
