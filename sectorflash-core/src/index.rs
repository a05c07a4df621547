//! Physical block ↔ logical sector index
//!
//! A chained hash table keyed by physical address, plus a dense reverse
//! table keyed by logical id. The allocator asks "is this block taken"
//! on every search step and reads/writes ask "where does this id live",
//! so both directions are kept O(1) instead of scanning buckets for a
//! value. The reverse table costs one `Option<u32>` per logical id.

use alloc::vec;
use alloc::vec::Vec;
use core::mem::size_of;

use crate::config::{LogicalId, PhysicalAddress};

/// Bucket count of an empty map
const INITIAL_BUCKETS: usize = 2;

/// Grow once `len / buckets` exceeds 3/4
const LOAD_NUM: usize = 3;
const LOAD_DEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    physical: PhysicalAddress,
    logical: LogicalId,
}

/// In-memory mapping between physical slots and logical sectors
#[derive(Debug, Clone)]
pub struct IndexMap {
    buckets: Vec<Vec<Entry>>,
    reverse: Vec<Option<PhysicalAddress>>,
    len: usize,
}

impl Default for IndexMap {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexMap {
    pub fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); INITIAL_BUCKETS],
            reverse: Vec::new(),
            len: 0,
        }
    }

    /// Create a map whose reverse table already covers `logical_sectors` ids
    pub fn with_logical_capacity(logical_sectors: u16) -> Self {
        let mut map = Self::new();
        map.reverse.resize(usize::from(logical_sectors), None);
        map
    }

    /// Number of mapped blocks
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current number of hash buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_of(&self, physical: PhysicalAddress) -> usize {
        physical as usize % self.buckets.len()
    }

    /// Map `physical` to `logical`
    ///
    /// A logical id lives in at most one block: if `logical` was mapped
    /// elsewhere, that entry is dropped and its address returned. If
    /// `physical` held another id, that id becomes unmapped.
    pub fn put(&mut self, physical: PhysicalAddress, logical: LogicalId) -> Option<PhysicalAddress> {
        let previous = match self.get_physical(logical) {
            Some(old) if old != physical => {
                self.remove_physical(old);
                Some(old)
            }
            _ => None,
        };

        if self.len * LOAD_DEN > self.buckets.len() * LOAD_NUM {
            self.grow();
        }

        let idx = self.bucket_of(physical);
        let displaced = match self.buckets[idx].iter_mut().find(|e| e.physical == physical) {
            Some(entry) => {
                let displaced = entry.logical;
                entry.logical = logical;
                Some(displaced)
            }
            None => {
                self.buckets[idx].push(Entry { physical, logical });
                self.len += 1;
                None
            }
        };

        if let Some(displaced) = displaced {
            if displaced != logical {
                self.reverse[usize::from(displaced)] = None;
            }
        }

        let slot = usize::from(logical);
        if slot >= self.reverse.len() {
            self.reverse.resize(slot + 1, None);
        }
        self.reverse[slot] = Some(physical);

        previous
    }

    /// Block currently holding `logical`
    pub fn get_physical(&self, logical: LogicalId) -> Option<PhysicalAddress> {
        self.reverse.get(usize::from(logical)).copied().flatten()
    }

    /// Logical id stored in `physical`
    pub fn get_logical(&self, physical: PhysicalAddress) -> Option<LogicalId> {
        self.buckets[self.bucket_of(physical)]
            .iter()
            .find(|e| e.physical == physical)
            .map(|e| e.logical)
    }

    pub fn is_physical_allocated(&self, physical: PhysicalAddress) -> bool {
        self.get_logical(physical).is_some()
    }

    pub fn is_logical_allocated(&self, logical: LogicalId) -> bool {
        self.get_physical(logical).is_some()
    }

    /// Unmap `logical`, returning the block it occupied
    pub fn remove_logical(&mut self, logical: LogicalId) -> Option<PhysicalAddress> {
        let physical = self.get_physical(logical)?;
        self.remove_physical(physical);
        Some(physical)
    }

    fn remove_physical(&mut self, physical: PhysicalAddress) -> Option<LogicalId> {
        let idx = self.bucket_of(physical);
        let pos = self.buckets[idx].iter().position(|e| e.physical == physical)?;
        let entry = self.buckets[idx].swap_remove(pos);
        self.len -= 1;
        self.reverse[usize::from(entry.logical)] = None;
        Some(entry.logical)
    }

    /// Unmap every entry whose logical id is in `start..=end`
    ///
    /// Returns the number of entries removed.
    pub fn remove_range(&mut self, start: LogicalId, end: LogicalId) -> usize {
        let mut removed = 0;
        for bucket in self.buckets.iter_mut() {
            bucket.retain(|e| {
                let hit = (start..=end).contains(&e.logical);
                if hit {
                    removed += 1;
                }
                !hit
            });
        }

        let last = usize::from(end).min(self.reverse.len().saturating_sub(1));
        for slot in usize::from(start)..=last {
            if let Some(entry) = self.reverse.get_mut(slot) {
                *entry = None;
            }
        }

        self.len -= removed;
        removed
    }

    /// Iterate over `(physical, logical)` pairs in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (PhysicalAddress, LogicalId)> + '_ {
        self.buckets
            .iter()
            .flat_map(|b| b.iter().map(|e| (e.physical, e.logical)))
    }

    /// Approximate heap and inline footprint in bytes
    pub fn memory_usage(&self) -> usize {
        let chains: usize = self
            .buckets
            .iter()
            .map(|b| b.capacity() * size_of::<Entry>())
            .sum();

        size_of::<Self>()
            + self.buckets.capacity() * size_of::<Vec<Entry>>()
            + chains
            + self.reverse.capacity() * size_of::<Option<PhysicalAddress>>()
    }

    /// Double the bucket count and rehash every entry
    fn grow(&mut self) {
        let new_count = self.buckets.len() * 2;
        let mut buckets: Vec<Vec<Entry>> = vec![Vec::new(); new_count];
        for entry in self.buckets.drain(..).flatten() {
            buckets[entry.physical as usize % new_count].push(entry);
        }
        self.buckets = buckets;
    }
}
