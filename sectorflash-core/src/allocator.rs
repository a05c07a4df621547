//! Randomized slot allocation
//!
//! A new logical sector lands on a uniformly random slot of the window.
//! If that slot is taken the search walks upward to the last slot, then
//! downward from just below the starting point. Repeated allocations and
//! relocations therefore spread erase cycles over the whole window
//! instead of hammering its first free slots. Worst case is a full walk
//! of the window when it is nearly full.

use rand::{Rng, RngCore};

use crate::config::{Geometry, PhysicalAddress};
use crate::index::IndexMap;

/// Whether `requested` more sectors fit in the window
pub fn can_allocate(geometry: &Geometry, index: &IndexMap, requested: usize) -> bool {
    index
        .len()
        .checked_add(requested)
        .is_some_and(|total| total <= usize::from(geometry.logical_sectors()))
}

/// Find an unmapped slot, starting from a random one
///
/// Returns `None` only when every slot is mapped; callers check
/// [`can_allocate`] first.
pub fn find_free_slot<R: RngCore>(
    geometry: &Geometry,
    index: &IndexMap,
    rng: &mut R,
) -> Option<PhysicalAddress> {
    let start = rng.gen_range(0..geometry.logical_sectors());
    find_free_slot_from(geometry, index, start)
}

/// Search upward from slot `start`, then downward below it
pub fn find_free_slot_from(
    geometry: &Geometry,
    index: &IndexMap,
    start: u16,
) -> Option<PhysicalAddress> {
    let is_free = |slot: &u16| !index.is_physical_allocated(geometry.slot_address(*slot));

    (start..geometry.logical_sectors())
        .find(is_free)
        .or_else(|| (0..start).rev().find(is_free))
        .map(|slot| geometry.slot_address(slot))
}
