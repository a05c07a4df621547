//! Sector store: persistence and wear leveling
//!
//! Owns the flash device, the random source and the index. Every slot in
//! the window is either free (no signature) or carries a header naming
//! the logical sector it holds. The index is rebuilt from those headers
//! when the store is mounted and updated by every allocate, write and
//! free afterwards.
//!
//! # Write path
//!
//! A write produces a complete new image of the logical sector: the
//! header with an incremented write count followed by the payload at its
//! offset. Bytes outside the payload read back erased.
//!
//! When the window has a free slot the image goes to a random free slot
//! and the old slot is invalidated afterwards (dynamic wear leveling).
//! The header page is programmed last, so a torn image never carries a
//! valid signature. Losing power between committing the new copy and
//! invalidating the old one leaves two headers for the same id; the next
//! scan keeps the one with the newer write count. The index moves to the
//! new copy as soon as its header is programmed, so a retry after a
//! failed invalidation counts up from the newest header.
//!
//! A full window is rewritten in place. Power loss between the erase
//! and the header program loses that sector; the next scan sees a free
//! slot.

use alloc::vec::Vec;

use embedded_storage::nor_flash::NorFlash;
use rand::RngCore;

use crate::allocator;
use crate::config::{FlashConfig, Geometry, LogicalId, PhysicalAddress, PROGRAM_PAGE_SIZE};
use crate::error::{flash_err, MountError, SectorError};
use crate::header::{HeaderState, SectorHeader, ERASED_BYTE, HEADER_SIZE};
use crate::index::IndexMap;

/// What the mount scan found and repaired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanReport {
    /// Slots mapped from a valid header
    pub mapped: u16,
    /// Signed slots naming an id outside the window, erased
    pub stale: u16,
    /// Older copies of a duplicated id, erased
    pub duplicates: u16,
    /// Logical ids given a fresh slot by [`SectorStore::init`]
    pub filled: u16,
}

/// Wear-leveled logical sector store on a NOR flash window
pub struct SectorStore<F, R> {
    flash: F,
    rng: R,
    geometry: Geometry,
    index: IndexMap,
    report: ScanReport,
}

impl<F: NorFlash, R: RngCore> SectorStore<F, R> {
    /// Mount the window and give every logical id a slot
    ///
    /// Scans and repairs like [`SectorStore::mount`], then allocates a
    /// fresh slot with `write_count = 1` for every id in
    /// `0..logical_sectors` that has none. Afterwards the window is full.
    pub fn init(flash: F, rng: R, config: FlashConfig) -> Result<Self, MountError<F, R>> {
        let mut store = Self::mount(flash, rng, config)?;
        match store.fill_missing() {
            Ok(()) => Ok(store),
            Err(e) => Err(store.into_mount_error(e)),
        }
    }

    /// Mount the window and rebuild the index from slot headers
    ///
    /// Signed slots naming an id outside the window are erased. When two
    /// slots claim the same id the older copy is erased. Unsigned slots
    /// are free. No logical id is allocated.
    ///
    /// On failure the device and random source come back inside the
    /// [`MountError`] so the caller can retry or fall back.
    pub fn mount(flash: F, rng: R, config: FlashConfig) -> Result<Self, MountError<F, R>> {
        let geometry = match config.validate(F::ERASE_SIZE, F::WRITE_SIZE, flash.capacity()) {
            Ok(geometry) => geometry,
            Err(e) => {
                return Err(MountError {
                    error: e.into(),
                    flash,
                    rng,
                })
            }
        };

        let mut store = Self {
            flash,
            rng,
            geometry,
            index: IndexMap::with_logical_capacity(geometry.logical_sectors()),
            report: ScanReport::default(),
        };
        match store.scan() {
            Ok(()) => Ok(store),
            Err(e) => Err(store.into_mount_error(e)),
        }
    }

    fn into_mount_error(self, error: SectorError) -> MountError<F, R> {
        MountError {
            error,
            flash: self.flash,
            rng: self.rng,
        }
    }

    fn fill_missing(&mut self) -> Result<(), SectorError> {
        for id in 0..self.geometry.logical_sectors() {
            if self.index.is_logical_allocated(id) {
                continue;
            }
            let slot = self.find_free_slot()?;
            self.program_image(slot, SectorHeader::new(id), 0, &[])?;
            self.index.put(slot, id);
            self.report.filled += 1;
        }

        #[cfg(feature = "defmt")]
        if self.report.filled > 0 {
            defmt::debug!("Allocated {} missing logical sectors", self.report.filled);
        }
        Ok(())
    }

    fn scan(&mut self) -> Result<(), SectorError> {
        let geometry = self.geometry;
        let count = geometry.logical_sectors();

        for address in geometry.slots() {
            let header = match self.read_header(address)? {
                HeaderState::Valid(header) => header,
                HeaderState::Erased | HeaderState::Invalid => continue,
            };

            if header.logical_id >= count {
                #[cfg(feature = "defmt")]
                defmt::warn!(
                    "Slot {} names logical sector {} outside the window, erasing",
                    address,
                    header.logical_id
                );
                self.erase_slot(address)?;
                self.report.stale += 1;
                continue;
            }

            let Some(other) = self.index.get_physical(header.logical_id) else {
                self.index.put(address, header.logical_id);
                self.report.mapped += 1;
                continue;
            };

            // Interrupted relocation: keep the newer copy
            let keep_new = match self.read_header(other)? {
                HeaderState::Valid(existing) => header.is_newer_than(&existing),
                _ => true,
            };
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "Logical sector {} found in slots {} and {}",
                header.logical_id,
                other,
                address
            );
            if keep_new {
                self.erase_slot(other)?;
                self.index.put(address, header.logical_id);
            } else {
                self.erase_slot(address)?;
            }
            self.report.duplicates += 1;
        }

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "Scanned {} slots: {} mapped, {} stale, {} duplicates",
            count,
            self.report.mapped,
            self.report.stale,
            self.report.duplicates
        );

        Ok(())
    }

    /// Allocate `count` logical sectors
    ///
    /// Each new id is the lowest unallocated one and lands on a random
    /// free slot. Fails with [`SectorError::CapacityExceeded`] before any
    /// flash access if the window cannot hold them all. If the device
    /// fails midway, sectors allocated by this call are freed again.
    pub fn alloc(&mut self, count: usize) -> Result<Vec<LogicalId>, SectorError> {
        if !allocator::can_allocate(&self.geometry, &self.index, count) {
            return Err(SectorError::CapacityExceeded);
        }

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            match self.alloc_next() {
                Ok(id) => ids.push(id),
                Err(e) => {
                    // Best effort: the original error is what the caller needs
                    let _ = self.free(&ids);
                    return Err(e);
                }
            }
        }
        Ok(ids)
    }

    /// Allocate a single logical sector
    pub fn alloc_one(&mut self) -> Result<LogicalId, SectorError> {
        if !allocator::can_allocate(&self.geometry, &self.index, 1) {
            return Err(SectorError::CapacityExceeded);
        }
        self.alloc_next()
    }

    fn alloc_next(&mut self) -> Result<LogicalId, SectorError> {
        let id = (0..self.geometry.logical_sectors())
            .find(|id| !self.index.is_logical_allocated(*id))
            .ok_or(SectorError::CapacityExceeded)?;
        let slot = self.find_free_slot()?;

        self.program_image(slot, SectorHeader::new(id), 0, &[])?;
        self.index.put(slot, id);
        Ok(id)
    }

    /// Free every id in `ids`
    ///
    /// All ids are checked first; if one is not allocated nothing is
    /// freed. Ids need not be sorted or contiguous.
    pub fn free(&mut self, ids: &[LogicalId]) -> Result<(), SectorError> {
        if let Some(&missing) = ids.iter().find(|id| !self.index.is_logical_allocated(**id)) {
            return Err(SectorError::NotFound(missing));
        }

        for &id in ids {
            // Repeated ids were already handled
            if let Some(slot) = self.index.get_physical(id) {
                self.invalidate_slot(slot)?;
                self.index.remove_logical(id);
            }
        }
        Ok(())
    }

    /// Free a single logical sector
    pub fn free_one(&mut self, id: LogicalId) -> Result<(), SectorError> {
        self.free(&[id])
    }

    /// Free every allocated id in `first..=last`
    ///
    /// Unallocated ids in the range are skipped. Returns how many
    /// sectors were freed.
    pub fn free_range(&mut self, first: LogicalId, last: LogicalId) -> Result<usize, SectorError> {
        let slots: Vec<(LogicalId, PhysicalAddress)> = (first..=last)
            .filter_map(|id| self.index.get_physical(id).map(|slot| (id, slot)))
            .collect();

        for (done, &(_, slot)) in slots.iter().enumerate() {
            if let Err(e) = self.invalidate_slot(slot) {
                // Keep the index in step with what reached the flash
                for &(id, _) in &slots[..done] {
                    self.index.remove_logical(id);
                }
                return Err(e);
            }
        }

        Ok(self.index.remove_range(first, last))
    }

    /// Free every logical sector
    pub fn free_all(&mut self) -> Result<usize, SectorError> {
        self.free_range(0, self.geometry.logical_sectors() - 1)
    }

    /// Read `buf.len()` payload bytes starting at `offset`
    pub fn read(&mut self, id: LogicalId, offset: u32, buf: &mut [u8]) -> Result<(), SectorError> {
        let slot = self.get_physical(id)?;
        let start = self.payload_start(offset, buf.len())?;

        self.flash
            .read(self.geometry.byte_offset(slot) + start, buf)
            .map_err(flash_err)
    }

    /// Replace the contents of a logical sector with `data` at `offset`
    ///
    /// Moves the sector to a random free slot when one exists, otherwise
    /// rewrites it in place. The physical slot of `id` may change.
    pub fn write(&mut self, id: LogicalId, offset: u32, data: &[u8]) -> Result<(), SectorError> {
        let slot = self.get_physical(id)?;
        self.payload_start(offset, data.len())?;

        let header = match self.read_header(slot)? {
            HeaderState::Valid(header) if header.logical_id == id => header.next(),
            // Index and flash disagree; the index wins and the count restarts
            _ => SectorHeader::new(id),
        };

        if allocator::can_allocate(&self.geometry, &self.index, 1) {
            let target = self.find_free_slot()?;
            self.program_image(target, header, offset, data)?;
            // The new copy is committed; a failed invalidation must not
            // leave the index on the older one
            self.index.put(target, id);
            self.invalidate_slot(slot)?;
        } else {
            self.program_image(slot, header, offset, data)?;
        }
        Ok(())
    }

    /// Slot currently holding `id`
    pub fn get_physical(&self, id: LogicalId) -> Result<PhysicalAddress, SectorError> {
        self.index.get_physical(id).ok_or(SectorError::NotFound(id))
    }

    pub fn is_allocated(&self, id: LogicalId) -> bool {
        self.index.is_logical_allocated(id)
    }

    /// Write count stored in the header of `id`
    pub fn write_count(&mut self, id: LogicalId) -> Result<u16, SectorError> {
        let slot = self.get_physical(id)?;
        match self.read_header(slot)? {
            HeaderState::Valid(header) => Ok(header.write_count),
            _ => Err(SectorError::NotFound(id)),
        }
    }

    /// Allocated logical ids in ascending order
    pub fn allocated_ids(&self) -> impl Iterator<Item = LogicalId> + '_ {
        (0..self.geometry.logical_sectors()).filter(move |id| self.index.is_logical_allocated(*id))
    }

    /// Number of allocated logical sectors
    pub fn allocated_count(&self) -> usize {
        self.index.len()
    }

    /// Maximum number of logical sectors
    pub fn capacity(&self) -> usize {
        usize::from(self.geometry.logical_sectors())
    }

    /// Logical sector size in bytes, header included
    pub fn sector_size(&self) -> u32 {
        self.geometry.sector_size()
    }

    /// Usable payload bytes per logical sector
    pub fn payload_capacity(&self) -> u32 {
        self.geometry.sector_size() - HEADER_SIZE as u32
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn index(&self) -> &IndexMap {
        &self.index
    }

    /// Result of the mount scan
    pub fn scan_report(&self) -> ScanReport {
        self.report
    }

    /// Give back the device and random source
    pub fn release(self) -> (F, R) {
        (self.flash, self.rng)
    }

    fn find_free_slot(&mut self) -> Result<PhysicalAddress, SectorError> {
        allocator::find_free_slot(&self.geometry, &self.index, &mut self.rng).ok_or_else(|| {
            debug_assert!(false, "capacity check passed but no free slot");
            SectorError::NoFreeBlock
        })
    }

    /// Byte offset of a payload range inside a slot, bounds-checked
    fn payload_start(&self, offset: u32, len: usize) -> Result<u32, SectorError> {
        let start = u64::from(offset) + HEADER_SIZE as u64;
        if start + len as u64 > u64::from(self.geometry.sector_size()) {
            return Err(SectorError::OutOfBounds);
        }
        Ok(start as u32)
    }

    fn read_header(&mut self, slot: PhysicalAddress) -> Result<HeaderState, SectorError> {
        let mut bytes = [0u8; HEADER_SIZE];
        self.flash
            .read(self.geometry.byte_offset(slot), &mut bytes)
            .map_err(flash_err)?;
        Ok(SectorHeader::decode(&bytes))
    }

    fn erase_slot(&mut self, slot: PhysicalAddress) -> Result<(), SectorError> {
        let from = self.geometry.byte_offset(slot);
        let to = from + self.geometry.sector_size();
        critical_section::with(|_| self.flash.erase(from, to)).map_err(flash_err)
    }

    /// Program zeros over the header so the slot scans as free
    fn invalidate_slot(&mut self, slot: PhysicalAddress) -> Result<(), SectorError> {
        let zeros = [0u8; PROGRAM_PAGE_SIZE];
        let len = HEADER_SIZE.div_ceil(F::WRITE_SIZE) * F::WRITE_SIZE;
        let offset = self.geometry.byte_offset(slot);
        critical_section::with(|_| self.flash.write(offset, &zeros[..len])).map_err(flash_err)
    }

    /// Erase `slot` and program `header` plus `data` at payload `offset`
    ///
    /// Pages after the first go down before the header page, which is
    /// the commit point. Pages that would stay erased are skipped.
    fn program_image(
        &mut self,
        slot: PhysicalAddress,
        header: SectorHeader,
        offset: u32,
        data: &[u8],
    ) -> Result<(), SectorError> {
        let base = self.geometry.byte_offset(slot);
        let sector_size = self.geometry.sector_size();
        let header_bytes = header.encode();
        let payload_start = HEADER_SIZE + offset as usize;
        let image_len = payload_start + data.len();

        let flash = &mut self.flash;
        critical_section::with(|_| {
            flash.erase(base, base + sector_size)?;

            let mut page = [ERASED_BYTE; PROGRAM_PAGE_SIZE];
            let tail = (PROGRAM_PAGE_SIZE..image_len).step_by(PROGRAM_PAGE_SIZE);
            for page_start in tail.chain(core::iter::once(0)) {
                if fill_page(&mut page, page_start, &header_bytes, payload_start, data) {
                    flash.write(base + page_start as u32, &page)?;
                }
            }
            Ok::<(), F::Error>(())
        })
        .map_err(flash_err)
    }
}

/// Render the image bytes that fall in `[page_start, page_start + PAGE)`
///
/// Returns false if the page would be entirely erased.
fn fill_page(
    page: &mut [u8; PROGRAM_PAGE_SIZE],
    page_start: usize,
    header: &[u8; HEADER_SIZE],
    payload_start: usize,
    data: &[u8],
) -> bool {
    page.fill(ERASED_BYTE);
    let page_end = page_start + PROGRAM_PAGE_SIZE;

    if page_start < HEADER_SIZE {
        page[..HEADER_SIZE].copy_from_slice(header);
    }

    let payload_end = payload_start + data.len();
    let from = payload_start.max(page_start);
    let to = payload_end.min(page_end);
    if from < to {
        page[from - page_start..to - page_start]
            .copy_from_slice(&data[from - payload_start..to - payload_start]);
    }

    page.iter().any(|&b| b != ERASED_BYTE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GroupBy;
    use crate::error::FlashFault;
    use crate::mock::{MockFlash, MOCK_ERASE_SIZE};
    use alloc::collections::BTreeSet;
    use alloc::vec;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestStore = SectorStore<MockFlash, StdRng>;

    fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    fn mount(flash: MockFlash, config: FlashConfig) -> TestStore {
        SectorStore::mount(flash, rng(42), config).unwrap()
    }

    fn scenario_config() -> FlashConfig {
        FlashConfig::new(100, 15, GroupBy::One)
    }

    fn remount(store: TestStore, config: FlashConfig) -> TestStore {
        let (mut flash, _) = store.release();
        flash.restore_power();
        mount(flash, config)
    }

    #[test]
    fn test_alloc_scenario() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        let ids = store.alloc(5).unwrap();

        assert_eq!(ids.len(), 5);
        let unique: BTreeSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 5);

        let mut slots = BTreeSet::new();
        for &id in &ids {
            assert!(id < 15);
            let slot = store.get_physical(id).unwrap();
            assert!((100..=114).contains(&slot));
            assert!(slots.insert(slot));
        }
        assert_eq!(store.allocated_count(), 5);
    }

    #[test]
    fn test_capacity_boundary_without_io() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        assert_eq!(store.alloc(15).unwrap().len(), 15);

        let (mutations, reads) = (store.flash.mutations(), store.flash.reads());
        assert_eq!(store.alloc(1), Err(SectorError::CapacityExceeded));
        assert_eq!(store.alloc_one(), Err(SectorError::CapacityExceeded));
        assert_eq!(store.flash.mutations(), mutations);
        assert_eq!(store.flash.reads(), reads);
    }

    #[test]
    fn test_oversized_request_rejected_up_front() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        store.alloc(10).unwrap();
        let before = store.flash.mutations();

        assert_eq!(store.alloc(6), Err(SectorError::CapacityExceeded));
        assert_eq!(store.allocated_count(), 10);
        assert_eq!(store.flash.mutations(), before);
    }

    #[test]
    fn test_init_fills_every_id() {
        let store = SectorStore::init(MockFlash::new(128), rng(1), scenario_config()).unwrap();
        assert_eq!(store.allocated_count(), 15);
        assert_eq!(store.scan_report().filled, 15);

        let slots: BTreeSet<_> = (0..15).map(|id| store.get_physical(id).unwrap()).collect();
        assert_eq!(slots.len(), 15);
    }

    #[test]
    fn test_init_is_idempotent() {
        let store = SectorStore::init(MockFlash::new(128), rng(1), scenario_config()).unwrap();
        let before: Vec<_> = (0..15).map(|id| store.get_physical(id).unwrap()).collect();

        let (flash, _) = store.release();
        let store = SectorStore::init(flash, rng(2), scenario_config()).unwrap();
        let after: Vec<_> = (0..15).map(|id| store.get_physical(id).unwrap()).collect();

        assert_eq!(before, after);
        assert_eq!(store.scan_report().filled, 0);
        assert_eq!(store.scan_report().mapped, 15);
    }

    #[test]
    fn test_headers_written_on_alloc() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        let id = store.alloc_one().unwrap();
        let slot = store.get_physical(id).unwrap() as usize;

        let expected = SectorHeader::new(id).encode();
        assert_eq!(store.flash.contents(slot * MOCK_ERASE_SIZE, HEADER_SIZE), &expected);
        assert_eq!(store.write_count(id).unwrap(), 1);
    }

    #[test]
    fn test_mapping_survives_remount() {
        let config = FlashConfig::new(8, 12, GroupBy::Eight);
        let mut store = mount(MockFlash::new(8 + 12 * 8), config);
        let ids = store.alloc(7).unwrap();
        let before: Vec<_> = ids.iter().map(|&id| store.get_physical(id).unwrap()).collect();

        let store = remount(store, config);
        let after: Vec<_> = ids.iter().map(|&id| store.get_physical(id).unwrap()).collect();
        assert_eq!(before, after);
        assert_eq!(store.scan_report().mapped, 7);
    }

    #[test]
    fn test_write_read_round_trip() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        let id = store.alloc_one().unwrap();

        let data = [0xFA, 0xCA, 0xDA, 0xAA, 0xAA, 0x27, 0x06, 0x21];
        store.write(id, 0, &data).unwrap();

        let mut buf = [0u8; 8];
        store.read(id, 0, &mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!(store.write_count(id).unwrap(), 2);
    }

    #[test]
    fn test_write_spanning_pages_at_offset() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        let id = store.alloc_one().unwrap();

        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        store.write(id, 300, &data).unwrap();

        let mut buf = vec![0u8; 1000];
        store.read(id, 300, &mut buf).unwrap();
        assert_eq!(buf, data);

        // Outside the payload the sector reads erased
        let mut before = [0u8; 16];
        store.read(id, 284, &mut before).unwrap();
        assert_eq!(before, [0xFF; 16]);
    }

    #[test]
    fn test_write_replaces_previous_contents() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        let id = store.alloc_one().unwrap();

        store.write(id, 0, &[1, 2, 3, 4]).unwrap();
        store.write(id, 100, &[9, 9]).unwrap();

        let mut buf = [0u8; 4];
        store.read(id, 0, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 4]);
        let mut buf = [0u8; 2];
        store.read(id, 100, &mut buf).unwrap();
        assert_eq!(buf, [9, 9]);
        assert_eq!(store.write_count(id).unwrap(), 3);
    }

    #[test]
    fn test_write_relocates_when_space_free() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        let id = store.alloc_one().unwrap();
        let old = store.get_physical(id).unwrap();

        store.write(id, 0, &[7; 8]).unwrap();
        let new = store.get_physical(id).unwrap();

        assert_ne!(old, new);
        assert_eq!(store.allocated_count(), 1);
        assert!(!store.index().is_physical_allocated(old));
        // Old slot no longer scans as allocated
        assert_eq!(
            SectorHeader::decode(
                store
                    .flash
                    .contents(old as usize * MOCK_ERASE_SIZE, HEADER_SIZE)
                    .try_into()
                    .unwrap()
            ),
            HeaderState::Invalid
        );
    }

    #[test]
    fn test_write_in_place_when_full() {
        let mut store = SectorStore::init(MockFlash::new(128), rng(3), scenario_config()).unwrap();
        let before: Vec<_> = (0..15).map(|id| store.get_physical(id).unwrap()).collect();

        store.write(4, 16, &[0x11; 32]).unwrap();

        let after: Vec<_> = (0..15).map(|id| store.get_physical(id).unwrap()).collect();
        assert_eq!(before, after);
        let mut buf = [0u8; 32];
        store.read(4, 16, &mut buf).unwrap();
        assert_eq!(buf, [0x11; 32]);
    }

    #[test]
    fn test_mapping_stable_across_reads() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        let ids = store.alloc(4).unwrap();
        let before: Vec<_> = ids.iter().map(|&id| store.get_physical(id).unwrap()).collect();

        let mut buf = [0u8; 64];
        for &id in &ids {
            store.read(id, 0, &mut buf).unwrap();
            store.write_count(id).unwrap();
        }
        let after: Vec<_> = ids.iter().map(|&id| store.get_physical(id).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        let id = store.alloc_one().unwrap();
        let capacity = store.payload_capacity();
        assert_eq!(capacity, 4096 - 8);

        let mut buf = [0u8; 4];
        assert_eq!(store.read(id, capacity - 3, &mut buf), Err(SectorError::OutOfBounds));
        assert!(store.read(id, capacity - 4, &mut buf).is_ok());
        assert_eq!(store.write(id, capacity, &[1]), Err(SectorError::OutOfBounds));
        assert_eq!(store.read(id, u32::MAX, &mut buf), Err(SectorError::OutOfBounds));
    }

    #[test]
    fn test_not_found() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        let mut buf = [0u8; 4];
        assert_eq!(store.get_physical(3), Err(SectorError::NotFound(3)));
        assert_eq!(store.read(3, 0, &mut buf), Err(SectorError::NotFound(3)));
        assert_eq!(store.write(3, 0, &[1]), Err(SectorError::NotFound(3)));
        assert_eq!(store.free(&[3]), Err(SectorError::NotFound(3)));
    }

    #[test]
    fn test_free_then_realloc() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        let ids = store.alloc(3).unwrap();
        let freed = ids[1];

        store.free_one(freed).unwrap();
        assert!(!store.is_allocated(freed));
        assert_eq!(store.allocated_count(), 2);

        let id = store.alloc_one().unwrap();
        assert_eq!(id, freed);
        assert_eq!(store.index().iter().filter(|&(_, l)| l == id).count(), 1);
        assert_eq!(store.allocated_count(), 3);
    }

    #[test]
    fn test_free_is_set_based() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        store.alloc(8).unwrap();

        store.free(&[6, 1, 3]).unwrap();
        let left: Vec<_> = store.allocated_ids().collect();
        assert_eq!(left, vec![0, 2, 4, 5, 7]);

        // One missing id aborts the whole batch
        assert_eq!(store.free(&[0, 1]), Err(SectorError::NotFound(1)));
        assert!(store.is_allocated(0));
    }

    #[test]
    fn test_free_persists() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        store.alloc(6).unwrap();
        store.free(&[2, 4]).unwrap();

        let store = remount(store, scenario_config());
        let left: Vec<_> = store.allocated_ids().collect();
        assert_eq!(left, vec![0, 1, 3, 5]);
    }

    #[test]
    fn test_free_range_and_all() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        store.alloc(10).unwrap();
        store.free_one(5).unwrap();

        assert_eq!(store.free_range(3, 7).unwrap(), 4);
        let left: Vec<_> = store.allocated_ids().collect();
        assert_eq!(left, vec![0, 1, 2, 8, 9]);

        assert_eq!(store.free_all().unwrap(), 5);
        assert_eq!(store.allocated_count(), 0);

        let store = remount(store, scenario_config());
        assert_eq!(store.allocated_count(), 0);
    }

    #[test]
    fn test_stale_header_erased() {
        let config = scenario_config();
        let mut flash = MockFlash::new(128);
        let stale = SectorHeader {
            logical_id: 40,
            write_count: 3,
        };
        flash.poke(103 * MOCK_ERASE_SIZE, &stale.encode());
        flash.poke(103 * MOCK_ERASE_SIZE + 64, &[0x55; 16]);

        let store = mount(flash, config);
        assert_eq!(store.scan_report().stale, 1);
        assert_eq!(store.allocated_count(), 0);

        let (flash, _) = store.release();
        assert!(flash
            .contents(103 * MOCK_ERASE_SIZE, MOCK_ERASE_SIZE)
            .iter()
            .all(|&b| b == 0xFF));
    }

    #[test]
    fn test_duplicate_keeps_newer_copy() {
        let config = scenario_config();
        let mut flash = MockFlash::new(128);
        let old = SectorHeader {
            logical_id: 2,
            write_count: 9,
        };
        flash.poke(101 * MOCK_ERASE_SIZE, &old.encode());
        flash.poke(110 * MOCK_ERASE_SIZE, &old.next().encode());

        let store = mount(flash, config);
        assert_eq!(store.get_physical(2), Ok(110));
        assert_eq!(store.scan_report().duplicates, 1);
        assert_eq!(store.allocated_count(), 1);

        // Newer copy found first
        let mut flash = MockFlash::new(128);
        flash.poke(101 * MOCK_ERASE_SIZE, &old.next().encode());
        flash.poke(110 * MOCK_ERASE_SIZE, &old.encode());
        let store = mount(flash, config);
        assert_eq!(store.get_physical(2), Ok(101));
    }

    #[test]
    fn test_power_loss_during_relocation() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        let id = store.alloc_one().unwrap();
        store.write(id, 0, &[1, 2, 3, 4]).unwrap();
        let slot = store.get_physical(id).unwrap();

        // Target erased, header page never programmed
        store.flash.power_loss_after(1);
        assert_eq!(
            store.write(id, 0, &[5, 6, 7, 8]),
            Err(SectorError::Flash(FlashFault::Other))
        );

        let mut store = remount(store, scenario_config());
        assert_eq!(store.allocated_count(), 1);
        assert_eq!(store.get_physical(id), Ok(slot));
        let mut buf = [0u8; 4];
        store.read(id, 0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_power_loss_before_invalidating_old_copy() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        let id = store.alloc_one().unwrap();
        store.write(id, 0, &[1, 2, 3, 4]).unwrap();

        // Erase + one header page succeed, old header stays signed
        store.flash.power_loss_after(2);
        assert!(store.write(id, 0, &[5, 6, 7, 8]).is_err());

        let mut store = remount(store, scenario_config());
        assert_eq!(store.scan_report().duplicates, 1);
        assert_eq!(store.allocated_count(), 1);
        let mut buf = [0u8; 4];
        store.read(id, 0, &mut buf).unwrap();
        assert_eq!(buf, [5, 6, 7, 8]);
        assert_eq!(store.write_count(id).unwrap(), 3);
    }

    #[test]
    fn test_power_loss_during_in_place_write() {
        let config = scenario_config();
        let mut store = SectorStore::init(MockFlash::new(128), rng(5), config).unwrap();
        let slot = store.get_physical(7).unwrap();

        store.flash.power_loss_after(1);
        assert!(store.write(7, 0, &[1; 16]).is_err());

        // The erased slot scans as free and nothing else moves
        let (mut flash, _) = store.release();
        flash.restore_power();
        let store = SectorStore::mount(flash, rng(6), config).unwrap();
        assert!(!store.is_allocated(7));
        assert!(!store.index().is_physical_allocated(slot));
        assert_eq!(store.allocated_count(), 14);

        let (flash, _) = store.release();
        let store = SectorStore::init(flash, rng(7), config).unwrap();
        assert_eq!(store.scan_report().filled, 1);
        let slots: BTreeSet<_> = (0..15).map(|id| store.get_physical(id).unwrap()).collect();
        assert_eq!(slots.len(), 15);
    }

    #[test]
    fn test_failed_invalidation_keeps_new_copy() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        let id = store.alloc_one().unwrap();
        store.write(id, 0, &[1; 4]).unwrap();

        // Erase and header page succeed, invalidating the old slot fails
        store.flash.fail_operation_after(2);
        assert_eq!(
            store.write(id, 0, &[2; 4]),
            Err(SectorError::Flash(FlashFault::Other))
        );
        let mut buf = [0u8; 4];
        store.read(id, 0, &mut buf).unwrap();
        assert_eq!(buf, [2; 4]);

        store.write(id, 0, &[3; 4]).unwrap();
        store.read(id, 0, &mut buf).unwrap();
        assert_eq!(buf, [3; 4]);
        assert_eq!(store.write_count(id).unwrap(), 4);

        let mut store = remount(store, scenario_config());
        assert_eq!(store.allocated_count(), 1);
        store.read(id, 0, &mut buf).unwrap();
        assert_eq!(buf, [3; 4]);
    }

    #[test]
    fn test_failed_alloc_rolls_back() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        store.alloc(2).unwrap();

        // Third allocation of the batch fails on its erase
        store.flash.fail_operation_after(4);
        assert!(store.alloc(3).is_err());

        assert_eq!(store.allocated_count(), 2);
    }

    #[test]
    fn test_injected_failure_is_retryable() {
        let mut store = mount(MockFlash::new(128), scenario_config());
        let id = store.alloc_one().unwrap();

        store.flash.fail_next_operation();
        let err = store.write(id, 0, &[1, 2]).unwrap_err();
        assert!(err.is_retryable());

        store.write(id, 0, &[1, 2]).unwrap();
        let mut buf = [0u8; 2];
        store.read(id, 0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
    }

    #[test]
    fn test_rejects_window_past_flash() {
        let result = SectorStore::mount(MockFlash::new(100), rng(0), scenario_config());
        assert!(matches!(
            result,
            Err(MountError {
                error: SectorError::InvalidConfig(crate::config::ConfigError::OutOfFlash),
                ..
            })
        ));
    }

    #[test]
    fn test_failed_mount_returns_device() {
        let config = scenario_config();
        let mut flash = MockFlash::new(128);
        flash.poke(
            106 * MOCK_ERASE_SIZE,
            &SectorHeader {
                logical_id: 20,
                write_count: 1,
            }
            .encode(),
        );
        flash.poke(108 * MOCK_ERASE_SIZE, &SectorHeader::new(3).encode());

        // Erasing the stale slot fails
        flash.fail_next_operation();
        let (error, flash, rng) = match SectorStore::mount(flash, rng(8), config) {
            Ok(_) => panic!("mount should fail"),
            Err(e) => e.into_parts(),
        };
        assert!(error.is_retryable());

        let store = SectorStore::mount(flash, rng, config).unwrap();
        assert_eq!(store.scan_report().stale, 1);
        assert_eq!(store.get_physical(3), Ok(108));
    }

    #[test]
    fn test_failed_init_returns_device() {
        let config = scenario_config();
        let mut flash = MockFlash::new(128);
        flash.fail_next_operation();
        let Err(e) = SectorStore::init(flash, rng(9), config) else {
            panic!("init should fail");
        };
        assert_eq!(e.error, SectorError::Flash(FlashFault::Other));

        let store = SectorStore::init(e.flash, e.rng, config).unwrap();
        assert_eq!(store.allocated_count(), 15);
    }

    #[test]
    fn test_grouped_sectors() {
        let config = FlashConfig::new(16, 4, GroupBy::Sixteen);
        let mut store = mount(MockFlash::new(16 + 4 * 16), config);
        assert_eq!(store.sector_size(), 16 * 4096);

        let ids = store.alloc(2).unwrap();
        for &id in &ids {
            let slot = store.get_physical(id).unwrap();
            assert_eq!((slot - 16) % 16, 0);
        }

        let data = vec![0xA5; 20_000];
        store.write(ids[0], 40_000, &data).unwrap();
        let mut buf = vec![0u8; 20_000];
        store.read(ids[0], 40_000, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn test_writes_spread_wear() {
        let config = FlashConfig::new(0, 16, GroupBy::One);
        let mut store = mount(MockFlash::new(16), config);
        let id = store.alloc_one().unwrap();
        for i in 0..200u8 {
            store.write(id, 0, &[i; 4]).unwrap();
        }

        let (flash, _) = store.release();
        let touched = (0..16).filter(|&b| flash.erase_count(b) > 0).count();
        let worst = (0..16).map(|b| flash.erase_count(b)).max().unwrap();
        assert!(touched >= 12);
        assert!(worst < 60);
    }

    #[test]
    fn test_fill_page() {
        let header = SectorHeader::new(1).encode();
        let mut page = [0u8; PROGRAM_PAGE_SIZE];

        // Payload straddling the first and second pages
        let data = [0x42; 20];
        assert!(fill_page(&mut page, 0, &header, 250, &data));
        assert_eq!(&page[..HEADER_SIZE], &header);
        assert_eq!(&page[250..], &[0x42; 6]);

        assert!(fill_page(&mut page, 256, &header, 250, &data));
        assert_eq!(&page[..14], &[0x42; 14]);
        assert_eq!(page[14], 0xFF);

        assert!(!fill_page(&mut page, 512, &header, 250, &data));
    }
}
