//! Sector store configuration
//!
//! Describes the flash window handed to the sector store and how many
//! erase blocks make up one logical sector.
//!
//! Physical addresses are expressed in erase blocks, not bytes. A store
//! configured with `lower_bound = 100`, `logical_sectors = 15` and
//! `GroupBy::Eight` owns the blocks `100, 108, 116, ... 212`, each slot
//! spanning eight consecutive erase blocks.

/// Caller-visible logical sector identifier, `0..logical_sectors`
pub type LogicalId = u16;

/// Erase-block index of the first block of a slot
pub type PhysicalAddress = u32;

/// Program granularity used when writing sector images
///
/// Matches the RP2040 QSPI flash page. The device `WRITE_SIZE` must divide
/// it and `ERASE_SIZE` must be a multiple of it.
pub const PROGRAM_PAGE_SIZE: usize = 256;

/// How many erase blocks form one logical sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum GroupBy {
    /// 4 KiB logical sectors on a 4 KiB erase block device
    One = 1,
    /// 32 KiB logical sectors
    Eight = 8,
    /// 64 KiB logical sectors
    Sixteen = 16,
    /// 256 KiB logical sectors
    SixtyFour = 64,
}

impl GroupBy {
    /// Number of erase blocks per logical sector
    pub const fn blocks(self) -> u32 {
        self as u32
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// `logical_sectors` is zero
    NoSectors,
    /// The window extends past the end of the flash device
    OutOfFlash,
    /// Address arithmetic overflowed
    Overflow,
    /// Device program granularity does not divide the program page
    UnsupportedWriteSize,
    /// Device erase block is not a whole number of program pages
    UnsupportedEraseSize,
}

/// Flash window handed to the sector store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlashConfig {
    /// First erase block owned by the store (inclusive)
    pub lower_bound: PhysicalAddress,
    /// Number of logical sectors, which is also the number of slots in the window
    pub logical_sectors: u16,
    /// Erase blocks per logical sector
    pub group_by: GroupBy,
}

impl FlashConfig {
    pub const fn new(lower_bound: PhysicalAddress, logical_sectors: u16, group_by: GroupBy) -> Self {
        Self {
            lower_bound,
            logical_sectors,
            group_by,
        }
    }

    /// Check the window against a device and resolve its geometry
    ///
    /// # Arguments
    /// - `erase_size`: device erase block size in bytes
    /// - `write_size`: device program granularity in bytes
    /// - `capacity`: device size in bytes
    pub fn validate(
        &self,
        erase_size: usize,
        write_size: usize,
        capacity: usize,
    ) -> Result<Geometry, ConfigError> {
        if self.logical_sectors == 0 {
            return Err(ConfigError::NoSectors);
        }
        if write_size == 0 || PROGRAM_PAGE_SIZE % write_size != 0 {
            return Err(ConfigError::UnsupportedWriteSize);
        }
        if erase_size == 0 || erase_size % PROGRAM_PAGE_SIZE != 0 {
            return Err(ConfigError::UnsupportedEraseSize);
        }

        let erase_size = u32::try_from(erase_size).map_err(|_| ConfigError::Overflow)?;
        let group_by = self.group_by.blocks();

        let upper_bound = u32::from(self.logical_sectors - 1)
            .checked_mul(group_by)
            .and_then(|span| span.checked_add(self.lower_bound))
            .ok_or(ConfigError::Overflow)?;

        // One past the last byte of the last slot
        let end = (u64::from(upper_bound) + u64::from(group_by)) * u64::from(erase_size);

        if end > capacity as u64 {
            return Err(ConfigError::OutOfFlash);
        }
        if end > u64::from(u32::MAX) + 1 {
            return Err(ConfigError::Overflow);
        }

        Ok(Geometry {
            lower_bound: self.lower_bound,
            upper_bound,
            logical_sectors: self.logical_sectors,
            group_by: self.group_by,
            erase_size,
        })
    }
}

/// Resolved layout of a validated window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Geometry {
    lower_bound: PhysicalAddress,
    upper_bound: PhysicalAddress,
    logical_sectors: u16,
    group_by: GroupBy,
    erase_size: u32,
}

impl Geometry {
    /// First slot address (inclusive)
    pub fn lower_bound(&self) -> PhysicalAddress {
        self.lower_bound
    }

    /// Last slot address (inclusive)
    pub fn upper_bound(&self) -> PhysicalAddress {
        self.upper_bound
    }

    /// Number of logical sectors (and slots)
    pub fn logical_sectors(&self) -> u16 {
        self.logical_sectors
    }

    pub fn group_by(&self) -> GroupBy {
        self.group_by
    }

    /// Logical sector size in bytes, header included
    pub fn sector_size(&self) -> u32 {
        self.group_by.blocks() * self.erase_size
    }

    /// Address of the slot at `index` (`0..logical_sectors`)
    pub fn slot_address(&self, index: u16) -> PhysicalAddress {
        self.lower_bound + u32::from(index) * self.group_by.blocks()
    }

    /// Slot index of `address`, if it is a slot start inside the window
    pub fn slot_index(&self, address: PhysicalAddress) -> Option<u16> {
        if address < self.lower_bound || address > self.upper_bound {
            return None;
        }
        let delta = address - self.lower_bound;
        if delta % self.group_by.blocks() != 0 {
            return None;
        }
        u16::try_from(delta / self.group_by.blocks()).ok()
    }

    /// Byte offset of a slot on the device
    pub fn byte_offset(&self, address: PhysicalAddress) -> u32 {
        address * self.erase_size
    }

    /// Iterate over every slot address in ascending order
    pub fn slots(&self) -> impl Iterator<Item = PhysicalAddress> + '_ {
        (0..self.logical_sectors).map(move |i| self.slot_address(i))
    }
}
