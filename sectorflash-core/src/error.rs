//! Sector store errors

use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

use crate::config::{ConfigError, LogicalId};

/// Flash device failure, reduced to what the store can act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashFault {
    /// Offset or length not aligned to the device granularity
    NotAligned,
    /// Access outside the device
    OutOfBounds,
    /// Device-specific failure (e.g. a worn-out block)
    Other,
}

impl From<NorFlashErrorKind> for FlashFault {
    fn from(kind: NorFlashErrorKind) -> Self {
        match kind {
            NorFlashErrorKind::NotAligned => FlashFault::NotAligned,
            NorFlashErrorKind::OutOfBounds => FlashFault::OutOfBounds,
            _ => FlashFault::Other,
        }
    }
}

/// Errors returned by sector store operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SectorError {
    /// Request would exceed the window capacity; nothing was written
    CapacityExceeded,
    /// Logical id has no physical block
    NotFound(LogicalId),
    /// Allocator found no free slot although the capacity check passed
    ///
    /// Indicates a corrupted index, never a normal full condition.
    NoFreeBlock,
    /// Read or write would cross the end of the logical sector
    OutOfBounds,
    /// Window rejected against the device
    InvalidConfig(ConfigError),
    /// Erase, program or read failed on the device
    Flash(FlashFault),
}

impl SectorError {
    /// Whether repeating the operation may succeed
    ///
    /// Only device-level failures qualify; alignment and bounds faults
    /// are programming errors and will fail again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SectorError::Flash(FlashFault::Other))
    }
}

impl From<ConfigError> for SectorError {
    fn from(e: ConfigError) -> Self {
        SectorError::InvalidConfig(e)
    }
}

impl From<FlashFault> for SectorError {
    fn from(e: FlashFault) -> Self {
        SectorError::Flash(e)
    }
}

/// Failed mount, handing back what the store was built from
#[derive(Debug)]
pub struct MountError<F, R> {
    pub error: SectorError,
    pub flash: F,
    pub rng: R,
}

impl<F, R> MountError<F, R> {
    pub fn into_parts(self) -> (SectorError, F, R) {
        (self.error, self.flash, self.rng)
    }
}

impl<F, R> From<MountError<F, R>> for SectorError {
    fn from(e: MountError<F, R>) -> Self {
        e.error
    }
}

impl<F, R> core::fmt::Display for MountError<F, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "mount failed: {}", self.error)
    }
}

/// Convert any device error into a store error
pub(crate) fn flash_err<E: NorFlashError>(e: E) -> SectorError {
    SectorError::Flash(e.kind().into())
}

impl core::fmt::Display for SectorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SectorError::CapacityExceeded => write!(f, "sector window is full"),
            SectorError::NotFound(id) => write!(f, "logical sector {} is not allocated", id),
            SectorError::NoFreeBlock => write!(f, "no free block despite free capacity"),
            SectorError::OutOfBounds => write!(f, "access crosses the end of the sector"),
            SectorError::InvalidConfig(e) => write!(f, "invalid flash window: {:?}", e),
            SectorError::Flash(e) => write!(f, "flash device error: {:?}", e),
        }
    }
}
