//! In-memory NOR flash for host-side tests
//!
//! Behaves like a real NOR part where it matters to the sector store:
//! - Erase sets whole blocks to `0xFF`
//! - Programming can only clear bits (`old & new`)
//! - Offsets must respect `WRITE_SIZE` / `ERASE_SIZE` alignment
//!
//! It also counts operations and can simulate losing power after a
//! given number of erase/program calls.

use alloc::vec;
use alloc::vec::Vec;

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

/// Erase block size, matching the RP2040 QSPI flash
pub const MOCK_ERASE_SIZE: usize = 4096;

/// Program granularity; coarser than the RP2040 to catch misaligned writes
pub const MOCK_WRITE_SIZE: usize = 4;

/// Mock flash errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFlashError {
    NotAligned,
    OutOfBounds,
    /// Operation attempted after simulated power loss
    PowerLoss,
    /// Injected device failure
    Failed,
}

impl NorFlashError for MockFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            MockFlashError::NotAligned => NorFlashErrorKind::NotAligned,
            MockFlashError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            MockFlashError::PowerLoss | MockFlashError::Failed => NorFlashErrorKind::Other,
        }
    }
}

/// In-memory NOR flash device
#[derive(Debug, Clone)]
pub struct MockFlash {
    storage: Vec<u8>,
    erase_counts: Vec<u32>,
    erases: usize,
    writes: usize,
    reads: usize,
    /// Mutating operations still allowed before power is cut
    power_budget: Option<usize>,
    /// Successful mutations left before one injected failure
    fail_after: Option<usize>,
}

impl MockFlash {
    /// Create an erased device of `blocks` erase blocks
    pub fn new(blocks: usize) -> Self {
        Self {
            storage: vec![0xFF; blocks * MOCK_ERASE_SIZE],
            erase_counts: vec![0; blocks],
            erases: 0,
            writes: 0,
            reads: 0,
            power_budget: None,
            fail_after: None,
        }
    }

    /// Raw view of device contents
    pub fn contents(&self, offset: usize, len: usize) -> &[u8] {
        &self.storage[offset..offset + len]
    }

    /// Overwrite bytes directly, bypassing NOR rules
    pub fn poke(&mut self, offset: usize, bytes: &[u8]) {
        self.storage[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Erase cycles seen by `block`
    pub fn erase_count(&self, block: usize) -> u32 {
        self.erase_counts[block]
    }

    /// Number of erase calls
    pub fn erases(&self) -> usize {
        self.erases
    }

    /// Number of program calls
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Number of read calls
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Total mutating operations performed
    pub fn mutations(&self) -> usize {
        self.erases + self.writes
    }

    /// Cut power after `ops` more erase/program calls succeed
    pub fn power_loss_after(&mut self, ops: usize) {
        self.power_budget = Some(ops);
    }

    /// Power the device back on
    pub fn restore_power(&mut self) {
        self.power_budget = None;
    }

    /// Make the next erase or program fail without touching the array
    pub fn fail_next_operation(&mut self) {
        self.fail_operation_after(0);
    }

    /// Let `ops` more erase/program calls succeed, then fail one
    pub fn fail_operation_after(&mut self, ops: usize) {
        self.fail_after = Some(ops);
    }

    fn begin_mutation(&mut self) -> Result<(), MockFlashError> {
        match self.fail_after {
            Some(0) => {
                self.fail_after = None;
                return Err(MockFlashError::Failed);
            }
            Some(n) => self.fail_after = Some(n - 1),
            None => {}
        }
        match self.power_budget {
            Some(0) => Err(MockFlashError::PowerLoss),
            Some(n) => {
                self.power_budget = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl ErrorType for MockFlash {
    type Error = MockFlashError;
}

impl ReadNorFlash for MockFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let end = start
            .checked_add(bytes.len())
            .ok_or(MockFlashError::OutOfBounds)?;
        if end > self.storage.len() {
            return Err(MockFlashError::OutOfBounds);
        }
        self.reads += 1;
        bytes.copy_from_slice(&self.storage[start..end]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.storage.len()
    }
}

impl NorFlash for MockFlash {
    const WRITE_SIZE: usize = MOCK_WRITE_SIZE;
    const ERASE_SIZE: usize = MOCK_ERASE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let (from, to) = (from as usize, to as usize);
        if from % MOCK_ERASE_SIZE != 0 || to % MOCK_ERASE_SIZE != 0 || from > to {
            return Err(MockFlashError::NotAligned);
        }
        if to > self.storage.len() {
            return Err(MockFlashError::OutOfBounds);
        }
        self.begin_mutation()?;
        self.erases += 1;

        self.storage[from..to].fill(0xFF);
        for block in from / MOCK_ERASE_SIZE..to / MOCK_ERASE_SIZE {
            self.erase_counts[block] += 1;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        if start % MOCK_WRITE_SIZE != 0 || bytes.len() % MOCK_WRITE_SIZE != 0 {
            return Err(MockFlashError::NotAligned);
        }
        if start + bytes.len() > self.storage.len() {
            return Err(MockFlashError::OutOfBounds);
        }
        self.begin_mutation()?;
        self.writes += 1;

        for (cell, byte) in self.storage[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }
}
