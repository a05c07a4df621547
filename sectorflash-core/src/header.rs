//! On-flash sector header
//!
//! Every allocated slot starts with an 8-byte header:
//!
//! ```text
//! ┌───────────────┬────────────┬─────────────┐
//! │ SIGNATURE     │ LOGICAL ID │ WRITE COUNT │
//! │ 4B LE         │ 2B LE      │ 2B LE       │
//! └───────────────┴────────────┴─────────────┘
//! ```
//!
//! The signature is the only allocation marker. Erased flash reads as
//! all-ones and a freed slot has its header programmed to zero, so neither
//! can be mistaken for a valid header.

use crate::config::LogicalId;

/// Header magic
pub const SIGNATURE: u32 = 0x2706_2021;

/// Encoded header length in bytes
pub const HEADER_SIZE: usize = 8;

/// Value of an erased flash byte
pub const ERASED_BYTE: u8 = 0xFF;

const _: () = assert!(SIGNATURE != u32::MAX, "signature must differ from erased flash");
const _: () = assert!(SIGNATURE != 0, "signature must differ from an invalidated header");

/// Decoded header contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SectorHeader {
    /// Logical sector stored in this slot
    pub logical_id: LogicalId,
    /// Number of times the logical sector has been written, wrapping
    pub write_count: u16,
}

/// Classification of the first bytes of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeaderState {
    /// All header bytes erased
    Erased,
    /// No signature: freed, torn, or never formatted
    Invalid,
    /// Signature present
    Valid(SectorHeader),
}

impl SectorHeader {
    /// Header for a freshly allocated slot
    pub fn new(logical_id: LogicalId) -> Self {
        Self {
            logical_id,
            write_count: 1,
        }
    }

    /// Header for the next write of the same logical sector
    pub fn next(&self) -> Self {
        Self {
            logical_id: self.logical_id,
            write_count: self.write_count.wrapping_add(1),
        }
    }

    /// Whether `self` was written after `other`
    ///
    /// Serial number comparison, so a counter that wrapped past zero is
    /// still newer than one just below `u16::MAX`.
    pub fn is_newer_than(&self, other: &SectorHeader) -> bool {
        (self.write_count.wrapping_sub(other.write_count) as i16) > 0
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&SIGNATURE.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.logical_id.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.write_count.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> HeaderState {
        if bytes.iter().all(|&b| b == ERASED_BYTE) {
            return HeaderState::Erased;
        }

        let signature = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if signature != SIGNATURE {
            return HeaderState::Invalid;
        }

        HeaderState::Valid(SectorHeader {
            logical_id: u16::from_le_bytes([bytes[4], bytes[5]]),
            write_count: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }
}
