//! Wear-leveled logical sectors on raw NOR flash
//!
//! This crate manages a window of a NOR flash device as a set of
//! fixed-size logical sectors. Callers address sectors by a stable
//! [`LogicalId`]; the store decides which physical erase blocks hold
//! them and moves them around on write to spread erase cycles.
//!
//! - Index map between physical slots and logical ids
//! - Randomized slot allocator with a linear search
//! - On-flash sector headers, rebuilt into the index on mount
//! - Repair of stale and duplicated headers after power loss
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  SectorStore (alloc / read / write /    │
//! │               free, mount scan)         │
//! └─────────────────────────────────────────┘
//!          │                 │
//!          ▼                 ▼
//! ┌─────────────────┐ ┌─────────────────────┐
//! │ allocator +     │ │ header codec        │
//! │ IndexMap        │ │                     │
//! └─────────────────┘ └─────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────┐
//! │  embedded_storage::nor_flash::NorFlash  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Any `NorFlash` implementation can back the store: the RP2040 QSPI
//! flash via `sectorflash-hal-rp2040`, or [`mock::MockFlash`] on the host.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

pub mod allocator;
pub mod config;
pub mod error;
pub mod header;
pub mod index;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod store;

pub use config::{FlashConfig, Geometry, GroupBy, LogicalId, PhysicalAddress};
pub use error::{FlashFault, MountError, SectorError};
pub use header::{SectorHeader, HEADER_SIZE, SIGNATURE};
pub use index::IndexMap;
pub use store::{ScanReport, SectorStore};
