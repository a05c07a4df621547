//! RP2040 bindings for the sector store
//!
//! - On-board QSPI flash as the store's NOR device
//! - Ring-oscillator RNG as the slot allocator's random source
//! - ADC inputs behind the drivers' `AdcReader` trait

#![no_std]
#![deny(unsafe_code)]

pub mod adc;
pub mod flash;

pub use adc::{AdcChannel, BoardAdc};
pub use flash::{BoardFlash, BoardStore, FLASH_ERASE_SIZE, FLASH_SIZE};
