//! On-board QSPI flash as the sector store's NOR device
//!
//! The store addresses erase blocks from the start of flash, so the
//! configured window must sit above the firmware image.

use embassy_rp::clocks::RoscRng;
use embassy_rp::flash::{Blocking, Flash, ERASE_SIZE};
use embassy_rp::peripherals::FLASH;
use embassy_rp::Peri;
use sectorflash_core::{FlashConfig, MountError, SectorStore};

/// 2MB W25Q16 on the Pico
pub const FLASH_SIZE: usize = 2 * 1024 * 1024;

/// Flash erase size for RP2040
pub const FLASH_ERASE_SIZE: usize = ERASE_SIZE;

/// Blocking flash driver; the store does not need DMA
pub type BoardFlash<'d> = Flash<'d, FLASH, Blocking, FLASH_SIZE>;

/// Sector store over the on-board flash, randomized by the ring oscillator
pub type BoardStore<'d> = SectorStore<BoardFlash<'d>, RoscRng>;

/// Take the flash peripheral
pub fn board_flash(flash: Peri<'_, FLASH>) -> BoardFlash<'_> {
    Flash::new_blocking(flash)
}

/// Scan the window and create any logical sector missing from it
pub fn init_store(
    flash: Peri<'_, FLASH>,
    config: FlashConfig,
) -> Result<BoardStore<'_>, MountError<BoardFlash<'_>, RoscRng>> {
    SectorStore::init(board_flash(flash), RoscRng, config)
}

/// Scan the window and rebuild the index without creating sectors
///
/// A failed mount hands the driver back for a retry.
pub fn mount_store(
    flash: Peri<'_, FLASH>,
    config: FlashConfig,
) -> Result<BoardStore<'_>, MountError<BoardFlash<'_>, RoscRng>> {
    SectorStore::mount(board_flash(flash), RoscRng, config)
}
