//! Allocate/write/read walkthrough on the sector store

use defmt::*;
use embassy_time::Instant;
use sectorflash_core::SectorError;
use sectorflash_hal_rp2040::BoardStore;

/// Sectors allocated by the walkthrough
const DEMO_SECTORS: usize = 5;

/// Payload written to the first demo sector
const TEST_PATTERN: [u8; 8] = [0xFA, 0xCA, 0xDA, 0xAA, 0xAA, 0x27, 0x06, 0x21];

/// Bytes dumped before and after the write
const DUMP_LEN: usize = 16;

pub fn run(store: &mut BoardStore<'_>) -> Result<(), SectorError> {
    if store.allocated_count() + DEMO_SECTORS > store.capacity() {
        let freed = store.free_all()?;
        info!("Freed {} sectors to make room", freed);
    }

    let start = Instant::now();
    let ids = store.alloc(DEMO_SECTORS)?;
    info!(
        "Allocated {} sectors in {} us",
        ids.len(),
        start.elapsed().as_micros()
    );

    for &id in &ids {
        info!("id: {} block: {}", id, store.get_physical(id)?);
    }
    info!(
        "Index map uses {} bytes, {} bytes payload per sector",
        store.index().memory_usage(),
        store.payload_capacity()
    );

    let Some(&first) = ids.first() else {
        return Ok(());
    };

    let mut dump = [0u8; DUMP_LEN];
    store.read(first, 0, &mut dump)?;
    info!("id {} before write: {:02x}", first, dump);

    let start = Instant::now();
    store.write(first, 0, &TEST_PATTERN)?;
    let elapsed = start.elapsed().as_micros();

    store.read(first, 0, &mut dump)?;
    info!(
        "id {} after write: {:02x} (block {}, write #{}, {} us)",
        first,
        dump,
        store.get_physical(first)?,
        store.write_count(first)?,
        elapsed
    );

    Ok(())
}
