//! Sector store demo firmware
//!
//! Mounts the wear-leveled sector store on the Pico's QSPI flash, walks
//! through allocate/write/read on a handful of logical sectors, then
//! polls an AHT21 and a bank of 74HC4051 multiplexers.
//!
//! Store and sensor settings come from `sectorflash.toml`, checked at
//! build time.

#![no_std]
#![no_main]

extern crate alloc;

use defmt::*;
use embassy_executor::Spawner;
use embassy_rp::adc::{Adc, Channel, Config as AdcConfig};
use embassy_rp::gpio::{Level, Output, Pull};
use embassy_rp::i2c::{Config as I2cConfig, I2c};
use embedded_alloc::LlffHeap as Heap;
use {defmt_rtt as _, panic_probe as _};

use sectorflash_core::{FlashConfig, SectorStore};
use sectorflash_drivers::mux::{Hc4051, MuxLines};
use sectorflash_drivers::sensor::Aht21;
use sectorflash_hal_rp2040::flash::{init_store, mount_store};
use sectorflash_hal_rp2040::{AdcChannel, BoardAdc};

mod demo;
mod tasks;

/// Values generated from sectorflash.toml
mod settings {
    include!(concat!(env!("OUT_DIR"), "/sectorflash_config.rs"));
}

// Heap for the index map and allocation results
#[global_allocator]
static HEAP: Heap = Heap::empty();

// Heap size: 32KB
const HEAP_SIZE: usize = 32 * 1024;

/// Main entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Sector store demo starting...");

    init_heap();

    let p = embassy_rp::init(Default::default());
    info!("Peripherals initialized");

    let config = FlashConfig::new(
        settings::LOWER_BOUND,
        settings::LOGICAL_SECTORS,
        settings::GROUP_BY,
    );
    let store = if settings::INIT_ALL {
        init_store(p.FLASH, config)
    } else {
        mount_store(p.FLASH, config)
    };

    // One retry on the returned driver before giving up on storage
    let store = store.or_else(|e| {
        let (error, flash, rng) = e.into_parts();
        warn!("Store mount failed: {}, retrying", error);
        SectorStore::mount(flash, rng, config)
    });

    match store {
        Ok(mut store) => {
            info!(
                "Store ready: {} of {} sectors in use, {}",
                store.allocated_count(),
                store.capacity(),
                store.scan_report()
            );
            if let Err(e) = demo::run(&mut store) {
                error!("Store demo failed: {}", e);
            }
        }
        Err(e) => error!("Store mount failed: {}", e.error),
    }

    // AHT21 on I2C0 (SDA=GPIO4, SCL=GPIO5)
    let i2c = I2c::new_blocking(p.I2C0, p.PIN_5, p.PIN_4, I2cConfig::default());
    let aht21 = Aht21::new(i2c);

    // Mux select lines S0-S2 on GPIO10-12, shared by all three chips
    let lines = MuxLines::new(
        Output::new(p.PIN_10, Level::Low),
        Output::new(p.PIN_11, Level::Low),
        Output::new(p.PIN_12, Level::Low),
    );
    // Two chips share ADC0 behind disable pins GPIO13/14, one sits alone on ADC2
    let chips = Hc4051::new(AdcChannel::Adc0.input(), Output::new(p.PIN_13, Level::High))
        .and_then(|a| {
            Hc4051::new(AdcChannel::Adc0.input(), Output::new(p.PIN_14, Level::High))
                .map(|b| [a, b, Hc4051::always_enabled(AdcChannel::Adc2.input())])
        });

    let mut adc = BoardAdc::new(Adc::new_blocking(p.ADC, AdcConfig::default()));
    adc.attach(AdcChannel::Adc0, Channel::new_pin(p.PIN_26, Pull::None));
    adc.attach(AdcChannel::Adc2, Channel::new_pin(p.PIN_28, Pull::None));

    match (lines, chips) {
        (Ok(lines), Ok(chips)) => {
            let sensors = tasks::Sensors {
                aht21,
                lines,
                chips,
                adc,
            };
            spawner.spawn(tasks::sensor_task(sensors)).unwrap();
            info!("Sensor task spawned");
        }
        _ => error!("Mux pin setup failed"),
    }
}

fn init_heap() {
    use core::mem::MaybeUninit;
    static mut HEAP_MEM: [MaybeUninit<u8>; HEAP_SIZE] = [MaybeUninit::uninit(); HEAP_SIZE];
    #[allow(static_mut_refs)]
    unsafe {
        HEAP.init(HEAP_MEM.as_ptr() as usize, HEAP_SIZE)
    }
}
