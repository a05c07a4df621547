//! Sensor polling task
//!
//! Reads the AHT21 and every multiplexer channel once per poll interval.

use defmt::*;
use embassy_rp::gpio::Output;
use embassy_rp::i2c::{Blocking, I2c};
use embassy_rp::peripherals::I2C0;
use embassy_time::{Delay, Duration, Ticker};

use sectorflash_drivers::mux::{adc_to_millivolts, Hc4051, MuxLines, CHANNELS};
use sectorflash_drivers::sensor::Aht21;
use sectorflash_hal_rp2040::BoardAdc;

use crate::settings::{EXTRA_PRECISION, MUX_SAMPLES, POLL_INTERVAL_MS};

/// Multiplexers on the shared select lines
pub const MUX_CHIPS: usize = 3;

/// Power-up time before the AHT21 accepts commands
const AHT21_STARTUP_MS: u64 = 100;

/// Peripherals owned by the sensor task
pub struct Sensors {
    pub aht21: Aht21<I2c<'static, I2C0, Blocking>>,
    pub lines: MuxLines<Output<'static>, Output<'static>, Output<'static>>,
    /// Two chips sharing ADC0 behind disable pins, then one alone on ADC2
    pub chips: [Hc4051<Output<'static>>; MUX_CHIPS],
    pub adc: BoardAdc<'static>,
}

#[embassy_executor::task]
pub async fn sensor_task(mut sensors: Sensors) {
    info!("Sensor task started");

    embassy_time::Timer::after_millis(AHT21_STARTUP_MS).await;
    match sensors.aht21.init() {
        Ok(status) => info!("AHT21 status: {:02x}", status),
        Err(e) => warn!("AHT21 init failed: {}", e),
    }

    let mut delay = Delay;
    let mut ticker = Ticker::every(Duration::from_millis(POLL_INTERVAL_MS));

    loop {
        ticker.next().await;

        match sensors.aht21.measure_blocking(&mut delay) {
            Ok(m) => info!(
                "AHT21: {}.{} %RH, {}.{} C",
                m.humidity_x10 / 10,
                m.humidity_x10 % 10,
                m.temperature_x10 / 10,
                (m.temperature_x10 % 10).abs()
            ),
            Err(e) => warn!("AHT21 read failed: {}", e),
        }

        let mut raw = [0u16; MUX_CHIPS * CHANNELS];
        let result = sensors.lines.read_bank(
            &mut sensors.chips,
            MUX_SAMPLES,
            &mut sensors.adc,
            &mut delay,
            EXTRA_PRECISION,
            &mut raw,
        );

        match result {
            Ok(()) => {
                for (chip, values) in raw.chunks(CHANNELS).enumerate() {
                    let mut mv = [0u16; CHANNELS];
                    for (out, raw) in mv.iter_mut().zip(values) {
                        *out = adc_to_millivolts(*raw);
                    }
                    info!("mux {} mV: {}", chip, mv);
                }
            }
            Err(e) => warn!("Mux read failed: {}", e),
        }
    }
}
