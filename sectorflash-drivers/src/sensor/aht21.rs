//! AHT21 humidity and temperature sensor
//!
//! I2C sensor at fixed address 0x38. Timing requirements:
//! - At least 100 ms after power-up before [`Aht21::init`]
//! - At least 10 ms after init before the first measurement
//! - At least 80 ms between triggering and reading a measurement
//!
//! Readings are returned as fixed-point integers with 0.1 resolution.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

/// Fixed I2C address
pub const AHT21_ADDRESS: u8 = 0x38;

/// Status/initialization command
const INIT_COMMAND: u8 = 0x71;

/// Trigger measurement command
const MEASURE_COMMAND: [u8; 3] = [0xAC, 0x33, 0x00];

/// Conversion time after triggering a measurement
pub const MEASUREMENT_TIME_MS: u32 = 80;

/// Status bit set while a conversion is running
const STATUS_BUSY: u8 = 0x80;

/// Raw values are 20-bit fractions of full scale
const RAW_SCALE_BITS: u32 = 20;

/// Errors from the AHT21
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Aht21Error {
    /// I2C transfer failed
    I2c,
    /// Measurement not finished yet
    Busy,
    /// CRC mismatch on the measurement frame
    Crc,
}

/// One humidity/temperature sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    /// Relative humidity in 0.1 % units (e.g. 455 = 45.5 %)
    pub humidity_x10: u16,
    /// Temperature in 0.1 °C units (e.g. 231 = 23.1 °C)
    pub temperature_x10: i16,
}

/// AHT21 driver
pub struct Aht21<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> Aht21<I2C> {
    /// Create a driver on `i2c`
    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    /// Send the initialization command and return the status byte
    pub fn init(&mut self) -> Result<u8, Aht21Error> {
        let mut status = [0u8; 1];
        self.i2c
            .write(AHT21_ADDRESS, &[INIT_COMMAND])
            .map_err(|_| Aht21Error::I2c)?;
        self.i2c
            .read(AHT21_ADDRESS, &mut status)
            .map_err(|_| Aht21Error::I2c)?;
        Ok(status[0])
    }

    /// Trigger a conversion
    pub fn start_measurement(&mut self) -> Result<(), Aht21Error> {
        self.i2c
            .write(AHT21_ADDRESS, &MEASURE_COMMAND)
            .map_err(|_| Aht21Error::I2c)
    }

    /// Read the result of the last conversion
    pub fn read_measurement(&mut self) -> Result<Measurement, Aht21Error> {
        let mut frame = [0u8; 7];
        self.i2c
            .read(AHT21_ADDRESS, &mut frame)
            .map_err(|_| Aht21Error::I2c)?;
        decode_frame(&frame)
    }

    /// Trigger a conversion, wait for it and read it
    pub fn measure_blocking<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> Result<Measurement, Aht21Error> {
        self.start_measurement()?;
        delay.delay_ms(MEASUREMENT_TIME_MS);
        self.read_measurement()
    }

    /// Release the I2C bus
    pub fn release(self) -> I2C {
        self.i2c
    }
}

/// Decode a 7-byte measurement frame
///
/// Layout: status, 20 bits humidity, 20 bits temperature, CRC-8.
pub fn decode_frame(frame: &[u8; 7]) -> Result<Measurement, Aht21Error> {
    if frame[0] & STATUS_BUSY != 0 {
        return Err(Aht21Error::Busy);
    }
    if crc8(&frame[..6]) != frame[6] {
        return Err(Aht21Error::Crc);
    }

    let raw_humidity =
        (u32::from(frame[1]) << 12) | (u32::from(frame[2]) << 4) | (u32::from(frame[3]) >> 4);
    let raw_temperature =
        ((u32::from(frame[3]) & 0x0F) << 16) | (u32::from(frame[4]) << 8) | u32::from(frame[5]);

    // RH = raw / 2^20 * 100 %, T = raw / 2^20 * 200 - 50 °C
    let humidity_x10 = (u64::from(raw_humidity) * 1000) >> RAW_SCALE_BITS;
    let temperature_x10 = ((u64::from(raw_temperature) * 2000) >> RAW_SCALE_BITS) as i32 - 500;

    Ok(Measurement {
        humidity_x10: humidity_x10 as u16,
        temperature_x10: temperature_x10 as i16,
    })
}

/// CRC-8, polynomial 0x31, initial value 0xFF
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}
