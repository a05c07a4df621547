//! Peripheral drivers
//!
//! Drivers for the peripherals that share the board with the sector
//! store. They depend only on `embedded-hal` traits:
//!
//! - Humidity/temperature sensor (AHT21 over I2C)
//! - Analog multiplexer (74HC4051 in front of an ADC input)

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod mux;
pub mod sensor;
