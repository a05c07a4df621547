//! Environmental sensors

pub mod aht21;

pub use aht21::{Aht21, Aht21Error, Measurement};
