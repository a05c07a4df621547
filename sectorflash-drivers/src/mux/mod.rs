//! Analog multiplexers
//!
//! Multiplexers fan several analog signals into one ADC input. The ADC
//! itself stays behind [`AdcReader`] so the drivers run on any platform.

pub mod hc4051;

pub use hc4051::{Hc4051, MuxLines, CHANNELS};

/// ADC reference voltage of the sensor board in millivolts
pub const ADC_REFERENCE_MV: u32 = 3270;

/// Full-scale reading of a 12-bit ADC
pub const ADC_MAX: u32 = 4095;

/// ADC reading trait for platform abstraction
///
/// `input` is the platform's ADC input number (0-3 on the RP2040).
pub trait AdcReader {
    /// Read ADC value (12-bit, 0-4095)
    #[allow(clippy::result_unit_err)]
    fn read(&mut self, input: u8) -> Result<u16, ()>;
}

/// Multiplexer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MuxError {
    /// Channel outside 0-7
    InvalidChannel(u8),
    /// Driving a select or disable pin failed
    Pin,
    /// ADC read failed
    Adc,
    /// Output buffer shorter than 8 values per chip
    BufferTooSmall,
}

/// Convert a 12-bit reading to millivolts
pub fn adc_to_millivolts(raw: u16) -> u16 {
    (u32::from(raw.min(ADC_MAX as u16)) * ADC_REFERENCE_MV / ADC_MAX) as u16
}

/// Average `samples` reads of `input`; zero samples counts as one
pub(crate) fn read_averaged<A: AdcReader>(
    adc: &mut A,
    input: u8,
    samples: u8,
) -> Result<u16, MuxError> {
    let samples = samples.max(1);
    let mut sum: u32 = 0;
    for _ in 0..samples {
        sum += u32::from(adc.read(input).map_err(|_| MuxError::Adc)?);
    }
    Ok((sum / u32::from(samples)) as u16)
}
