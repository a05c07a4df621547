//! ADC inputs for the analog multiplexers
//!
//! RP2040 has a single ADC with 5 channels:
//! - ADC0: GPIO26
//! - ADC1: GPIO27
//! - ADC2: GPIO28
//! - ADC3: GPIO29
//! - ADC4: Internal temperature sensor
//!
//! [`BoardAdc`] owns the converter plus the channels wired to mux common
//! pins, and serves reads by input number through [`AdcReader`].

use embassy_rp::adc::{Adc, Blocking, Channel};
use sectorflash_drivers::mux::AdcReader;

/// External ADC inputs
pub const ADC_INPUTS: usize = 4;

/// ADC channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcChannel {
    /// ADC0 on GPIO26
    Adc0,
    /// ADC1 on GPIO27
    Adc1,
    /// ADC2 on GPIO28
    Adc2,
    /// ADC3 on GPIO29
    Adc3,
}

impl AdcChannel {
    /// Input number used by `AdcReader`
    pub fn input(self) -> u8 {
        self as u8
    }

    /// GPIO pin for this ADC channel
    pub fn gpio(self) -> u8 {
        26 + self.input()
    }

    /// ADC channel from GPIO pin
    pub fn from_gpio(gpio: u8) -> Option<Self> {
        match gpio {
            26 => Some(AdcChannel::Adc0),
            27 => Some(AdcChannel::Adc1),
            28 => Some(AdcChannel::Adc2),
            29 => Some(AdcChannel::Adc3),
            _ => None,
        }
    }
}

/// Blocking ADC with the channels attached to it
pub struct BoardAdc<'d> {
    adc: Adc<'d, Blocking>,
    channels: [Option<Channel<'d>>; ADC_INPUTS],
}

impl<'d> BoardAdc<'d> {
    /// Wrap an initialized ADC with no channels attached
    pub fn new(adc: Adc<'d, Blocking>) -> Self {
        Self {
            adc,
            channels: [None, None, None, None],
        }
    }

    /// Attach the channel for `input`, replacing any previous one
    pub fn attach(&mut self, input: AdcChannel, channel: Channel<'d>) {
        self.channels[usize::from(input.input())] = Some(channel);
    }

    /// Whether `input` has a channel attached
    pub fn is_attached(&self, input: AdcChannel) -> bool {
        self.channels[usize::from(input.input())].is_some()
    }
}

impl AdcReader for BoardAdc<'_> {
    fn read(&mut self, input: u8) -> Result<u16, ()> {
        let channel = self
            .channels
            .get_mut(usize::from(input))
            .and_then(Option::as_mut)
            .ok_or(())?;
        self.adc.blocking_read(channel).map_err(|_| ())
    }
}
