//! 74HC4051 8-channel analog multiplexer
//!
//! Three select lines (S0-S2) pick the channel routed to the common pin.
//! Several chips can share one set of select lines:
//! - Chips on the same ADC input need their own active-low disable pin
//! - A chip alone on its ADC input can tie disable to ground
//!   ([`Hc4051::always_enabled`])
//!
//! Both kinds take the same pin type, so one bank can mix them.
//!
//! Switching channels leaves a small charge on the ADC sample capacitor
//! (about ±20 mV at full speed); `extra_precision` waits a few
//! microseconds before sampling.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use heapless::Vec;

use super::{read_averaged, AdcReader, MuxError};

/// Channels per chip
pub const CHANNELS: usize = 8;

/// Settling time before sampling in extra-precision mode
pub const SETTLE_US: u32 = 5;

/// Shared S0-S2 select lines
pub struct MuxLines<S0, S1, S2> {
    s0: S0,
    s1: S1,
    s2: S2,
}

impl<S0, S1, S2> MuxLines<S0, S1, S2>
where
    S0: OutputPin,
    S1: OutputPin,
    S2: OutputPin,
{
    /// Take the select pins and route channel 0
    pub fn new(s0: S0, s1: S1, s2: S2) -> Result<Self, MuxError> {
        let mut lines = Self { s0, s1, s2 };
        lines.select(0)?;
        Ok(lines)
    }

    /// Route `channel` (0-7) to the common pin of every chip on these lines
    pub fn select(&mut self, channel: u8) -> Result<(), MuxError> {
        if usize::from(channel) >= CHANNELS {
            return Err(MuxError::InvalidChannel(channel));
        }
        drive(&mut self.s0, channel & 0b001 != 0)?;
        drive(&mut self.s1, channel & 0b010 != 0)?;
        drive(&mut self.s2, channel & 0b100 != 0)?;
        Ok(())
    }

    /// Read the channels set in `mask` from one chip, lowest channel first
    ///
    /// Each value is the average of `samples` reads.
    #[allow(clippy::too_many_arguments)]
    pub fn read_masked<EN, A, D>(
        &mut self,
        chip: &mut Hc4051<EN>,
        mask: u8,
        samples: u8,
        adc: &mut A,
        delay: &mut D,
        extra_precision: bool,
    ) -> Result<Vec<u16, CHANNELS>, MuxError>
    where
        EN: OutputPin,
        A: AdcReader,
        D: DelayNs,
    {
        let mut data = Vec::new();
        chip.enable()?;
        let result = (0..CHANNELS as u8)
            .filter(|&channel| mask & (1 << channel) != 0)
            .try_for_each(|channel| {
                self.select(channel)?;
                if extra_precision {
                    delay.delay_us(SETTLE_US);
                }
                let value = read_averaged(adc, chip.input, samples)?;
                // at most 8 bits set in a u8 mask
                let _ = data.push(value);
                Ok(())
            });
        chip.disable()?;
        result.map(|()| data)
    }

    /// Read all 8 channels of every chip into `out`
    ///
    /// Values for chip `i` land in `out[i * 8..i * 8 + 8]`.
    pub fn read_bank<EN, A, D>(
        &mut self,
        chips: &mut [Hc4051<EN>],
        samples: u8,
        adc: &mut A,
        delay: &mut D,
        extra_precision: bool,
        out: &mut [u16],
    ) -> Result<(), MuxError>
    where
        EN: OutputPin,
        A: AdcReader,
        D: DelayNs,
    {
        if out.len() < chips.len() * CHANNELS {
            return Err(MuxError::BufferTooSmall);
        }

        for channel in 0..CHANNELS as u8 {
            self.select(channel)?;
            for (i, chip) in chips.iter_mut().enumerate() {
                chip.enable()?;
                if extra_precision {
                    delay.delay_us(SETTLE_US);
                }
                let value = read_averaged(adc, chip.input, samples);
                chip.disable()?;
                out[i * CHANNELS + usize::from(channel)] = value?;
            }
        }
        Ok(())
    }

    /// Give the select pins back
    pub fn release(self) -> (S0, S1, S2) {
        (self.s0, self.s1, self.s2)
    }
}

/// One 74HC4051 chip: its ADC input and optional disable pin
pub struct Hc4051<EN> {
    input: u8,
    /// `None` when disable is tied to ground
    disable_pin: Option<EN>,
}

impl<EN: OutputPin> Hc4051<EN> {
    /// Chip with a disable pin; starts disabled
    pub fn new(input: u8, disable: EN) -> Result<Self, MuxError> {
        let mut chip = Self {
            input,
            disable_pin: Some(disable),
        };
        chip.disable()?;
        Ok(chip)
    }

    /// Chip alone on its ADC input, disable tied to ground
    pub fn always_enabled(input: u8) -> Self {
        Self {
            input,
            disable_pin: None,
        }
    }

    /// ADC input the common pin is wired to
    pub fn input(&self) -> u8 {
        self.input
    }

    fn enable(&mut self) -> Result<(), MuxError> {
        match &mut self.disable_pin {
            Some(pin) => drive(pin, false),
            None => Ok(()),
        }
    }

    fn disable(&mut self) -> Result<(), MuxError> {
        match &mut self.disable_pin {
            Some(pin) => drive(pin, true),
            None => Ok(()),
        }
    }
}

fn drive<P: OutputPin>(pin: &mut P, high: bool) -> Result<(), MuxError> {
    if high {
        pin.set_high()
    } else {
        pin.set_low()
    }
    .map_err(|_| MuxError::Pin)
}
