//! Peripheral boundary of the acquisition core.
//!
//! The scan controller owns one of each of these and is their only user.

pub mod ad9833;
pub mod environment;
pub mod link;
pub mod ltc2310;
pub mod mux;

pub use ad9833::Ad9833;
pub use environment::Unfitted;
pub use link::{FramedLink, LinkError};
pub use ltc2310::Ltc2310;
pub use mux::Multiplexer;

use crate::packet::EnvironmentReadings;

/// ADC full-scale span in codes after the junk LSB is dropped.
pub const FULL_SCALE_CODES: f32 = 16384.0;

/// One raw ADC word. Bit 0 carries no information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawSample(pub u16);

impl RawSample {
    /// Builds the word the ADC would return for a signed code.
    pub const fn from_code(code: i16) -> Self {
        Self((code as u16) << 1)
    }

    /// Signed code with the junk LSB shifted out.
    pub const fn code(self) -> i16 {
        (self.0 as i16) >> 1
    }

    pub fn volts(self, vref: f32) -> f32 {
        code_to_volts(self.code() as f32, vref)
    }
}

/// Converts a (possibly fractional) code span to volts.
pub fn code_to_volts(code: f32, vref: f32) -> f32 {
    code * (vref / FULL_SCALE_CODES)
}

/// Blocking single-sample reader. A stuck bus is the driver's problem.
pub trait SampleSource {
    fn read(&mut self) -> RawSample;
}

/// Excitation generator. Switching is immediate, settling is not.
pub trait StimulusGenerator {
    fn set_frequency(&mut self, hz: u32);
}

/// Mutually exclusive channel switch, channels numbered from 1.
pub trait ChannelSelector {
    fn channel_count(&self) -> u8;

    /// Enables `channel` and implicitly disables the previous one.
    /// Out-of-range channels are logged and ignored.
    fn enable(&mut self, channel: u8);

    fn enabled(&self) -> Option<u8>;
}

/// Slow environmental sensors sampled once per scan cycle.
#[allow(async_fn_in_trait)]
pub trait EnvironmentSensors {
    /// Overwrites the fields it managed to read; failed reads keep the
    /// previous values.
    async fn refresh(&mut self, readings: &mut EnvironmentReadings);
}

/// Outbound sink for finished packets.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn send(&mut self, payload: &[u8]) -> Result<(), LinkError>;
}

impl<T: SampleSource + ?Sized> SampleSource for &mut T {
    fn read(&mut self) -> RawSample {
        (**self).read()
    }
}
