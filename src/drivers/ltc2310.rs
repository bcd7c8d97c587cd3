//! LTC2310 SPI ADC
//! ===========================================================
//!
//! One conversion is a 16-bit full-duplex transfer framed by CS. The
//! converter ignores MOSI, so zeros are shifted out.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use super::{RawSample, SampleSource};

pub struct Ltc2310<S, CS> {
    spi: S,
    cs: CS,
    last: RawSample,
    bus_errors: u32,
}

impl<S: SpiBus, CS: OutputPin> Ltc2310<S, CS> {
    pub fn new(spi: S, mut cs: CS) -> Self {
        // CS idles high
        if cs.set_high().is_err() {
            error!("LTC2310: failed to release CS");
        }
        Self {
            spi,
            cs,
            last: RawSample::default(),
            bus_errors: 0,
        }
    }

    pub fn read_raw(&mut self) -> Result<u16, S::Error> {
        let mut word = [0u8; 2];
        let _ = self.cs.set_low();
        let res = self.spi.transfer_in_place(&mut word).and_then(|_| self.spi.flush());
        let _ = self.cs.set_high();
        res.map(|_| u16::from_be_bytes(word))
    }

    pub fn bus_errors(&self) -> u32 {
        self.bus_errors
    }
}

impl<S: SpiBus, CS: OutputPin> SampleSource for Ltc2310<S, CS> {
    fn read(&mut self) -> RawSample {
        match self.read_raw() {
            Ok(word) => {
                self.last = RawSample(word);
            }
            Err(_) => {
                self.bus_errors = self.bus_errors.wrapping_add(1);
                if self.bus_errors % 1000 == 1 {
                    warn!("LTC2310 read error #{}, repeating last sample", self.bus_errors);
                }
            }
        }
        self.last
    }
}
