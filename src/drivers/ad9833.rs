//! AD9833 waveform generator
//! ===========================================================
//!
//! Frequencies are written to whichever of FREQ0/FREQ1 is idle and then
//! selected with a single control write, so the output switches without
//! passing through an intermediate frequency.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use super::StimulusGenerator;

/* ------------------------------------------------------------------------- */
/*  Register map                                                             */
/* ------------------------------------------------------------------------- */
const CTRL_B28: u16 = 1 << 13;
const CTRL_FSELECT: u16 = 1 << 11;
const CTRL_RESET: u16 = 1 << 8;
const REG_FREQ0: u16 = 0x4000;
const REG_FREQ1: u16 = 0x8000;
const REG_PHASE0: u16 = 0xC000;
const FREQ_DATA_MASK: u32 = 0x3FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum FreqReg {
    Freq0,
    Freq1,
}

impl FreqReg {
    fn other(self) -> Self {
        match self {
            Self::Freq0 => Self::Freq1,
            Self::Freq1 => Self::Freq0,
        }
    }

    fn address(self) -> u16 {
        match self {
            Self::Freq0 => REG_FREQ0,
            Self::Freq1 => REG_FREQ1,
        }
    }

    fn control(self) -> u16 {
        match self {
            Self::Freq0 => CTRL_B28,
            Self::Freq1 => CTRL_B28 | CTRL_FSELECT,
        }
    }
}

/// 28-bit tuning word for `hz` at master clock `mclk_hz`.
pub fn tuning_word(hz: u32, mclk_hz: u32) -> u32 {
    (((hz as u64) << 28) / mclk_hz as u64) as u32
}

pub struct Ad9833<S, FS> {
    spi: S,
    fsync: FS,
    mclk_hz: u32,
    active: FreqReg,
    frequency_hz: Option<u32>,
}

impl<S: SpiBus, FS: OutputPin> Ad9833<S, FS> {
    /// Resets the part and leaves it producing a sine at 0 Hz from FREQ0.
    pub fn new(spi: S, mut fsync: FS, mclk_hz: u32) -> Result<Self, S::Error> {
        let _ = fsync.set_high();
        let mut dds = Self {
            spi,
            fsync,
            mclk_hz,
            active: FreqReg::Freq0,
            frequency_hz: None,
        };
        dds.write_word(CTRL_B28 | CTRL_RESET)?;
        dds.write_word(REG_FREQ0)?;
        dds.write_word(REG_FREQ0)?;
        dds.write_word(REG_FREQ1)?;
        dds.write_word(REG_FREQ1)?;
        dds.write_word(REG_PHASE0)?;
        dds.write_word(FreqReg::Freq0.control())?;
        info!("AD9833 ready, MCLK {} Hz", mclk_hz);
        Ok(dds)
    }

    pub fn frequency_hz(&self) -> Option<u32> {
        self.frequency_hz
    }

    pub fn release(self) -> (S, FS) {
        (self.spi, self.fsync)
    }

    fn write_word(&mut self, word: u16) -> Result<(), S::Error> {
        let _ = self.fsync.set_low();
        let res = self.spi.write(&word.to_be_bytes()).and_then(|_| self.spi.flush());
        let _ = self.fsync.set_high();
        res
    }

    fn program(&mut self, hz: u32) -> Result<(), S::Error> {
        let target = self.active.other();
        let word = tuning_word(hz, self.mclk_hz);
        // B28 is set, so LSB then MSB land in the same register
        self.write_word(target.address() | (word & FREQ_DATA_MASK) as u16)?;
        self.write_word(target.address() | ((word >> 14) & FREQ_DATA_MASK) as u16)?;
        self.write_word(target.control())?;
        self.active = target;
        Ok(())
    }
}

impl<S: SpiBus, FS: OutputPin> StimulusGenerator for Ad9833<S, FS> {
    fn set_frequency(&mut self, hz: u32) {
        if hz == 0 || hz > self.mclk_hz / 2 {
            error!("AD9833: {} Hz outside (0, {}]", hz, self.mclk_hz / 2);
            return;
        }
        match self.program(hz) {
            Ok(()) => self.frequency_hz = Some(hz),
            Err(_) => error!("AD9833: SPI write failed while tuning to {} Hz", hz),
        }
    }
}
