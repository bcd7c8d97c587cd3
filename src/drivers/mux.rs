//! One-hot GPIO multiplexer: one output pin per analog channel.

use embedded_hal::digital::OutputPin;

use super::ChannelSelector;

pub struct Multiplexer<P, const N: usize> {
    pins: [P; N],
    enabled: Option<usize>,
}

impl<P: OutputPin, const N: usize> Multiplexer<P, N> {
    /// Channel numbers are `u8`.
    const FITS_U8: () = assert!(N <= u8::MAX as usize, "at most 255 channels");

    /// Drives every channel pin low.
    pub fn new(mut pins: [P; N]) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::FITS_U8;
        for pin in pins.iter_mut() {
            let _ = pin.set_low();
        }
        Self {
            pins,
            enabled: None,
        }
    }

    pub fn disable_all(&mut self) {
        if let Some(index) = self.enabled.take() {
            let _ = self.pins[index].set_low();
        }
    }
}

impl<P: OutputPin, const N: usize> ChannelSelector for Multiplexer<P, N> {
    fn channel_count(&self) -> u8 {
        N as u8
    }

    fn enable(&mut self, channel: u8) {
        if channel == 0 || channel as usize > N {
            error!("Invalid channel {}. Valid channels are 1 to {}", channel, N);
            return;
        }
        let index = channel as usize - 1;
        if self.enabled == Some(index) {
            return;
        }
        self.disable_all();
        if self.pins[index].set_high().is_err() {
            error!("Failed to drive channel {} pin", channel);
            return;
        }
        self.enabled = Some(index);
    }

    fn enabled(&self) -> Option<u8> {
        self.enabled.map(|i| i as u8 + 1)
    }
}
