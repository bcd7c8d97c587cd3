//! Measurement packet and its wire layout.
//!
//! A packet is the `#[repr(C)]` image of [`MeasurementPacket`]: ten
//! environment floats, then `mean[P]`, then `std_dev[P]`, every field a
//! little-endian `f32` with no padding. Point `i` is
//! `frequency_index * channel_count + (channel - 1)`.

use bytemuck::{Pod, Zeroable};

/// Result of demodulating one (frequency, channel) point, in volts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AmplitudeEstimate {
    pub mean: f32,
    pub std_dev: f32,
}

impl AmplitudeEstimate {
    pub const ZERO: Self = Self {
        mean: 0.0,
        std_dev: 0.0,
    };

    pub const fn single(value: f32) -> Self {
        Self {
            mean: value,
            std_dev: 0.0,
        }
    }
}

/// Slow environmental sensor block, refreshed once per scan cycle.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Zeroable, Pod)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EnvironmentReadings {
    pub bme_temperature: f32,
    pub bme_humidity: f32,
    /// hPa
    pub bme_pressure: f32,
    /// kΩ
    pub bme_gas_resistance: f32,
    pub sht_temperature: f32,
    pub sht_humidity: f32,
    pub mq3_volts: f32,
    pub mq135_volts: f32,
    pub mq136_volts: f32,
    pub mq137_volts: f32,
}

const _: () = assert!(core::mem::size_of::<EnvironmentReadings>() == 40);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WireError {
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

/// One full scan cycle: environment block plus per-point statistics.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementPacket<const P: usize> {
    pub environment: EnvironmentReadings,
    pub mean: [f32; P],
    pub std_dev: [f32; P],
}

// SAFETY: `repr(C)` over `f32` fields only, so there is no padding and every
// bit pattern is a valid value.
unsafe impl<const P: usize> Zeroable for MeasurementPacket<P> {}
unsafe impl<const P: usize> Pod for MeasurementPacket<P> {}

impl<const P: usize> Default for MeasurementPacket<P> {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl<const P: usize> MeasurementPacket<P> {
    pub const WIRE_SIZE: usize = core::mem::size_of::<Self>();

    pub fn new(environment: EnvironmentReadings) -> Self {
        Self {
            environment,
            ..Self::zeroed()
        }
    }

    /// Stores `estimate` at `index`. Out-of-range indices are logged and ignored.
    pub fn record(&mut self, index: usize, estimate: AmplitudeEstimate) {
        if index >= P {
            error!("point {} outside packet of {} points", index, P);
            return;
        }
        self.mean[index] = estimate.mean;
        self.std_dev[index] = estimate.std_dev;
    }

    pub fn estimate(&self, index: usize) -> Option<AmplitudeEstimate> {
        Some(AmplitudeEstimate {
            mean: *self.mean.get(index)?,
            std_dev: *self.std_dev.get(index)?,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        bytemuck::try_pod_read_unaligned(bytes).map_err(|_| WireError::Length {
            expected: Self::WIRE_SIZE,
            actual: bytes.len(),
        })
    }
}
