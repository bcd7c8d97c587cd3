//! Amplitude extraction from raw ADC samples.
//!
//! The strategy is fixed at configuration time. Every strategy reports volts.

pub mod burst;
pub mod lockin;
pub mod window;

use embassy_time::Duration;
use heapless::Vec;

use crate::config::{ConfigError, MAX_BURST_SAMPLES, MAX_SUB_READINGS};
use crate::drivers::SampleSource;
use crate::packet::AmplitudeEstimate;

/// Samples between cooperative yields inside a timed window.
pub const YIELD_EVERY: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DemodulationStrategy {
    /// Fixed burst, sorted, `trim_percent` dropped from each end, then
    /// peak-to-peak / 2 / √2.
    TrimmedBurst { samples: usize, trim_percent: u8 },
    /// Timed window bucketed into a histogram; the robust extremes sit where
    /// the cumulative count crosses 5 % from either end.
    WindowHistogram { window: Duration },
    /// Timed window with running Σx and Σx²; reports the AC RMS.
    WindowMoments { window: Duration },
    /// Quadrature correlation against the excitation frequency, repeated
    /// `sub_readings` times for a mean and a sample standard deviation.
    LockIn {
        sub_readings: u16,
        samples_per_reading: u16,
        samples_per_period: u16,
    },
}

impl DemodulationStrategy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            Self::TrimmedBurst {
                samples,
                trim_percent,
            } => {
                if samples == 0
                    || samples > MAX_BURST_SAMPLES
                    || 2 * burst::trim_count(samples, trim_percent) >= samples
                {
                    return Err(ConfigError::InvalidBurst(samples));
                }
            }
            Self::WindowHistogram { .. } | Self::WindowMoments { .. } => {}
            Self::LockIn {
                sub_readings,
                samples_per_reading,
                samples_per_period,
            } => {
                if sub_readings == 0
                    || sub_readings as usize > MAX_SUB_READINGS
                    || samples_per_reading == 0
                    || samples_per_period < 2
                {
                    return Err(ConfigError::InvalidLockIn);
                }
            }
        }
        Ok(())
    }

    /// Checks that `hz` can be measured with this strategy.
    pub fn check_frequency(&self, hz: u32) -> Result<(), ConfigError> {
        match *self {
            Self::LockIn {
                samples_per_period,
                ..
            } if !lockin::supports(hz, samples_per_period) => Err(ConfigError::LockInTooFast(hz)),
            _ => Ok(()),
        }
    }
}

/// Runs the configured strategy against a sample source.
pub struct Demodulator {
    strategy: DemodulationStrategy,
    vref: f32,
    burst: Vec<i16, MAX_BURST_SAMPLES>,
}

impl Demodulator {
    pub fn new(strategy: DemodulationStrategy, vref: f32) -> Self {
        Self {
            strategy,
            vref,
            burst: Vec::new(),
        }
    }

    pub fn strategy(&self) -> DemodulationStrategy {
        self.strategy
    }

    /// Demodulates one scan point. `frequency_hz` is only used by lock-in.
    pub async fn measure<A: SampleSource>(
        &mut self,
        adc: &mut A,
        frequency_hz: u32,
    ) -> AmplitudeEstimate {
        match self.strategy {
            DemodulationStrategy::TrimmedBurst {
                samples,
                trim_percent,
            } => burst::measure(adc, &mut self.burst, samples, trim_percent, self.vref),
            DemodulationStrategy::WindowHistogram { window } => {
                window::measure_histogram(adc, window, self.vref).await
            }
            DemodulationStrategy::WindowMoments { window } => {
                window::measure_moments(adc, window, self.vref).await
            }
            DemodulationStrategy::LockIn {
                sub_readings,
                samples_per_reading,
                samples_per_period,
            } => {
                lockin::measure(
                    adc,
                    frequency_hz,
                    lockin::LockInPlan {
                        sub_readings,
                        samples_per_reading,
                        samples_per_period,
                    },
                    self.vref,
                )
                .await
            }
        }
    }
}

/// Peak-to-peak span in volts to sine RMS.
pub(crate) fn peak_to_peak_rms(span_volts: f32) -> f32 {
    span_volts / 2.0 / core::f32::consts::SQRT_2
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::drivers::{RawSample, SampleSource};

    /// Replays a fixed code sequence forever.
    pub struct Replay {
        codes: std::vec::Vec<i16>,
        next: usize,
        pub reads: usize,
    }

    impl Replay {
        pub fn new(codes: &[i16]) -> Self {
            Self {
                codes: codes.to_vec(),
                next: 0,
                reads: 0,
            }
        }
    }

    impl SampleSource for Replay {
        fn read(&mut self) -> RawSample {
            let code = self.codes[self.next];
            self.next = (self.next + 1) % self.codes.len();
            self.reads += 1;
            // junk LSB set on purpose
            RawSample(RawSample::from_code(code).0 | 1)
        }
    }
}
