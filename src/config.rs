// Centralize all configuration constants
use embassy_time::Duration;
use heapless::Vec;

use crate::demod::DemodulationStrategy;
use crate::ipc::EnqueuePolicy;

// Board scan table
pub const FREQUENCIES_HZ: [u32; 6] = [100, 1_000, 5_000, 10_000, 50_000, 100_000];
pub const CHANNEL_COUNT: u8 = 4;
pub const SCAN_POINTS: usize = FREQUENCIES_HZ.len() * CHANNEL_COUNT as usize;
pub const SETTLING_TIME_US: u64 = 100;
pub const CYCLE_PERIOD_MS: u64 = 10_000;

// Front-end
pub const ADC_VREF: f32 = 2.5;
pub const ADC_SPI_HZ: u32 = 20_000_000;
pub const WAVEGEN_SPI_HZ: u32 = 10_000_000;
pub const WAVEGEN_MCLK_HZ: u32 = 25_000_000;

// Demodulation defaults
pub const BURST_SAMPLES: usize = 512;
pub const TRIM_PERCENT: u8 = 5;
pub const LOCKIN_SUB_READINGS: u16 = 8;
pub const LOCKIN_SAMPLES_PER_READING: u16 = 200;
pub const LOCKIN_SAMPLES_PER_PERIOD: u16 = 10;

// Static buffer bounds
pub const MAX_FREQUENCIES: usize = 16;
pub const MAX_BURST_SAMPLES: usize = 1024;
pub const MAX_SUB_READINGS: usize = 64;
pub const HISTOGRAM_BINS: usize = 256;

// Telemetry
pub const TELEMETRY_QUEUE_DEPTH: usize = 16;
pub const TELEMETRY_POLICY: EnqueuePolicy = EnqueuePolicy::Block;
pub const LINK_BAUDRATE: u32 = 1_000_000;
pub const TELEMETRY_STATS_PERIOD_S: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[error("frequency table is empty")]
    NoFrequencies,
    #[error("frequency table is longer than the static bound")]
    TooManyFrequencies,
    #[error("frequency at index {0} is zero")]
    ZeroFrequency(usize),
    #[error("channel count must be at least one")]
    NoChannels,
    #[error("{requested} channels requested but the selector has {available}")]
    TooManyChannels { requested: u8, available: u8 },
    #[error("packet holds {expected} points but the scan covers {actual}")]
    PointMismatch { expected: usize, actual: usize },
    #[error("burst of {0} samples does not fit the buffer or is fully trimmed")]
    InvalidBurst(usize),
    #[error("lock-in needs 1..=64 sub-readings, samples and at least two samples per period")]
    InvalidLockIn,
    #[error("lock-in cannot pace {0} Hz on the system timer")]
    LockInTooFast(u32),
}

/// Ordered excitation frequencies in Hz. Insertion order is scan order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyTable {
    hz: Vec<u32, MAX_FREQUENCIES>,
}

impl FrequencyTable {
    pub fn new(frequencies: &[u32]) -> Result<Self, ConfigError> {
        if frequencies.is_empty() {
            return Err(ConfigError::NoFrequencies);
        }
        if let Some(index) = frequencies.iter().position(|&f| f == 0) {
            return Err(ConfigError::ZeroFrequency(index));
        }
        let hz = Vec::from_slice(frequencies).map_err(|_| ConfigError::TooManyFrequencies)?;
        Ok(Self { hz })
    }

    pub fn len(&self) -> usize {
        self.hz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hz.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.hz.get(index).copied()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.hz
    }
}

/// Startup configuration for one acquisition front-end.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub frequencies: FrequencyTable,
    pub channel_count: u8,
    pub settling: Duration,
    pub strategy: DemodulationStrategy,
    /// Minimum time between cycle starts; `None` scans back to back.
    pub cycle_period: Option<Duration>,
    pub vref: f32,
}

impl ScanConfig {
    pub fn new(
        frequencies: &[u32],
        channel_count: u8,
        strategy: DemodulationStrategy,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            frequencies: FrequencyTable::new(frequencies)?,
            channel_count,
            settling: Duration::from_micros(SETTLING_TIME_US),
            strategy,
            cycle_period: None,
            vref: ADC_VREF,
        };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks the fields; they are public and may have been edited.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_count == 0 {
            return Err(ConfigError::NoChannels);
        }
        if self.frequencies.is_empty() {
            return Err(ConfigError::NoFrequencies);
        }
        self.strategy.validate()?;
        for &hz in self.frequencies.as_slice() {
            self.strategy.check_frequency(hz)?;
        }
        Ok(())
    }

    /// The board's scan table with the lock-in demodulator.
    pub fn board_default() -> Result<Self, ConfigError> {
        let strategy = DemodulationStrategy::LockIn {
            sub_readings: LOCKIN_SUB_READINGS,
            samples_per_reading: LOCKIN_SAMPLES_PER_READING,
            samples_per_period: LOCKIN_SAMPLES_PER_PERIOD,
        };
        Ok(Self::new(&FREQUENCIES_HZ, CHANNEL_COUNT, strategy)?
            .with_cycle_period(Duration::from_millis(CYCLE_PERIOD_MS)))
    }

    pub fn with_settling(mut self, settling: Duration) -> Self {
        self.settling = settling;
        self
    }

    pub fn with_cycle_period(mut self, period: Duration) -> Self {
        self.cycle_period = Some(period);
        self
    }

    pub fn with_vref(mut self, vref: f32) -> Self {
        self.vref = vref;
        self
    }

    /// Number of (frequency, channel) points in one cycle.
    pub fn points(&self) -> usize {
        self.frequencies.len() * self.channel_count as usize
    }

    /// Checks the scan fits a packet of `P` points.
    pub fn check_points<const P: usize>(&self) -> Result<(), ConfigError> {
        let actual = self.points();
        if actual != P {
            return Err(ConfigError::PointMismatch {
                expected: P,
                actual,
            });
        }
        Ok(())
    }
}
