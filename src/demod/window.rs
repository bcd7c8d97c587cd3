//! Timed-window estimators.
//!
//! Both sample continuously for a wall-clock window and yield to the
//! executor every [`YIELD_EVERY`] samples. Memory does not grow with the
//! window length.

use embassy_futures::yield_now;
use embassy_time::{Duration, Instant};

use super::{peak_to_peak_rms, YIELD_EVERY};
use crate::config::HISTOGRAM_BINS;
use crate::drivers::{code_to_volts, SampleSource};
use crate::packet::AmplitudeEstimate;

const CODE_MIN: i32 = -16384;
const CODE_SPAN: i32 = 32768;

/// Codes per histogram bin.
pub const BIN_WIDTH: i32 = CODE_SPAN / HISTOGRAM_BINS as i32;

/// Fraction trimmed from each tail, in percent.
const TAIL_PERCENT: u64 = 5;

async fn sample_window<A: SampleSource>(adc: &mut A, window: Duration, mut sink: impl FnMut(i16)) {
    let start = Instant::now();
    let mut since_yield = 0u32;
    while start.elapsed() < window {
        sink(adc.read().code());
        since_yield += 1;
        if since_yield >= YIELD_EVERY {
            since_yield = 0;
            yield_now().await;
        }
    }
}

pub async fn measure_histogram<A: SampleSource>(
    adc: &mut A,
    window: Duration,
    vref: f32,
) -> AmplitudeEstimate {
    let mut histogram = Histogram::new();
    sample_window(adc, window, |code| histogram.record(code)).await;
    AmplitudeEstimate::single(histogram.rms(vref))
}

pub async fn measure_moments<A: SampleSource>(
    adc: &mut A,
    window: Duration,
    vref: f32,
) -> AmplitudeEstimate {
    let mut moments = Moments::default();
    sample_window(adc, window, |code| moments.record(code)).await;
    AmplitudeEstimate::single(moments.rms(vref))
}

/// Equal-width bins over the full signed code range.
pub struct Histogram {
    bins: [u32; HISTOGRAM_BINS],
    total: u64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub const fn new() -> Self {
        Self {
            bins: [0; HISTOGRAM_BINS],
            total: 0,
        }
    }

    pub fn record(&mut self, code: i16) {
        let bin = ((code as i32 - CODE_MIN) / BIN_WIDTH) as usize;
        let bin = bin.min(HISTOGRAM_BINS - 1);
        self.bins[bin] = self.bins[bin].saturating_add(1);
        self.total += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Bin indices holding the robust minimum and maximum, or `None` when empty.
    pub fn robust_bins(&self) -> Option<(usize, usize)> {
        if self.total == 0 {
            return None;
        }
        let threshold = (self.total * TAIL_PERCENT).div_ceil(100).max(1);
        let low = Self::crossing(self.bins.iter().enumerate(), threshold)?;
        let high = Self::crossing(self.bins.iter().enumerate().rev(), threshold)?;
        Some((low, high.max(low)))
    }

    fn crossing<'a>(
        bins: impl Iterator<Item = (usize, &'a u32)>,
        threshold: u64,
    ) -> Option<usize> {
        let mut cumulative = 0u64;
        for (index, &count) in bins {
            cumulative += count as u64;
            if cumulative >= threshold {
                return Some(index);
            }
        }
        None
    }

    /// Code at the centre of `bin`.
    pub fn bin_centre(bin: usize) -> f32 {
        (CODE_MIN + bin as i32 * BIN_WIDTH) as f32 + BIN_WIDTH as f32 / 2.0
    }

    pub fn rms(&self, vref: f32) -> f32 {
        match self.robust_bins() {
            Some((low, high)) => {
                let span = Self::bin_centre(high) - Self::bin_centre(low);
                peak_to_peak_rms(code_to_volts(span, vref))
            }
            None => 0.0,
        }
    }
}

/// Running Σx and Σx² in codes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Moments {
    sum: f64,
    sum_sq: f64,
    count: u64,
}

impl Moments {
    pub fn record(&mut self, code: i16) {
        let x = code as f64;
        self.sum += x;
        self.sum_sq += x * x;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// RMS of the AC component; zero when nothing was recorded.
    pub fn rms(&self, vref: f32) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        // cancellation can push this slightly negative
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        code_to_volts(libm::sqrt(variance) as f32, vref)
    }
}
