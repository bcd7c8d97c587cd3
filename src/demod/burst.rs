//! Fixed-burst trimmed peak-to-peak RMS.

use heapless::Vec;

use super::peak_to_peak_rms;
use crate::config::MAX_BURST_SAMPLES;
use crate::drivers::{code_to_volts, SampleSource};
use crate::packet::AmplitudeEstimate;

/// Samples dropped from each end of a sorted burst of `samples`.
pub fn trim_count(samples: usize, trim_percent: u8) -> usize {
    samples * trim_percent as usize / 100
}

/// Collects exactly `samples` codes as fast as the source allows.
pub fn measure<A: SampleSource>(
    adc: &mut A,
    scratch: &mut Vec<i16, MAX_BURST_SAMPLES>,
    samples: usize,
    trim_percent: u8,
    vref: f32,
) -> AmplitudeEstimate {
    scratch.clear();
    for _ in 0..samples.min(MAX_BURST_SAMPLES) {
        // bounded by the capacity check above
        let _ = scratch.push(adc.read().code());
    }
    let trim = trim_count(scratch.len(), trim_percent);
    AmplitudeEstimate::single(trimmed_rms(scratch, trim, vref))
}

/// Sorts `codes` in place and converts the span between the `trim`-th
/// smallest and `trim`-th largest codes to RMS volts.
pub fn trimmed_rms(codes: &mut [i16], trim: usize, vref: f32) -> f32 {
    if codes.len() <= 2 * trim {
        return 0.0;
    }
    codes.sort_unstable();
    let low = codes[trim] as i32;
    let high = codes[codes.len() - 1 - trim] as i32;
    peak_to_peak_rms(code_to_volts((high - low) as f32, vref))
}
