//! Lock-in (quadrature) amplitude extraction.
//!
//! Each sub-reading correlates `samples_per_reading` voltages against sin
//! and cos of the excitation frequency. Samples are taken on a fixed grid of
//! whole timer ticks anchored at the sub-reading's start, and the reference
//! phase is computed exactly from the slot, not from the floored time of
//! the read. A read that starts more than [`LATE_FRACTION`]⁻¹ of a period
//! after its slot is dropped.

use core::f32::consts::TAU;

use embassy_futures::yield_now;
use embassy_time::{Duration, Instant, Timer, TICK_HZ};
use heapless::Vec;

use crate::config::MAX_SUB_READINGS;
use crate::drivers::SampleSource;
use crate::packet::AmplitudeEstimate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LockInPlan {
    pub sub_readings: u16,
    pub samples_per_reading: u16,
    pub samples_per_period: u16,
}

/// A read may start at most `1 / LATE_FRACTION` of an excitation period
/// after its slot.
pub const LATE_FRACTION: u64 = 16;

/// Whether the timer can pace `samples_per_period` samples per period of `hz`.
pub fn supports(hz: u32, samples_per_period: u16) -> bool {
    hz as u64 * samples_per_period as u64 <= TICK_HZ
}

/// Ticks a read may trail its slot and still be correlated.
pub fn max_lateness(hz: u32) -> u64 {
    TICK_HZ / (hz as u64 * LATE_FRACTION).max(1)
}

/// Sample pacing for `samples_per_period` samples per excitation period,
/// never shorter than one timer tick.
pub fn sample_period(hz: u32, samples_per_period: u16) -> Duration {
    let rate = (hz as u64 * samples_per_period as u64).max(1);
    Duration::from_ticks((TICK_HZ / rate).max(1))
}

/// Reference phase of `hz` after `ticks` timer ticks, in `[0, 2π)`.
pub fn phase(hz: u32, ticks: u64) -> f32 {
    let cycles = (hz as u64).wrapping_mul(ticks) % TICK_HZ;
    TAU * cycles as f32 / TICK_HZ as f32
}

/// In-phase and quadrature accumulators for one sub-reading.
#[derive(Debug, Default, Clone, Copy)]
pub struct Correlator {
    sum_i: f32,
    sum_q: f32,
    count: u32,
}

impl Correlator {
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn record(&mut self, volts: f32, phase: f32) {
        self.sum_i += volts * libm::sinf(phase);
        self.sum_q += volts * libm::cosf(phase);
        self.count += 1;
    }

    /// `2·√(Ī² + Q̄²)`: the amplitude of the component at the reference frequency.
    pub fn amplitude(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f32;
        let i = self.sum_i / n;
        let q = self.sum_q / n;
        2.0 * libm::sqrtf(i * i + q * q)
    }
}

/// Mean and Bessel-corrected standard deviation of the sub-reading amplitudes.
pub fn summarize(amplitudes: &[f32]) -> AmplitudeEstimate {
    let n = amplitudes.len();
    if n == 0 {
        return AmplitudeEstimate::ZERO;
    }
    let mean = amplitudes.iter().sum::<f32>() / n as f32;
    if n == 1 {
        return AmplitudeEstimate::single(mean);
    }
    let ss: f32 = amplitudes.iter().map(|a| (a - mean) * (a - mean)).sum();
    AmplitudeEstimate {
        mean,
        std_dev: libm::sqrtf(ss / (n - 1) as f32),
    }
}

pub async fn measure<A: SampleSource>(
    adc: &mut A,
    hz: u32,
    plan: LockInPlan,
    vref: f32,
) -> AmplitudeEstimate {
    let period = sample_period(hz, plan.samples_per_period);
    let max_late = max_lateness(hz);
    let mut amplitudes: Vec<f32, MAX_SUB_READINGS> = Vec::new();
    let mut dropped = 0u32;

    for _ in 0..plan.sub_readings {
        let mut correlator = Correlator::default();
        let start = Instant::now();
        for k in 1..=plan.samples_per_reading as u32 {
            let slot = period * k;
            Timer::at(start + slot).await;
            let late = start.elapsed().as_ticks().saturating_sub(slot.as_ticks());
            let volts = adc.read().volts(vref);
            if late > max_late {
                dropped += 1;
                continue;
            }
            correlator.record(volts, phase(hz, slot.as_ticks()));
        }
        if correlator.count() > 0 && amplitudes.push(correlator.amplitude()).is_err() {
            break;
        }
        // let the transmission side run between sub-readings
        yield_now().await;
    }

    if dropped > 0 {
        warn!(
            "Lock-in at {} Hz: {} late samples dropped, {} of {} sub-readings kept",
            hz,
            dropped,
            amplitudes.len(),
            plan.sub_readings
        );
    }
    summarize(&amplitudes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::RawSample;
    use embassy_futures::block_on;

    const VREF: f32 = 2.5;

    fn volts_to_code(volts: f32) -> i16 {
        libm::roundf(volts * 16384.0 / VREF) as i16
    }

    /// Sine generator clocked by the same timer the demodulator reads.
    struct TimedSine {
        hz: u32,
        amplitude: f32,
        offset: f32,
        t0: Instant,
    }

    impl SampleSource for TimedSine {
        fn read(&mut self) -> RawSample {
            let ticks = self.t0.elapsed().as_ticks();
            let v = self.offset + self.amplitude * libm::sinf(phase(self.hz, ticks) + 0.7);
            RawSample::from_code(volts_to_code(v))
        }
    }

    #[test]
    fn correlator_recovers_amplitude_over_whole_periods() {
        let mut c = Correlator::default();
        let spp = 20;
        for k in 0..200 {
            let phase = TAU * (k % spp) as f32 / spp as f32;
            c.record(0.2 + 0.5 * libm::sinf(phase + 1.1), phase);
        }
        assert!((c.amplitude() - 0.5).abs() < 1e-3, "amplitude {}", c.amplitude());
    }

    #[test]
    fn correlator_rejects_other_frequencies() {
        let mut c = Correlator::default();
        let spp = 20;
        for k in 0..200 {
            let phase = TAU * (k % spp) as f32 / spp as f32;
            // third harmonic
            c.record(0.5 * libm::sinf(3.0 * phase), phase);
        }
        assert!(c.amplitude() < 1e-3);
    }

    #[test]
    fn summary_uses_bessel_correction() {
        let est = summarize(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(est.mean, 2.5);
        let expected = libm::sqrtf(5.0 / 3.0);
        assert!((est.std_dev - expected).abs() < 1e-6);

        assert_eq!(summarize(&[0.7]), AmplitudeEstimate::single(0.7));
        assert_eq!(summarize(&[]), AmplitudeEstimate::ZERO);
    }

    #[test]
    fn phase_wraps_each_period() {
        let period_ticks = TICK_HZ / 1_000;
        assert_eq!(phase(1_000, 0), 0.0);
        assert_eq!(phase(1_000, period_ticks), 0.0);
        assert!((phase(1_000, period_ticks / 4) - TAU / 4.0).abs() < 1e-5);
    }

    #[test]
    fn pacing_never_drops_below_one_tick() {
        assert_eq!(sample_period(u32::MAX, 20), Duration::from_ticks(1));
        assert_eq!(sample_period(1_000, 20), Duration::from_ticks(TICK_HZ / 20_000));
    }

    /// Starts each conversion a few microseconds after it was asked for,
    /// and now and then stalls long enough to make the following reads late.
    struct SlowSine {
        sine: TimedSine,
        reads: u32,
    }

    fn spin(us: u64) {
        let until = Instant::now() + Duration::from_micros(us);
        while Instant::now() < until {}
    }

    impl SampleSource for SlowSine {
        fn read(&mut self) -> RawSample {
            self.reads += 1;
            spin(self.reads as u64 % 5);
            let sample = self.sine.read();
            if self.reads % 400 == 50 {
                spin(300);
            }
            sample
        }
    }

    #[test]
    fn late_and_jittered_reads_keep_the_amplitude() {
        let hz = 1_000;
        let mut adc = SlowSine {
            sine: TimedSine {
                hz,
                amplitude: 0.4,
                offset: -0.2,
                t0: Instant::now(),
            },
            reads: 0,
        };
        let plan = LockInPlan {
            sub_readings: 3,
            samples_per_reading: 400,
            samples_per_period: 20,
        };
        let est = block_on(measure(&mut adc, hz, plan, VREF));
        assert_eq!(adc.reads, 3 * 400);
        assert!((est.mean - 0.4).abs() < 0.4 * 0.05, "mean {}", est.mean);
    }

    #[test]
    fn lateness_budget_scales_with_frequency() {
        assert_eq!(max_lateness(1_000), TICK_HZ / 16_000);
        assert!(max_lateness(100_000) < max_lateness(10_000));
        assert!(supports(1_000, 20));
        assert!(!supports((TICK_HZ / 10) as u32 + 1, 10));
    }

    #[test]
    fn slots_sit_on_exact_phases() {
        // 1 kHz at 20 samples per period: every slot advances 18 degrees
        let period = sample_period(1_000, 20);
        for k in 0..40u32 {
            let expected = TAU * (k % 20) as f32 / 20.0;
            assert!((phase(1_000, (period * k).as_ticks()) - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn recovers_known_sine_amplitude() {
        let hz = 1_000;
        let mut adc = TimedSine {
            hz,
            amplitude: 0.5,
            offset: 0.1,
            t0: Instant::now(),
        };
        let plan = LockInPlan {
            sub_readings: 4,
            samples_per_reading: 200,
            samples_per_period: 20,
        };
        let est = block_on(measure(&mut adc, hz, plan, VREF));
        assert!((est.mean - 0.5).abs() < 0.5 * 0.05, "mean {}", est.mean);
        assert!(est.std_dev < 0.5 * 0.05, "std_dev {}", est.std_dev);
    }
}
