//! Acquisition scan controller.
//!
//! Walks every (frequency, channel) pair once per cycle, frequency-major:
//!
//! ```text
//! Idle -> SelectFrequency -> SelectChannel -> Settle -> Sample -> Advance
//!                 ^                ^                                 |
//!                 |                +------ next channel -------------+
//!                 +--------------------- next frequency -------------+
//!                                        (last frequency -> Idle)
//! ```
//!
//! One [`MeasurementPacket`] is produced per completed cycle.

use embassy_time::{Duration, Instant, Timer};

use crate::config::{ConfigError, FrequencyTable, ScanConfig};
use crate::demod::Demodulator;
use crate::drivers::{ChannelSelector, EnvironmentSensors, SampleSource, StimulusGenerator};
use crate::ipc::Shutdown;
use crate::packet::{AmplitudeEstimate, EnvironmentReadings, MeasurementPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanState {
    Idle,
    SelectFrequency,
    SelectChannel,
    Settle,
    Sample,
    Advance,
}

/// Position within a scan cycle. Channels count from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanPoint {
    pub frequency_index: usize,
    pub channel: u8,
}

impl ScanPoint {
    /// Slot of this point in the packet arrays.
    pub fn index(&self, channel_count: u8) -> usize {
        self.frequency_index * channel_count as usize + (self.channel as usize - 1)
    }
}

/// Points of one cycle in visiting order.
pub fn scan_order(frequency_count: usize, channel_count: u8) -> impl Iterator<Item = ScanPoint> {
    (0..frequency_count).flat_map(move |frequency_index| {
        (1..=channel_count).map(move |channel| ScanPoint {
            frequency_index,
            channel,
        })
    })
}

pub struct ScanController<G, M, A, E, const P: usize> {
    generator: G,
    selector: M,
    adc: A,
    environment: E,
    demodulator: Demodulator,
    frequencies: FrequencyTable,
    channel_count: u8,
    settling: Duration,
    cycle_period: Option<Duration>,
    state: ScanState,
    frequency_index: usize,
    channel: u8,
    readings: EnvironmentReadings,
    packet: MeasurementPacket<P>,
    cycle_started: Instant,
    cycles: u32,
}

impl<G, M, A, E, const P: usize> ScanController<G, M, A, E, P>
where
    G: StimulusGenerator,
    M: ChannelSelector,
    A: SampleSource,
    E: EnvironmentSensors,
{
    pub fn new(
        config: ScanConfig,
        generator: G,
        selector: M,
        adc: A,
        environment: E,
    ) -> Result<Self, ConfigError> {
        config.check_points::<P>()?;
        config.validate()?;
        if config.channel_count > selector.channel_count() {
            return Err(ConfigError::TooManyChannels {
                requested: config.channel_count,
                available: selector.channel_count(),
            });
        }
        info!(
            "Scan: {} frequencies x {} channels, settle {} us, {:?}",
            config.frequencies.len(),
            config.channel_count,
            config.settling.as_micros(),
            config.strategy
        );
        Ok(Self {
            generator,
            selector,
            adc,
            environment,
            demodulator: Demodulator::new(config.strategy, config.vref),
            frequencies: config.frequencies,
            channel_count: config.channel_count,
            settling: config.settling,
            cycle_period: config.cycle_period,
            state: ScanState::Idle,
            frequency_index: 0,
            channel: 1,
            readings: EnvironmentReadings::default(),
            packet: MeasurementPacket::default(),
            cycle_started: Instant::now(),
            cycles: 0,
        })
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn point(&self) -> ScanPoint {
        ScanPoint {
            frequency_index: self.frequency_index,
            channel: self.channel,
        }
    }

    /// Completed cycles since construction.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn cycle_period(&self) -> Option<Duration> {
        self.cycle_period
    }

    /// When the current (or last) cycle left `Idle`.
    pub fn cycle_started(&self) -> Instant {
        self.cycle_started
    }

    /// Drops any partial cycle; the next step starts a fresh one.
    pub fn reset(&mut self) {
        self.state = ScanState::Idle;
        self.frequency_index = 0;
        self.channel = 1;
    }

    pub fn release(self) -> (G, M, A, E) {
        (self.generator, self.selector, self.adc, self.environment)
    }

    /// Performs one state transition. Returns the packet when it closes a cycle.
    pub async fn step(&mut self) -> Option<MeasurementPacket<P>> {
        match self.state {
            ScanState::Idle => {
                self.cycle_started = Instant::now();
                self.environment.refresh(&mut self.readings).await;
                self.packet = MeasurementPacket::new(self.readings);
                self.frequency_index = 0;
                self.channel = 1;
                self.state = ScanState::SelectFrequency;
            }
            ScanState::SelectFrequency => {
                match self.frequencies.get(self.frequency_index) {
                    Some(hz) => {
                        debug!("Frequency {} Hz", hz);
                        self.generator.set_frequency(hz);
                    }
                    None => error!(
                        "Invalid frequency index {} (table has {})",
                        self.frequency_index,
                        self.frequencies.len()
                    ),
                }
                self.state = ScanState::SelectChannel;
            }
            ScanState::SelectChannel => {
                self.selector.enable(self.channel);
                self.state = ScanState::Settle;
            }
            ScanState::Settle => {
                Timer::after(self.settling).await;
                self.state = ScanState::Sample;
            }
            ScanState::Sample => {
                let point = self.point();
                let estimate = match self.frequencies.get(point.frequency_index) {
                    Some(hz) => self.demodulator.measure(&mut self.adc, hz).await,
                    None => AmplitudeEstimate::ZERO,
                };
                debug!(
                    "Point f#{} ch{}: mean {} V, std {} V",
                    point.frequency_index,
                    point.channel,
                    estimate.mean,
                    estimate.std_dev
                );
                self.packet.record(point.index(self.channel_count), estimate);
                self.state = ScanState::Advance;
            }
            ScanState::Advance => {
                if self.channel < self.channel_count {
                    self.channel += 1;
                    self.state = ScanState::SelectChannel;
                    return None;
                }
                self.channel = 1;
                self.frequency_index += 1;
                if self.frequency_index < self.frequencies.len() {
                    self.state = ScanState::SelectFrequency;
                    return None;
                }
                self.frequency_index = 0;
                self.state = ScanState::Idle;
                self.cycles = self.cycles.wrapping_add(1);
                return Some(self.packet);
            }
        }
        None
    }

    /// Steps until a cycle completes, checking `shutdown` before every
    /// transition. Returns `None` if shutdown interrupted the cycle.
    pub async fn run_cycle(&mut self, shutdown: &Shutdown) -> Option<MeasurementPacket<P>> {
        loop {
            if shutdown.is_requested() {
                info!("Scan stopped in {:?} at cycle {}", self.state, self.cycles);
                self.reset();
                return None;
            }
            if let Some(packet) = self.step().await {
                return Some(packet);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demod::{peak_to_peak_rms, DemodulationStrategy};
    use crate::drivers::{code_to_volts, RawSample};
    use embassy_futures::block_on;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Frequency(u32),
        Channel(u8),
    }

    #[derive(Default)]
    struct Bench {
        frequency: Option<u32>,
        channel: Option<u8>,
        events: Vec<Event>,
        toggle: bool,
    }

    type Shared = Rc<RefCell<Bench>>;

    struct Generator(Shared);
    impl StimulusGenerator for Generator {
        fn set_frequency(&mut self, hz: u32) {
            let mut b = self.0.borrow_mut();
            b.frequency = Some(hz);
            b.events.push(Event::Frequency(hz));
        }
    }

    struct Selector(Shared, u8);
    impl ChannelSelector for Selector {
        fn channel_count(&self) -> u8 {
            self.1
        }
        fn enable(&mut self, channel: u8) {
            if channel == 0 || channel > self.1 {
                return;
            }
            let mut b = self.0.borrow_mut();
            b.channel = Some(channel);
            b.events.push(Event::Channel(channel));
        }
        fn enabled(&self) -> Option<u8> {
            self.0.borrow().channel
        }
    }

    /// Square wave whose amplitude encodes the active frequency and channel.
    struct Adc(Shared);
    impl SampleSource for Adc {
        fn read(&mut self) -> RawSample {
            let mut b = self.0.borrow_mut();
            let amp = amplitude_code(b.frequency.unwrap_or(0), b.channel.unwrap_or(0));
            b.toggle = !b.toggle;
            RawSample::from_code(if b.toggle { amp } else { -amp })
        }
    }

    fn amplitude_code(hz: u32, channel: u8) -> i16 {
        (hz / 10) as i16 + channel as i16 * 10
    }

    #[derive(Default)]
    struct Sensors {
        refreshes: u32,
        fail: bool,
    }
    impl EnvironmentSensors for Sensors {
        async fn refresh(&mut self, readings: &mut EnvironmentReadings) {
            self.refreshes += 1;
            if !self.fail {
                readings.bme_temperature = 20.0 + self.refreshes as f32;
            }
        }
    }

    fn config(frequencies: &[u32], channels: u8) -> ScanConfig {
        let strategy = DemodulationStrategy::TrimmedBurst {
            samples: 20,
            trim_percent: 5,
        };
        ScanConfig::new(frequencies, channels, strategy)
            .unwrap()
            .with_settling(Duration::from_micros(10))
    }

    fn controller<const P: usize>(
        frequencies: &[u32],
        channels: u8,
    ) -> (ScanController<Generator, Selector, Adc, Sensors, P>, Shared) {
        let bench: Shared = Rc::default();
        let ctl = ScanController::new(
            config(frequencies, channels),
            Generator(bench.clone()),
            Selector(bench.clone(), channels),
            Adc(bench.clone()),
            Sensors::default(),
        )
        .unwrap();
        (ctl, bench)
    }

    #[test]
    fn cycle_visits_each_pair_once_frequency_major() {
        let (mut ctl, bench) = controller::<4>(&[1_000, 5_000], 2);
        let packet = block_on(ctl.run_cycle(&Shutdown::new()));
        assert!(packet.is_some());
        assert_eq!(
            bench.borrow().events,
            vec![
                Event::Frequency(1_000),
                Event::Channel(1),
                Event::Channel(2),
                Event::Frequency(5_000),
                Event::Channel(1),
                Event::Channel(2),
            ]
        );
        assert_eq!(ctl.state(), ScanState::Idle);
        assert_eq!(ctl.cycles(), 1);
    }

    #[test]
    fn packet_slots_follow_scan_order() {
        let (mut ctl, _bench) = controller::<6>(&[1_000, 5_000, 100], 2);
        let packet = block_on(ctl.run_cycle(&Shutdown::new())).unwrap();

        for point in scan_order(3, 2) {
            let hz = [1_000, 5_000, 100][point.frequency_index];
            let amp = amplitude_code(hz, point.channel) as f32;
            let expected = peak_to_peak_rms(code_to_volts(2.0 * amp, 2.5));
            let got = packet.estimate(point.index(2)).unwrap();
            assert!((got.mean - expected).abs() < 1e-6, "{point:?}: {got:?}");
            assert_eq!(got.std_dev, 0.0);
        }
    }

    #[test]
    fn state_machine_walks_documented_transitions() {
        let (mut ctl, _bench) = controller::<2>(&[1_000], 2);
        let mut seen = vec![ctl.state()];
        loop {
            let done = block_on(ctl.step()).is_some();
            seen.push(ctl.state());
            if done {
                break;
            }
        }
        use ScanState::*;
        assert_eq!(
            seen,
            vec![
                Idle,
                SelectFrequency,
                SelectChannel,
                Settle,
                Sample,
                Advance,
                SelectChannel,
                Settle,
                Sample,
                Advance,
                Idle
            ]
        );
    }

    #[test]
    fn order_repeats_across_cycles() {
        let (mut ctl, bench) = controller::<4>(&[1_000, 5_000], 2);
        let shutdown = Shutdown::new();
        block_on(ctl.run_cycle(&shutdown)).unwrap();
        let first: Vec<Event> = bench.borrow_mut().events.drain(..).collect();
        block_on(ctl.run_cycle(&shutdown)).unwrap();
        assert_eq!(bench.borrow().events, first);
        assert_eq!(ctl.cycles(), 2);
    }

    #[test]
    fn environment_is_read_once_per_cycle() {
        let (mut ctl, _bench) = controller::<4>(&[1_000, 5_000], 2);
        let shutdown = Shutdown::new();
        let first = block_on(ctl.run_cycle(&shutdown)).unwrap();
        let second = block_on(ctl.run_cycle(&shutdown)).unwrap();
        assert_eq!(first.environment.bme_temperature, 21.0);
        assert_eq!(second.environment.bme_temperature, 22.0);
        let (_, _, _, sensors) = ctl.release();
        assert_eq!(sensors.refreshes, 2);
    }

    #[test]
    fn failed_sensor_read_keeps_last_value() {
        let (mut ctl, _bench) = controller::<2>(&[1_000], 2);
        let shutdown = Shutdown::new();
        block_on(ctl.run_cycle(&shutdown)).unwrap();
        ctl.environment.fail = true;
        let packet = block_on(ctl.run_cycle(&shutdown)).unwrap();
        assert_eq!(packet.environment.bme_temperature, 21.0);
    }

    #[test]
    fn shutdown_stops_before_next_transition() {
        let (mut ctl, bench) = controller::<4>(&[1_000, 5_000], 2);
        let shutdown = Shutdown::new();
        for _ in 0..3 {
            block_on(ctl.step());
        }
        shutdown.request();
        assert!(block_on(ctl.run_cycle(&shutdown)).is_none());
        assert_eq!(ctl.state(), ScanState::Idle);
        assert_eq!(
            bench.borrow().events,
            vec![Event::Frequency(1_000), Event::Channel(1)]
        );
    }

    #[test]
    fn rejects_mismatched_packet_size() {
        let bench: Shared = Rc::default();
        let res = ScanController::<_, _, _, _, 3>::new(
            config(&[1_000, 5_000], 2),
            Generator(bench.clone()),
            Selector(bench.clone(), 2),
            Adc(bench),
            Sensors::default(),
        );
        assert!(matches!(
            res,
            Err(ConfigError::PointMismatch {
                expected: 3,
                actual: 4
            })
        ));
    }

    #[test]
    fn rejects_more_channels_than_selector_has() {
        let bench: Shared = Rc::default();
        let res = ScanController::<_, _, _, _, 4>::new(
            config(&[1_000], 4),
            Generator(bench.clone()),
            Selector(bench.clone(), 2),
            Adc(bench),
            Sensors::default(),
        );
        assert!(matches!(
            res,
            Err(ConfigError::TooManyChannels {
                requested: 4,
                available: 2
            })
        ));
    }

    #[test]
    fn widest_channel_count_completes_the_cycle() {
        let (mut ctl, bench) = controller::<255>(&[1_000], u8::MAX);
        let packet = block_on(ctl.run_cycle(&Shutdown::new()));
        assert!(packet.is_some());
        assert_eq!(ctl.cycles(), 1);
        let bench = bench.borrow();
        let events = &bench.events;
        assert_eq!(events.len(), 1 + 255);
        assert_eq!(events[1], Event::Channel(1));
        assert_eq!(events[255], Event::Channel(255));
        assert_eq!(ctl.point(), ScanPoint { frequency_index: 0, channel: 1 });
    }

    #[test]
    fn scan_order_is_frequency_major() {
        let order: Vec<(usize, u8)> = scan_order(2, 3)
            .map(|p| (p.frequency_index, p.channel))
            .collect();
        assert_eq!(order, vec![(0, 1), (0, 2), (0, 3), (1, 1), (1, 2), (1, 3)]);
        let slots: Vec<usize> = scan_order(2, 3).map(|p| p.index(3)).collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 4, 5]);
    }
}
