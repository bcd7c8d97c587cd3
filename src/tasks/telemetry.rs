use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant};

use crate::config::TELEMETRY_STATS_PERIOD_S;
use crate::drivers::{LinkError, Transport};
use crate::ipc::{Shutdown, TelemetryQueue};
use crate::packet::MeasurementPacket;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ForwarderStats {
    pub sent: u32,
    pub failed: u32,
}

/// Drains the telemetry queue into a transport, one call per packet.
/// A failed send is counted and the packet discarded.
pub struct TelemetryForwarder<T> {
    transport: T,
    stats: ForwarderStats,
    report_every: Duration,
    last_report: Instant,
}

impl<T: Transport> TelemetryForwarder<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            stats: ForwarderStats::default(),
            report_every: Duration::from_secs(TELEMETRY_STATS_PERIOD_S),
            last_report: Instant::now(),
        }
    }

    pub fn with_report_period(mut self, period: Duration) -> Self {
        self.report_every = period;
        self
    }

    pub fn stats(&self) -> ForwarderStats {
        self.stats
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub async fn forward<const P: usize>(
        &mut self,
        packet: &MeasurementPacket<P>,
    ) -> Result<(), LinkError> {
        match self.transport.send(packet.as_bytes()).await {
            Ok(()) => {
                self.stats.sent += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.failed += 1;
                if self.stats.failed % 10 == 1 {
                    warn!("Telemetry send error #{}: {:?}", self.stats.failed, e);
                }
                Err(e)
            }
        }
    }

    /// Forwards packets until `shutdown`. The queue is checked first, so
    /// packets already waiting still go out before the forwarder stops.
    pub async fn run<const P: usize, const N: usize>(
        &mut self,
        queue: &TelemetryQueue<P, N>,
        shutdown: &Shutdown,
    ) -> ForwarderStats {
        info!(
            "Telemetry forwarder started - {} byte packets, queue depth {}",
            MeasurementPacket::<P>::WIRE_SIZE,
            N
        );
        loop {
            let packet = match select(queue.dequeue(), shutdown.wait()).await {
                Either::First(packet) => packet,
                Either::Second(()) => break,
            };
            // failures are already counted
            let _ = self.forward(&packet).await;
            self.report(queue.dropped_count());
        }
        info!(
            "Telemetry forwarder stopped: {} sent, {} failed, {} left queued",
            self.stats.sent,
            self.stats.failed,
            queue.len()
        );
        self.stats
    }

    fn report(&mut self, dropped: u32) {
        let now = Instant::now();
        if now.duration_since(self.last_report) < self.report_every {
            return;
        }
        info!(
            "Telemetry: {} sent, {} failed, {} dropped",
            self.stats.sent, self.stats.failed, dropped
        );
        self.last_report = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::EnqueuePolicy;
    use crate::packet::EnvironmentReadings;
    use embassy_futures::block_on;
    use std::vec::Vec;

    /// Fails every `fail_every`-th send and records the rest.
    struct Recorder {
        sends: u32,
        fail_every: u32,
        payloads: Vec<Vec<u8>>,
    }

    impl Recorder {
        fn new(fail_every: u32) -> Self {
            Self {
                sends: 0,
                fail_every,
                payloads: Vec::new(),
            }
        }
    }

    impl Transport for Recorder {
        async fn send(&mut self, payload: &[u8]) -> Result<(), LinkError> {
            self.sends += 1;
            if self.fail_every != 0 && self.sends % self.fail_every == 0 {
                return Err(LinkError::Io);
            }
            self.payloads.push(payload.to_vec());
            Ok(())
        }
    }

    fn packet(tag: f32) -> MeasurementPacket<2> {
        let mut p = MeasurementPacket::new(EnvironmentReadings::default());
        p.mean[1] = tag;
        p
    }

    #[test]
    fn forwards_whole_packets_in_order() {
        let queue: TelemetryQueue<2, 4> = TelemetryQueue::new(EnqueuePolicy::Block);
        let shutdown = Shutdown::new();
        for i in 0..3 {
            block_on(queue.enqueue(packet(i as f32)));
        }
        let mut fwd = TelemetryForwarder::new(Recorder::new(0));
        let stop = async {
            while !queue.is_empty() {
                embassy_futures::yield_now().await;
            }
            shutdown.request();
        };
        let (stats, ()) = block_on(embassy_futures::join::join(fwd.run(&queue, &shutdown), stop));
        assert_eq!(stats, ForwarderStats { sent: 3, failed: 0 });

        let recorder = fwd.into_transport();
        for (i, bytes) in recorder.payloads.iter().enumerate() {
            assert_eq!(bytes.len(), MeasurementPacket::<2>::WIRE_SIZE);
            let decoded = MeasurementPacket::<2>::from_bytes(bytes).unwrap();
            assert_eq!(decoded.mean[1], i as f32);
        }
    }

    #[test]
    fn failed_send_is_not_retried() {
        let mut fwd = TelemetryForwarder::new(Recorder::new(2));
        assert!(block_on(fwd.forward(&packet(1.0))).is_ok());
        assert_eq!(block_on(fwd.forward(&packet(2.0))), Err(LinkError::Io));
        assert!(block_on(fwd.forward(&packet(3.0))).is_ok());

        assert_eq!(fwd.stats(), ForwarderStats { sent: 2, failed: 1 });
        let recorder = fwd.into_transport();
        assert_eq!(recorder.sends, 3);
        let tags: Vec<f32> = recorder
            .payloads
            .iter()
            .map(|b| MeasurementPacket::<2>::from_bytes(b).unwrap().mean[1])
            .collect();
        assert_eq!(tags, vec![1.0, 3.0]);
    }

    #[test]
    fn drains_ready_packets_before_stopping() {
        let queue: TelemetryQueue<2, 4> = TelemetryQueue::new(EnqueuePolicy::Block);
        let shutdown = Shutdown::new();
        block_on(queue.enqueue(packet(1.0)));
        block_on(queue.enqueue(packet(2.0)));
        shutdown.request();

        let mut fwd = TelemetryForwarder::new(Recorder::new(0));
        let stats = block_on(fwd.run(&queue, &shutdown));
        assert_eq!(stats.sent, 2);
        assert!(queue.is_empty());
    }
}
