use embassy_futures::select::{select, Either};
use embassy_time::Timer;

use crate::drivers::{ChannelSelector, EnvironmentSensors, SampleSource, StimulusGenerator};
use crate::ipc::{Enqueued, Shutdown, TelemetryQueue};
use crate::scan::ScanController;

/// Counters reported when the acquisition worker exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcquisitionStats {
    pub cycles: u32,
    pub enqueued: u32,
    pub dropped: u32,
}

/// Scans, enqueues one packet per cycle and paces cycles until `shutdown`.
pub async fn run_acquisition<G, M, A, E, const P: usize, const N: usize>(
    controller: &mut ScanController<G, M, A, E, P>,
    queue: &TelemetryQueue<P, N>,
    shutdown: &Shutdown,
) -> AcquisitionStats
where
    G: StimulusGenerator,
    M: ChannelSelector,
    A: SampleSource,
    E: EnvironmentSensors,
{
    match controller.cycle_period() {
        Some(period) => info!(
            "Acquisition started - one cycle every {} ms",
            period.as_millis()
        ),
        None => info!("Acquisition started - back-to-back cycles"),
    }
    let mut stats = AcquisitionStats::default();

    loop {
        let Some(packet) = controller.run_cycle(shutdown).await else {
            break;
        };
        stats.cycles += 1;
        debug!("Cycle {} complete", stats.cycles);

        // a blocked enqueue must still observe shutdown
        match select(queue.enqueue(packet), shutdown.wait()).await {
            Either::First(Enqueued::Accepted) => stats.enqueued += 1,
            Either::First(Enqueued::Dropped) => stats.dropped += 1,
            Either::Second(()) => break,
        }

        if let Some(period) = controller.cycle_period() {
            let next = controller.cycle_started() + period;
            if let Either::Second(()) = select(Timer::at(next), shutdown.wait()).await {
                break;
            }
        }
    }

    info!(
        "Acquisition stopped after {} cycles ({} queued, {} dropped)",
        stats.cycles, stats.enqueued, stats.dropped
    );
    stats
}
