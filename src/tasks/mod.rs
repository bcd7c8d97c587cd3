pub mod acquisition;
pub mod telemetry;

pub use acquisition::{run_acquisition, AcquisitionStats};
pub use telemetry::{ForwarderStats, TelemetryForwarder};

#[cfg(feature = "firmware")]
mod firmware {
    use embassy_executor::task;

    use super::{run_acquisition, TelemetryForwarder};
    use crate::board::{Link, Scanner};
    use crate::ipc::{SHUTDOWN, TELEMETRY};

    #[task]
    pub async fn acquisition_task(mut scanner: Scanner) {
        run_acquisition(&mut scanner, &TELEMETRY, &SHUTDOWN).await;
    }

    #[task]
    pub async fn telemetry_task(link: Link) {
        TelemetryForwarder::new(link).run(&TELEMETRY, &SHUTDOWN).await;
    }
}

#[cfg(feature = "firmware")]
pub use firmware::{acquisition_task, telemetry_task};
