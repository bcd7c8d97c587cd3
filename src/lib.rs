#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
mod fmt;

#[cfg(feature = "firmware")]
pub mod board;
pub mod config;
pub mod demod;
pub mod drivers;
pub mod ipc;
pub mod packet;
pub mod scan;
pub mod tasks;

#[cfg(feature = "firmware")]
pub use board::Board;
pub use config::{ConfigError, ScanConfig};
pub use demod::{DemodulationStrategy, Demodulator};
pub use ipc::{EnqueuePolicy, Shutdown, TelemetryQueue};
pub use packet::{AmplitudeEstimate, EnvironmentReadings, MeasurementPacket};
pub use scan::{ScanController, ScanPoint, ScanState};
