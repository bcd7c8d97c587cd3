use super::EnvironmentSensors;
use crate::packet::EnvironmentReadings;

/// Board without slow sensors fitted; readings keep their previous values.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unfitted;

impl EnvironmentSensors for Unfitted {
    async fn refresh(&mut self, _readings: &mut EnvironmentReadings) {}
}
