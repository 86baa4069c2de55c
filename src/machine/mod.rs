//! Machine driver abstraction.
//!
//! A [`MachineDriver`] translates abstract table commands into device-specific
//! motion. Drivers are selected once at startup by the configured name via
//! [`create_driver`]; `machd` owns the single instance exclusively for its
//! whole lifetime. Concrete serial translators (GRBL and friends) live outside
//! this crate; the shipped `sim` driver runs the full daemon stack without
//! hardware.

pub mod marker;
pub mod sim;

use crate::chains::{Drawing, Point, Units};
use crate::config::MachineConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Snapshot of machine position and readiness
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct MachineStatus {
    /// Current ball position in machine units
    pub pos: Point,
    /// Whether the machine is idle and ready for the next drawing
    pub ready: bool,
}

/// Device-specific machine implementation
pub trait MachineDriver: Send {
    /// Move to the home position so the machine is in a known state.
    /// Runs the configured init sequence on drivers that have one.
    fn home(&mut self) -> Result<()>;

    /// Forward one raw command line to the device verbatim
    fn send(&mut self, line: &str) -> Result<()>;

    /// Queue a drawing at the given feed rate and units
    fn run(&mut self, drawing: &Drawing, units: Units, feed: f64) -> Result<()>;

    /// Discard anything still queued on the device
    fn flush(&mut self) -> Result<()>;

    /// Immediate stop
    fn halt(&mut self) -> Result<()>;

    /// Query current position and readiness
    fn status(&mut self) -> Result<MachineStatus>;

    /// Release the device; called exactly once at daemon shutdown
    fn shutdown(&mut self) -> Result<()>;
}

/// Driver names `create_driver` resolves
pub const AVAILABLE_DRIVERS: &[&str] = &["sim"];

/// Create a machine driver from the configured name
pub fn create_driver(config: &MachineConfig) -> Result<Box<dyn MachineDriver>> {
    match config.driver.as_str() {
        "sim" => Ok(Box::new(sim::SimDriver::new(config.clone()))),
        other => Err(Error::UnknownDriver(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_create_sim_driver() {
        let config = AppConfig::sandtable_defaults().machine;
        let mut driver = create_driver(&config).unwrap();
        let status = driver.status().unwrap();
        assert!(status.ready);
    }

    #[test]
    fn test_unknown_driver_is_rejected() {
        let mut config = AppConfig::sandtable_defaults().machine;
        config.driver = "grbl".to_string();
        match create_driver(&config) {
            Err(Error::UnknownDriver(name)) => assert_eq!(name, "grbl"),
            other => panic!("expected UnknownDriver, got {:?}", other.map(|_| ())),
        }
    }
}
