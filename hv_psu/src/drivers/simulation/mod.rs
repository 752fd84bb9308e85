//! Simulation transport module.
//!
//! This module provides a software model of the power supply for
//! development and testing without physical hardware.

mod driver;
mod state;

pub use driver::{SimulatedPsu, SimulationHandle};
pub use state::PsuModel;

use hv_common::psu::config::PsuConfig;
use hv_common::psu::transport::{BusError, BusTransport};

/// Factory function to create a simulated power supply.
pub fn create_transport(_config: &PsuConfig) -> Result<Box<dyn BusTransport>, BusError> {
    Ok(Box::new(SimulatedPsu::new()))
}
