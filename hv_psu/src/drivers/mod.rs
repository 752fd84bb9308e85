//! Bus transport implementations.
//!
//! - [`i2c`] - Linux I2C character device transport
//! - [`simulation`] - Software model of the power supply for running without hardware
//!
//! # Adding New Transports
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement the `BusTransport` trait from `hv_common::psu::transport`
//! 3. Register its factory in [`register_all_transports`]

pub mod i2c;
pub mod simulation;

use crate::transport_registry::TransportRegistry;
use hv_common::psu::config::TransportKind;

/// Register all built-in transports.
pub fn register_all_transports(registry: &mut TransportRegistry) {
    registry.register(TransportKind::I2c.as_str(), i2c::create_transport);
    registry.register(
        TransportKind::Simulation.as_str(),
        simulation::create_transport,
    );
}
