//! Power supply constants, register types and configuration.
//!
//! This module contains everything needed to talk about the high-voltage
//! power supply at the register level without owning a bus.

pub mod config;
pub mod consts;
pub mod transport;
pub mod types;
