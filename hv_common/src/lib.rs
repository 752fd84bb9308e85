//! HV PSU Common Library
//!
//! This crate provides the types shared between the HV PSU controller crates:
//! the register-level vocabulary of the power supply, the bus transport
//! contract, and configuration loading.
//!
//! # Module Structure
//!
//! - [`psu`] - Power supply constants, channel/flag types, transport trait, configuration
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use hv_common::prelude::*;
//!
//! let raw = set_point_to_raw(0.5).unwrap();
//! assert_eq!(raw, 2048);
//! ```

pub mod config;
pub mod prelude;
pub mod psu;
