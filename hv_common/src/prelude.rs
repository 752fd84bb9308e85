//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use hv_common::prelude::*;` and get
//! the most important types without listing individual paths.

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};
pub use crate::psu::config::{PsuConfig, TransportKind};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::psu::consts::{
    DEFAULT_POLLING_INTERVAL, DEFAULT_RAMP_DOWN_DELAY, DEFAULT_SOFT_START_DELAY, REGISTER_MAX,
};

// ─── Bus ────────────────────────────────────────────────────────────
pub use crate::psu::transport::{BusError, BusTransport};
pub use crate::psu::types::{
    ChannelTag, ControlFlags, RawSample, StatusFlags, normalize_raw, set_point_to_raw,
};
