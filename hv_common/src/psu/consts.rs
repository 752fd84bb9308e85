//! Power supply constants.
//!
//! Register widths, command framing and default timings for the
//! high-voltage power supply module.

use std::time::Duration;

/// Canonical service name (used for logging).
pub const PSU_SERVICE_NAME: &str = "hv_psu";

/// Width of analog register values in bits.
pub const REGISTER_BITS: u32 = 12;

/// Largest raw value of an analog register (full scale).
pub const REGISTER_MAX: u16 = (1 << REGISTER_BITS) - 1;

/// Mask selecting the value bits of an analog read-back word.
pub const REGISTER_VALUE_MASK: u16 = REGISTER_MAX;

/// Command prefix selecting the control flag register (bits `1100`).
pub const CONTROL_REGISTER_COMMAND: u16 = 0xc000;

/// Channel nibble signalling that no update is pending.
pub const NO_DATA_CHANNEL: u8 = 0xf;

/// Number of bytes in every state update read.
pub const STATE_UPDATE_LEN: usize = 4;

/// Number of bytes in every command write.
pub const COMMAND_LEN: usize = 2;

/// Default target interval between two poll reads.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(10);

/// Default settle time between enabling the output and programming a set point.
pub const DEFAULT_SOFT_START_DELAY: Duration = Duration::from_secs(2);

/// Default settle time between programming zero and disabling the output.
pub const DEFAULT_RAMP_DOWN_DELAY: Duration = Duration::from_secs(2);

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hv_psu/psu.toml";

/// Highest valid 7-bit I2C device address.
pub const MAX_I2C_ADDRESS: u16 = 0x77;
