//! Power supply configuration.
//!
//! `PsuConfig` is loaded once at startup from `psu.toml` (and/or command
//! line overrides) and is immutable afterwards.
//!
//! # TOML Example
//!
//! ```toml
//! transport = "i2c"
//! bus_idx = 1
//! dev_addr = 0x40
//! voltage_factor = 3000.0
//! polling_interval_ms = 10
//!
//! [shared]
//! log_level = "info"
//! service_name = "hv-psu-01"
//! ```

use crate::config::{ConfigError, SharedConfig};
use crate::psu::consts::{
    DEFAULT_POLLING_INTERVAL, DEFAULT_RAMP_DOWN_DELAY, DEFAULT_SOFT_START_DELAY, MAX_I2C_ADDRESS,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

fn default_polling_interval_ms() -> u64 {
    DEFAULT_POLLING_INTERVAL.as_millis() as u64
}

fn default_soft_start_delay_ms() -> u64 {
    DEFAULT_SOFT_START_DELAY.as_millis() as u64
}

fn default_ramp_down_delay_ms() -> u64 {
    DEFAULT_RAMP_DOWN_DELAY.as_millis() as u64
}

/// Which bus transport backs the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Linux I2C character device (`/dev/i2c-<n>`)
    #[default]
    I2c,
    /// Software model of the power supply
    Simulation,
}

impl TransportKind {
    /// Registry name of the transport.
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::I2c => "i2c",
            TransportKind::Simulation => "simulation",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main configuration loaded from `psu.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PsuConfig {
    /// Logging and instance naming.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Bus transport to use.
    #[serde(default)]
    pub transport: TransportKind,

    /// Index of the I2C bus (cf. `/dev/i2c-<n>`).
    #[serde(default)]
    pub bus_idx: Option<u32>,

    /// 7-bit device address on the bus (as reported by `i2cdetect`).
    #[serde(default)]
    pub dev_addr: Option<u16>,

    /// Output voltage at full scale, in volts (hardware calibration).
    #[serde(default)]
    pub voltage_factor: f64,

    /// Target interval between poll reads, in milliseconds.
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Wait after enabling the output before programming a set point, in milliseconds.
    #[serde(default = "default_soft_start_delay_ms")]
    pub soft_start_delay_ms: u64,

    /// Wait after programming zero before disabling the output, in milliseconds.
    #[serde(default = "default_ramp_down_delay_ms")]
    pub ramp_down_delay_ms: u64,
}

impl Default for PsuConfig {
    fn default() -> Self {
        Self {
            shared: SharedConfig::default(),
            transport: TransportKind::default(),
            bus_idx: None,
            dev_addr: None,
            voltage_factor: 0.0,
            polling_interval_ms: default_polling_interval_ms(),
            soft_start_delay_ms: default_soft_start_delay_ms(),
            ramp_down_delay_ms: default_ramp_down_delay_ms(),
        }
    }
}

impl PsuConfig {
    /// Validate the configuration.
    ///
    /// # Validation Rules
    /// 1. `shared` is valid
    /// 2. `voltage_factor` is finite and > 0
    /// 3. `polling_interval_ms` > 0
    /// 4. For the I2C transport, `bus_idx` and `dev_addr` are set and
    ///    `dev_addr` is a 7-bit address
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if !self.voltage_factor.is_finite() || self.voltage_factor <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "voltage_factor must be a positive number of volts, got {}",
                self.voltage_factor
            )));
        }

        if self.polling_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "polling_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.transport == TransportKind::I2c {
            if self.bus_idx.is_none() {
                return Err(ConfigError::ValidationError(
                    "bus_idx is required for the i2c transport".to_string(),
                ));
            }
            match self.dev_addr {
                None => {
                    return Err(ConfigError::ValidationError(
                        "dev_addr is required for the i2c transport".to_string(),
                    ));
                }
                Some(addr) if addr > MAX_I2C_ADDRESS => {
                    return Err(ConfigError::ValidationError(format!(
                        "dev_addr 0x{addr:x} is not a 7-bit address (max 0x{MAX_I2C_ADDRESS:x})"
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Target poll interval.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    /// Soft-start settle delay.
    pub fn soft_start_delay(&self) -> Duration {
        Duration::from_millis(self.soft_start_delay_ms)
    }

    /// Ramp-down settle delay.
    pub fn ramp_down_delay(&self) -> Duration {
        Duration::from_millis(self.ramp_down_delay_ms)
    }

    /// Path of the I2C character device, if a bus index is configured.
    pub fn device_path(&self) -> Option<String> {
        self.bus_idx.map(|idx| format!("/dev/i2c-{idx}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;

    fn i2c_config() -> PsuConfig {
        PsuConfig {
            bus_idx: Some(1),
            dev_addr: Some(0x40),
            voltage_factor: 3000.0,
            ..PsuConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = PsuConfig::default();
        assert_eq!(config.transport, TransportKind::I2c);
        assert_eq!(config.polling_interval(), DEFAULT_POLLING_INTERVAL);
        assert_eq!(config.soft_start_delay(), Duration::from_secs(2));
        assert_eq!(config.ramp_down_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_full_file() {
        let config = PsuConfig::from_toml(
            r#"
transport = "i2c"
bus_idx = 2
dev_addr = 0x48
voltage_factor = 1500.0
polling_interval_ms = 20
soft_start_delay_ms = 500

[shared]
log_level = "debug"
service_name = "hv-psu-test"
"#,
        )
        .unwrap();

        assert_eq!(config.bus_idx, Some(2));
        assert_eq!(config.dev_addr, Some(0x48));
        assert_eq!(config.voltage_factor, 1500.0);
        assert_eq!(config.polling_interval(), Duration::from_millis(20));
        assert_eq!(config.soft_start_delay(), Duration::from_millis(500));
        assert_eq!(config.ramp_down_delay(), DEFAULT_RAMP_DOWN_DELAY);
        assert_eq!(config.device_path().as_deref(), Some("/dev/i2c-2"));
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result = PsuConfig::from_toml("voltage_factor = 10.0\nvoltage_max = 5.0\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_voltage_factor() {
        let mut config = i2c_config();
        config.validate().unwrap();

        config.voltage_factor = 0.0;
        assert!(config.validate().is_err());
        config.voltage_factor = f64::INFINITY;
        assert!(config.validate().is_err());
        config.voltage_factor = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_polling_interval() {
        let mut config = i2c_config();
        config.polling_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_i2c_requires_bus_identifiers() {
        let mut config = i2c_config();
        config.bus_idx = None;
        assert!(config.validate().is_err());

        let mut config = i2c_config();
        config.dev_addr = None;
        assert!(config.validate().is_err());

        let mut config = i2c_config();
        config.dev_addr = Some(0x80);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("7-bit"));
    }

    #[test]
    fn test_simulation_needs_no_bus() {
        let config = PsuConfig {
            transport: TransportKind::Simulation,
            voltage_factor: 100.0,
            ..PsuConfig::default()
        };
        config.validate().unwrap();
        assert_eq!(config.transport.to_string(), "simulation");
    }
}
