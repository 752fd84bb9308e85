//! Voltage sequencer.
//!
//! Turns a desired output voltage into the sequence of poller operations the
//! hardware needs: soft-start delay after enabling the output, ramp-down
//! delay before disabling it, and a forced disable before clearing a fault.
//!
//! The hardware has no read-back of its enable state, so the sequencer only
//! knows what it last programmed itself ([`ControllerState`]).
//!
//! # Sequences
//!
//! | Transition | Bus operations |
//! |------------|----------------|
//! | unknown/0 → v>0 | enable, soft-start delay, set point |
//! | unknown/v>0 → 0 | set point 0, ramp-down delay, disable |
//! | v>0 → w>0, 0 → 0 | set point |

use crate::poller::{Poller, PollerError};
use hv_common::psu::config::PsuConfig;
use hv_common::psu::consts::{DEFAULT_RAMP_DOWN_DELAY, DEFAULT_SOFT_START_DELAY};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Relative tolerance when deciding whether a set point changed.
const VOLTAGE_REL_TOLERANCE: f64 = 1e-9;

/// Error types for voltage sequencing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SequencerError {
    /// Requested voltage outside `[0, voltage_factor]`
    #[error("Voltage {volts} V outside valid range [0, {max}] V")]
    VoltageOutOfRange {
        /// Requested voltage
        volts: f64,
        /// Full-scale voltage
        max: f64,
    },

    /// A poller operation failed
    #[error(transparent)]
    Poller(#[from] PollerError),
}

/// Last set point programmed by the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ControllerState {
    /// Nothing programmed since startup (or the last sequence failed midway)
    #[default]
    Unknown,
    /// Voltage in volts
    Known(f64),
}

impl ControllerState {
    /// The known voltage, if any.
    pub fn volts(self) -> Option<f64> {
        match self {
            ControllerState::Unknown => None,
            ControllerState::Known(v) => Some(v),
        }
    }
}

/// Sequencer timing and calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequencerConfig {
    /// Output voltage at full scale, in volts
    pub voltage_factor: f64,
    /// Wait after enabling the output before programming a set point
    pub soft_start_delay: Duration,
    /// Wait after programming zero before disabling the output
    pub ramp_down_delay: Duration,
}

impl SequencerConfig {
    /// Config with the default settle delays.
    pub fn new(voltage_factor: f64) -> Self {
        Self {
            voltage_factor,
            soft_start_delay: DEFAULT_SOFT_START_DELAY,
            ramp_down_delay: DEFAULT_RAMP_DOWN_DELAY,
        }
    }
}

impl From<&PsuConfig> for SequencerConfig {
    fn from(config: &PsuConfig) -> Self {
        Self {
            voltage_factor: config.voltage_factor,
            soft_start_delay: config.soft_start_delay(),
            ramp_down_delay: config.ramp_down_delay(),
        }
    }
}

/// Safe set-point sequencing on top of a [`Poller`].
pub struct VoltageSequencer {
    poller: Arc<Poller>,
    config: SequencerConfig,
    state: parking_lot::Mutex<ControllerState>,
    // Serializes whole sequences; never held by get_voltage().
    sequence: tokio::sync::Mutex<()>,
}

impl VoltageSequencer {
    /// Create a sequencer with `ControllerState::Unknown`.
    pub fn new(poller: Arc<Poller>, config: SequencerConfig) -> Self {
        Self {
            poller,
            config,
            state: parking_lot::Mutex::new(ControllerState::Unknown),
            sequence: tokio::sync::Mutex::new(()),
        }
    }

    /// Last programmed voltage. No hardware access.
    pub fn get_voltage(&self) -> ControllerState {
        *self.state.lock()
    }

    /// Program a new output voltage.
    ///
    /// Returns `true` if the programmed voltage changed (always on the first
    /// call), `false` if it equals the previous one. The set point is written
    /// in either case.
    ///
    /// A started sequence always runs to completion. If a bus operation fails
    /// midway the state becomes `Unknown`, so the next call performs the full
    /// enable or disable sequence again.
    ///
    /// # Errors
    /// `SequencerError::VoltageOutOfRange` before any bus access if `volts`
    /// is outside `[0, voltage_factor]`.
    pub async fn set_voltage(&self, volts: f64) -> Result<bool, SequencerError> {
        self.validate(volts)?;
        let _sequence = self.sequence.lock().await;
        self.run_set_voltage(volts).await
    }

    /// Disable the output, then pulse the fault reset.
    pub async fn reset_fault(&self) -> Result<(), SequencerError> {
        let _sequence = self.sequence.lock().await;
        self.run_set_voltage(0.0).await?;
        info!("Resetting fault condition");
        self.poller.reset_fault().await?;
        Ok(())
    }

    /// The underlying poller, for manual output control.
    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    /// Sequencer configuration.
    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    fn validate(&self, volts: f64) -> Result<(), SequencerError> {
        if (0.0..=self.config.voltage_factor).contains(&volts) {
            Ok(())
        } else {
            Err(SequencerError::VoltageOutOfRange {
                volts,
                max: self.config.voltage_factor,
            })
        }
    }

    async fn run_set_voltage(&self, volts: f64) -> Result<bool, SequencerError> {
        let previous = self.get_voltage();

        if let Err(e) = self.apply(previous, volts).await {
            warn!(
                "Voltage sequence to {} V failed, programmed state now unknown: {}",
                volts, e
            );
            *self.state.lock() = ControllerState::Unknown;
            return Err(e);
        }

        *self.state.lock() = ControllerState::Known(volts);
        Ok(match previous {
            ControllerState::Unknown => true,
            ControllerState::Known(prev) => !approx_eq(prev, volts),
        })
    }

    async fn apply(&self, previous: ControllerState, volts: f64) -> Result<(), SequencerError> {
        let enable = volts > 0.0
            && match previous {
                ControllerState::Unknown => true,
                ControllerState::Known(prev) => prev == 0.0,
            };
        let disable = volts == 0.0
            && match previous {
                ControllerState::Unknown => true,
                ControllerState::Known(prev) => prev > 0.0,
            };

        if enable {
            info!("Enabling high-voltage output");
            self.poller.enable_output(true).await?;
            tokio::time::sleep(self.config.soft_start_delay).await;
        }

        info!("Setting output voltage to {} V", volts);
        self.poller
            .set_point(volts / self.config.voltage_factor)
            .await?;

        if disable {
            tokio::time::sleep(self.config.ramp_down_delay).await;
            info!("Disabling high-voltage output");
            self.poller.enable_output(false).await?;
        }

        Ok(())
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= VOLTAGE_REL_TOLERANCE * a.abs().max(b.abs())
}
