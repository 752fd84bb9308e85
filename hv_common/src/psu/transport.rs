//! Bus transport trait and error types.
//!
//! This module defines:
//! - `BusTransport` trait - Blocking register-level access to the power supply
//! - `BusError` enum - Error types for bus transactions

use crate::psu::types::{ControlFlags, RawSample};
use thiserror::Error;

/// Error types for bus transactions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BusError {
    /// The bus device could not be opened or addressed
    #[error("Failed to open bus device {device}: {reason}")]
    Open {
        /// Device path or identifier
        device: String,
        /// Underlying cause
        reason: String,
    },

    /// A read or write system call failed
    #[error("Bus I/O error: {0}")]
    Io(String),

    /// Fewer bytes than a full state update were read
    #[error("Only {got} of {expected} bytes read from bus")]
    ShortRead {
        /// Bytes actually read
        got: usize,
        /// Bytes required
        expected: usize,
    },

    /// A command write did not transfer the whole command
    #[error("Failed to write {expected}-byte command, write returned {got}")]
    ShortWrite {
        /// Bytes actually written
        got: usize,
        /// Bytes required
        expected: usize,
    },

    /// The channel nibble of a state update names no known channel
    #[error("Unexpected state update type: 0x{0:x}")]
    UnexpectedChannel(u8),

    /// A raw set point does not fit the 12-bit register
    #[error("Set point {0} outside 12-bit register range")]
    SetPointOutOfRange(u16),
}

/// Blocking register-level access to the power supply.
///
/// All methods block the calling thread for the duration of one bus
/// transaction. Callers running on an async runtime must move calls onto a
/// blocking-capable thread and must never issue two transactions at once.
///
/// # Contract
///
/// | Operation | Bus traffic |
/// |-----------|-------------|
/// | `read_state_update()` | one read |
/// | `write_control_flags()` | one write, whole register |
/// | `write_hv_set_point()` | one write |
pub trait BusTransport: Send {
    /// Returns the transport's identifier (e.g., "i2c", "simulation").
    fn name(&self) -> &'static str;

    /// Read one pending state update.
    ///
    /// Returns `Ok(None)` if the hardware reports that no update is pending.
    ///
    /// # Errors
    /// `BusError::ShortRead` or `BusError::Io` on a failed transaction,
    /// `BusError::UnexpectedChannel` if the update names an unknown channel.
    fn read_state_update(&mut self) -> Result<Option<RawSample>, BusError>;

    /// Write the whole control register.
    ///
    /// Flags not contained in `flags` are cleared.
    fn write_control_flags(&mut self, flags: ControlFlags) -> Result<(), BusError>;

    /// Write a raw high-voltage set point in `0..=4095`.
    ///
    /// # Errors
    /// `BusError::SetPointOutOfRange` if `raw` does not fit 12 bits.
    fn write_hv_set_point(&mut self, raw: u16) -> Result<(), BusError>;
}

impl<T: BusTransport + ?Sized> BusTransport for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn read_state_update(&mut self) -> Result<Option<RawSample>, BusError> {
        (**self).read_state_update()
    }

    fn write_control_flags(&mut self, flags: ControlFlags) -> Result<(), BusError> {
        (**self).write_control_flags(flags)
    }

    fn write_hv_set_point(&mut self, raw: u16) -> Result<(), BusError> {
        (**self).write_hv_set_point(raw)
    }
}
