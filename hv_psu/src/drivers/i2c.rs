//! Linux I2C transport.
//!
//! Talks to the power supply through `/dev/i2c-<n>` using raw reads and
//! writes. The common SMBus helpers cannot issue the plain four-byte reads
//! the supply expects, so the device is addressed with the `I2C_SLAVE` ioctl
//! and used as a byte stream.
//!
//! # Framing
//!
//! | Direction | Bytes | Layout (big-endian) |
//! |-----------|-------|---------------------|
//! | read  | 4 | `cccc vvvv vvvv vvvv ....` analog, full word for status flags |
//! | write | 2 | `1100 0000 ffff ffff` control flags |
//! | write | 2 | `0000 vvvv vvvv vvvv` set point |

use hv_common::psu::config::PsuConfig;
use hv_common::psu::consts::{
    COMMAND_LEN, CONTROL_REGISTER_COMMAND, NO_DATA_CHANNEL, REGISTER_MAX, REGISTER_VALUE_MASK,
    STATE_UPDATE_LEN,
};
use hv_common::psu::transport::{BusError, BusTransport};
use hv_common::psu::types::{ChannelTag, ControlFlags, RawSample};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use tracing::{debug, info};

/// `I2C_SLAVE` request code from `linux/i2c-dev.h`.
const I2C_SLAVE: libc::c_ulong = 0x0703;

mod ioctl {
    nix::ioctl_write_int_bad!(i2c_set_slave_address, super::I2C_SLAVE);
}

/// Factory for the transport registry.
pub fn create_transport(config: &PsuConfig) -> Result<Box<dyn BusTransport>, BusError> {
    let (Some(bus_idx), Some(dev_addr)) = (config.bus_idx, config.dev_addr) else {
        return Err(BusError::Open {
            device: "i2c".to_string(),
            reason: "bus_idx and dev_addr must be configured".to_string(),
        });
    };
    Ok(Box::new(I2cTransport::open(bus_idx, dev_addr)?))
}

/// Power supply on a local I2C bus.
pub struct I2cTransport {
    file: File,
    device: String,
}

impl I2cTransport {
    /// Open `/dev/i2c-<bus_idx>`, select `dev_addr` and probe with one read.
    ///
    /// `dev_addr` is the 7-bit address as reported by `i2cdetect`; the
    /// read/write bit is added by the kernel.
    pub fn open(bus_idx: u32, dev_addr: u16) -> Result<Self, BusError> {
        let device = format!("/dev/i2c-{bus_idx}");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&device)
            .map_err(|e| BusError::Open {
                device: device.clone(),
                reason: e.to_string(),
            })?;

        let address = libc::c_int::from(dev_addr);
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let selected = unsafe { ioctl::i2c_set_slave_address(file.as_raw_fd(), address) };
        selected.map_err(|e| BusError::Open {
            device: device.clone(),
            reason: format!("failed to set slave address 0x{dev_addr:x}: {e}"),
        })?;

        let mut transport = Self { file, device };
        transport.read_state_update()?;
        info!(
            "Opened power supply on {} at address 0x{:x}",
            transport.device(),
            dev_addr
        );
        Ok(transport)
    }

    /// Device path this transport is bound to.
    pub fn device(&self) -> &str {
        &self.device
    }

    fn write_command(&mut self, command: u16) -> Result<(), BusError> {
        let written = self
            .file
            .write(&command.to_be_bytes())
            .map_err(|e| BusError::Io(format!("{}: {e}", self.device)))?;
        if written != COMMAND_LEN {
            return Err(BusError::ShortWrite {
                got: written,
                expected: COMMAND_LEN,
            });
        }
        Ok(())
    }
}

impl BusTransport for I2cTransport {
    fn name(&self) -> &'static str {
        "i2c"
    }

    fn read_state_update(&mut self) -> Result<Option<RawSample>, BusError> {
        // Always four bytes, even though analog values only occupy two.
        let mut response = [0u8; STATE_UPDATE_LEN];
        let read = self
            .file
            .read(&mut response)
            .map_err(|e| BusError::Io(format!("{}: {e}", self.device)))?;
        if read != STATE_UPDATE_LEN {
            return Err(BusError::ShortRead {
                got: read,
                expected: STATE_UPDATE_LEN,
            });
        }
        decode_state_update(response)
    }

    fn write_control_flags(&mut self, flags: ControlFlags) -> Result<(), BusError> {
        debug!("{}: control flags {:?}", self.device, flags);
        self.write_command(encode_control_flags(flags))
    }

    fn write_hv_set_point(&mut self, raw: u16) -> Result<(), BusError> {
        self.write_command(encode_set_point(raw)?)
    }
}

/// Decode a four-byte state update.
///
/// Returns `Ok(None)` for the "no more data" marker.
pub fn decode_state_update(
    response: [u8; STATE_UPDATE_LEN],
) -> Result<Option<RawSample>, BusError> {
    let nibble = response[0] >> 4;
    if nibble == NO_DATA_CHANNEL {
        return Ok(None);
    }

    let channel = ChannelTag::from_nibble(nibble).ok_or(BusError::UnexpectedChannel(nibble))?;
    let raw = if channel.is_analog() {
        let word = u16::from_be_bytes([response[0], response[1]]);
        u32::from(word & REGISTER_VALUE_MASK)
    } else {
        u32::from_be_bytes(response)
    };
    Ok(Some(RawSample::new(channel, raw)))
}

/// Encode a control register write. The whole register is replaced.
pub fn encode_control_flags(flags: ControlFlags) -> u16 {
    CONTROL_REGISTER_COMMAND | flags.bits()
}

/// Encode a set-point write.
pub fn encode_set_point(raw: u16) -> Result<u16, BusError> {
    if raw > REGISTER_MAX {
        return Err(BusError::SetPointOutOfRange(raw));
    }
    Ok(raw)
}
