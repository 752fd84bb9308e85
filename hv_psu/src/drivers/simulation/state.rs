//! Power supply model.
//!
//! Register-level behaviour of the supply: a round-robin stream of state
//! updates, a latched fault that forces the output off until a reset pulse,
//! and monitor readings that follow the programmed set point.

use hv_common::psu::consts::REGISTER_MAX;
use hv_common::psu::transport::BusError;
use hv_common::psu::types::{ChannelTag, ControlFlags, RawSample, StatusFlags};

/// Nominal 48 V rail reading (scaled to a 60 V full scale).
const RAIL_48V_RAW: u16 = 3276;
/// Nominal 24 V rail reading (scaled to a 30 V full scale).
const RAIL_24V_RAW: u16 = 3276;
/// Room-temperature NTC reading.
const NTC_RAW: u16 = 1850;
/// Balanced current ratio.
const RATIO_RAW: u16 = 2048;

/// Register-level model of the power supply.
#[derive(Debug, Clone, Default)]
pub struct PsuModel {
    /// Control register as last written
    control: ControlFlags,
    /// Last written set point
    set_point_raw: u16,
    /// Faults latched until a reset pulse
    latched_faults: StatusFlags,
    /// Position in the update round-robin
    next_channel: usize,
}

impl PsuModel {
    /// Create a model with output off and no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the high-voltage stage is producing output.
    pub fn output_active(&self) -> bool {
        self.control.contains(ControlFlags::HV_ON) && self.latched_faults.is_empty()
    }

    /// Last written raw set point.
    pub fn set_point_raw(&self) -> u16 {
        self.set_point_raw
    }

    /// Currently latched faults.
    pub fn latched_faults(&self) -> StatusFlags {
        self.latched_faults
    }

    /// Latch a fault; the output drops until the next reset pulse.
    pub fn inject_fault(&mut self, fault: StatusFlags) {
        self.latched_faults |= fault;
    }

    /// Produce the next state update.
    pub fn next_update(&mut self) -> RawSample {
        let channel = ChannelTag::ALL[self.next_channel];
        self.next_channel = (self.next_channel + 1) % ChannelTag::COUNT;
        RawSample::new(channel, self.reading(channel))
    }

    /// Apply a control register write.
    pub fn write_control(&mut self, flags: ControlFlags) {
        if flags.contains(ControlFlags::RESET) {
            self.latched_faults = StatusFlags::empty();
        }
        self.control = flags;
    }

    /// Apply a set-point write.
    pub fn write_set_point(&mut self, raw: u16) -> Result<(), BusError> {
        if raw > REGISTER_MAX {
            return Err(BusError::SetPointOutOfRange(raw));
        }
        self.set_point_raw = raw;
        Ok(())
    }

    fn output_raw(&self) -> u16 {
        if self.output_active() {
            self.set_point_raw
        } else {
            0
        }
    }

    fn reading(&self, channel: ChannelTag) -> u32 {
        let raw = match channel {
            ChannelTag::UmonUp => self.output_raw(),
            ChannelTag::ImonUp | ChannelTag::Imon1 | ChannelTag::Imon2 => self.output_raw() / 16,
            ChannelTag::Ntc1 | ChannelTag::Ntc2 => NTC_RAW,
            ChannelTag::U48v => RAIL_48V_RAW,
            ChannelTag::U24v => RAIL_24V_RAW,
            ChannelTag::Ratio => RATIO_RAW,
            ChannelTag::StatusFlags => return self.status_word().bits(),
        };
        u32::from(raw)
    }

    fn status_word(&self) -> StatusFlags {
        let mut word = StatusFlags::PC_BOARD_REMOTE | self.latched_faults;
        if !self.latched_faults.is_empty() {
            word |= StatusFlags::FAILURE;
        }
        if self.output_active() {
            word |= StatusFlags::HV_ON;
        }
        word
    }
}
