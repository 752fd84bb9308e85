//! Register-level types of the power supply.
//!
//! This module defines:
//! - `ChannelTag` - The state update channels reported by the hardware
//! - `ControlFlags` - Bits of the control register
//! - `StatusFlags` - Bits of the status-flags channel
//! - `RawSample` - One state update as read from the bus
//! - Conversions between raw register values and normalized fractions

use crate::psu::consts::REGISTER_MAX;
use bitflags::{Flags, bitflags};
use std::fmt;

/// The state update channels provided by the hardware.
///
/// The analog channels are internal read-back values documented only by
/// their names. The last channel carries the status bitfield (see
/// [`StatusFlags`]). Discriminants are the channel nibble on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ChannelTag {
    /// Upper current monitor
    ImonUp = 0x0,
    /// Current monitor 2
    Imon2 = 0x1,
    /// Upper voltage monitor
    UmonUp = 0x2,
    /// Temperature sensor 2
    Ntc2 = 0x3,
    /// Temperature sensor 1
    Ntc1 = 0x4,
    /// Current monitor 1
    Imon1 = 0x5,
    /// 48 V supply rail
    U48v = 0x6,
    /// 24 V supply rail
    U24v = 0x7,
    /// Current ratio
    Ratio = 0x8,
    /// Status bitfield (not scaled)
    StatusFlags = 0xc,
}

impl ChannelTag {
    /// Number of channels.
    pub const COUNT: usize = 10;

    /// All channels in dispatch-table order.
    pub const ALL: [ChannelTag; Self::COUNT] = [
        ChannelTag::ImonUp,
        ChannelTag::Imon2,
        ChannelTag::UmonUp,
        ChannelTag::Ntc2,
        ChannelTag::Ntc1,
        ChannelTag::Imon1,
        ChannelTag::U48v,
        ChannelTag::U24v,
        ChannelTag::Ratio,
        ChannelTag::StatusFlags,
    ];

    /// Decode the channel nibble of a state update.
    ///
    /// Returns `None` for nibbles that do not name a channel (including the
    /// "no data" marker, which callers handle separately).
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| *c as u8 == nibble)
    }

    /// Dense index of this channel, usable for fixed-size tables.
    pub const fn index(self) -> usize {
        match self {
            ChannelTag::StatusFlags => 9,
            analog => analog as usize,
        }
    }

    /// Whether register values on this channel are 12-bit analog readings.
    pub const fn is_analog(self) -> bool {
        !matches!(self, ChannelTag::StatusFlags)
    }

    /// Stable lowercase name used in logs and telemetry.
    pub const fn name(self) -> &'static str {
        match self {
            ChannelTag::ImonUp => "imon_up",
            ChannelTag::Imon2 => "imon_2",
            ChannelTag::UmonUp => "umon_up",
            ChannelTag::Ntc2 => "ntc_2",
            ChannelTag::Ntc1 => "ntc_1",
            ChannelTag::Imon1 => "imon_1",
            ChannelTag::U48v => "u_48v",
            ChannelTag::U24v => "u_24v",
            ChannelTag::Ratio => "ratio",
            ChannelTag::StatusFlags => "status_flags",
        }
    }
}

impl fmt::Display for ChannelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Control register bits.
    ///
    /// The whole register is written at once, so every flag absent from a
    /// written set is cleared.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ControlFlags: u16 {
        /// Enables the high-voltage block. ANDed with the front panel switch.
        const HV_ON = 0x1;
        /// Resets a latched fault condition.
        const RESET = 0x2;
        const CHECK_RATIO = 0x4;
        const CALIBRATE = 0x8;
        const REMOTE = 0x16;
    }
}

bitflags! {
    /// Status bits reported on the status-flags channel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusFlags: u32 {
        const OVERCURRENT_0 = 0x1;
        const UNDERVOLTAGE_48V = 0x2;
        const HV_MODULE_FAILURE_2 = 0x4;
        const UNDERVOLTAGE_24V = 0x8;
        const OVERCURRENT_4 = 0x10;
        const OVERCURRENT_5 = 0x20;
        const HV_MODULE_FAILURE_6 = 0x40;
        const HV_MODULE_FAILURE_7 = 0x80;
        const OVERTEMPERATURE_DRIVER_HEAD = 0x100;
        const OVERTEMPERATURE_UNUSED = 0x200;
        const NTC_OPEN = 0x400;
        const FAN_FAILURE_11 = 0x800;
        const FAN_FAILURE_12 = 0x1000;
        const FAN_FAILURE_13 = 0x2000;
        const HV_DISCHARGE = 0x4000;
        const INTERLOCK_15 = 0x8000;
        const INTERLOCK_16 = 0x10000;
        const CURRENT_RATIO_ERROR = 0x20000;
        const CURRENT_RATIO_CHECKING_ACTIVE = 0x100000;
        /// Error checking inhibited by the internal jumper. Allows enabling
        /// high voltage without a driver head connected.
        const INHIBIT_ERROR = 0x200000;
        /// Set all the time in I2C mode.
        const PC_BOARD_REMOTE = 0x400000;
        const FAILURE = 0x4000000;
        const HV_ON = 0x8000000;

        // Bits outside the documented set are kept, not rejected.
        const _ = !0;
    }
}

impl StatusFlags {
    /// Bits that only report configuration or state, not a fault.
    const INFORMATIONAL: StatusFlags = StatusFlags::CURRENT_RATIO_CHECKING_ACTIVE
        .union(StatusFlags::INHIBIT_ERROR)
        .union(StatusFlags::PC_BOARD_REMOTE)
        .union(StatusFlags::HV_ON);

    /// Subset of the documented bits that signal a fault condition.
    pub fn faults(self) -> StatusFlags {
        self & Self::documented() & !Self::INFORMATIONAL
    }

    /// Whether the hardware reports its high-voltage stage as on.
    pub fn hv_on(self) -> bool {
        self.contains(StatusFlags::HV_ON)
    }

    fn documented() -> StatusFlags {
        StatusFlags::iter_defined_names().fold(StatusFlags::empty(), |acc, (_, flag)| acc | flag)
    }

    fn iter_defined_names() -> impl Iterator<Item = (&'static str, StatusFlags)> {
        StatusFlags::FLAGS
            .iter()
            .filter(|f| f.is_named())
            .map(|f| (f.name(), *f.value()))
    }

    /// Human-readable descriptions of every documented bit set in `self`.
    pub fn descriptions(self) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = Vec::new();
        for (_, flag) in Self::iter_defined_names() {
            if self.contains(flag) {
                let text = describe_status_flag(flag);
                if !out.contains(&text) {
                    out.push(text);
                }
            }
        }
        out
    }
}

/// Return a human-readable message for a single documented status flag.
pub fn describe_status_flag(flag: StatusFlags) -> &'static str {
    const OVERCURRENT: StatusFlags = StatusFlags::OVERCURRENT_0
        .union(StatusFlags::OVERCURRENT_4)
        .union(StatusFlags::OVERCURRENT_5);
    const MODULE_FAILURE: StatusFlags = StatusFlags::HV_MODULE_FAILURE_2
        .union(StatusFlags::HV_MODULE_FAILURE_6)
        .union(StatusFlags::HV_MODULE_FAILURE_7);
    const FAN_FAILURE: StatusFlags = StatusFlags::FAN_FAILURE_11
        .union(StatusFlags::FAN_FAILURE_12)
        .union(StatusFlags::FAN_FAILURE_13);
    const INTERLOCK: StatusFlags = StatusFlags::INTERLOCK_15.union(StatusFlags::INTERLOCK_16);

    if OVERCURRENT.contains(flag) {
        "Current too high"
    } else if MODULE_FAILURE.contains(flag) {
        "High-voltage module failure"
    } else if FAN_FAILURE.contains(flag) {
        "Fan failure detected"
    } else if INTERLOCK.contains(flag) {
        "Interlock tripped"
    } else if flag == StatusFlags::UNDERVOLTAGE_48V {
        "48 V supply rail too low"
    } else if flag == StatusFlags::UNDERVOLTAGE_24V {
        "24 V supply rail too low"
    } else if flag == StatusFlags::OVERTEMPERATURE_DRIVER_HEAD {
        "Temperature in driver head too high"
    } else if flag == StatusFlags::OVERTEMPERATURE_UNUSED {
        "Temperature too high (unused)"
    } else if flag == StatusFlags::NTC_OPEN {
        "NTC open"
    } else if flag == StatusFlags::HV_DISCHARGE {
        "High-voltage discharge detected"
    } else if flag == StatusFlags::CURRENT_RATIO_ERROR {
        "Current ratio error"
    } else if flag == StatusFlags::CURRENT_RATIO_CHECKING_ACTIVE {
        "Current ratio checking active"
    } else if flag == StatusFlags::INHIBIT_ERROR {
        "Error checking inhibited"
    } else if flag == StatusFlags::PC_BOARD_REMOTE {
        "PCB remote active"
    } else if flag == StatusFlags::FAILURE {
        "Failure"
    } else if flag == StatusFlags::HV_ON {
        "High-voltage is enabled"
    } else {
        "Unknown status flag"
    }
}

/// One state update read from the bus.
///
/// Analog channels carry a 12-bit value; the status-flags channel carries
/// the full 32-bit status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    /// Channel the update belongs to
    pub channel: ChannelTag,
    /// Register value as read
    pub raw: u32,
}

impl RawSample {
    /// Create a sample.
    pub fn new(channel: ChannelTag, raw: u32) -> Self {
        Self { channel, raw }
    }
}

/// Convert a raw analog register value to a fraction of full scale.
pub fn normalize_raw(raw: u32) -> f64 {
    raw as f64 / REGISTER_MAX as f64
}

/// Convert a normalized set point in `[0, 1]` to the 12-bit register value.
///
/// Returns `None` when `value` is outside `[0, 1]` or NaN.
pub fn set_point_to_raw(value: f64) -> Option<u16> {
    if !(0.0..=1.0).contains(&value) {
        return None;
    }
    Some((value * REGISTER_MAX as f64).round() as u16)
}
