//! Last-value telemetry sink.
//!
//! `ChannelMonitor` keeps the most recent normalized reading of every analog
//! channel and the most recent status word, and logs fault transitions.
//! Aggregation and storage belong to external consumers.

use crate::poller::PollerCallbacks;
use hv_common::psu::types::{ChannelTag, StatusFlags};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// Latest sampled values, fed by poller callbacks.
pub struct ChannelMonitor {
    latest: RwLock<[Option<f64>; ChannelTag::COUNT]>,
    status: RwLock<Option<StatusFlags>>,
}

impl ChannelMonitor {
    /// Create an empty monitor.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            latest: RwLock::new([None; ChannelTag::COUNT]),
            status: RwLock::new(None),
        })
    }

    /// Poller callbacks that record every analog channel and the status word.
    pub fn callbacks(self: &Arc<Self>) -> PollerCallbacks {
        let callbacks = ChannelTag::ALL
            .into_iter()
            .filter(|channel| channel.is_analog())
            .fold(PollerCallbacks::new(), |callbacks, channel| {
                let monitor = Arc::clone(self);
                callbacks.on_channel(channel, move |value| monitor.record(channel, value))
            });

        let monitor = Arc::clone(self);
        callbacks.on_status_flags(move |flags| monitor.record_status(flags))
    }

    /// Latest normalized reading of `channel`, if one arrived.
    pub fn latest(&self, channel: ChannelTag) -> Option<f64> {
        self.latest.read()[channel.index()]
    }

    /// Latest status word, if one arrived.
    pub fn status(&self) -> Option<StatusFlags> {
        *self.status.read()
    }

    /// Record an analog reading.
    pub fn record(&self, channel: ChannelTag, value: f64) {
        self.latest.write()[channel.index()] = Some(value);
    }

    /// Record a status word and log faults that appeared or cleared.
    pub fn record_status(&self, flags: StatusFlags) {
        let previous = self.status.write().replace(flags).unwrap_or_default();

        let raised = flags.faults().difference(previous.faults());
        let cleared = previous.faults().difference(flags.faults());

        if !raised.is_empty() {
            warn!(
                "Power supply fault raised: {} (status 0x{:08x})",
                raised.descriptions().join(", "),
                flags.bits()
            );
        }
        if !cleared.is_empty() {
            info!(
                "Power supply fault cleared: {}",
                cleared.descriptions().join(", ")
            );
        }
    }
}
