//! Simulation transport implementation.
//!
//! `SimulatedPsu` implements `BusTransport` on top of a shared [`PsuModel`].
//! A [`SimulationHandle`] gives tests and operators access to the same model
//! while the poller owns the transport.

use super::state::PsuModel;
use hv_common::psu::transport::{BusError, BusTransport};
use hv_common::psu::types::{ControlFlags, RawSample, StatusFlags};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Typical duration of one transaction on the real bus.
const DEFAULT_TRANSACTION_TIME: Duration = Duration::from_micros(200);

/// Simulated power supply transport.
pub struct SimulatedPsu {
    model: Arc<Mutex<PsuModel>>,
    transaction_time: Duration,
}

impl SimulatedPsu {
    /// Create a simulated supply with output off.
    pub fn new() -> Self {
        info!("Creating simulated power supply");
        Self {
            model: Arc::new(Mutex::new(PsuModel::new())),
            transaction_time: DEFAULT_TRANSACTION_TIME,
        }
    }

    /// Override the time each transaction blocks for.
    pub fn with_transaction_time(mut self, transaction_time: Duration) -> Self {
        self.transaction_time = transaction_time;
        self
    }

    /// Handle to the shared model.
    pub fn handle(&self) -> SimulationHandle {
        SimulationHandle {
            model: Arc::clone(&self.model),
        }
    }

    fn transact<R>(&self, op: impl FnOnce(&mut PsuModel) -> R) -> R {
        if !self.transaction_time.is_zero() {
            std::thread::sleep(self.transaction_time);
        }
        op(&mut self.model.lock())
    }
}

impl Default for SimulatedPsu {
    fn default() -> Self {
        Self::new()
    }
}

impl BusTransport for SimulatedPsu {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn read_state_update(&mut self) -> Result<Option<RawSample>, BusError> {
        Ok(Some(self.transact(PsuModel::next_update)))
    }

    fn write_control_flags(&mut self, flags: ControlFlags) -> Result<(), BusError> {
        debug!("Simulated control write {:?}", flags);
        self.transact(|model| model.write_control(flags));
        Ok(())
    }

    fn write_hv_set_point(&mut self, raw: u16) -> Result<(), BusError> {
        self.transact(|model| model.write_set_point(raw))
    }
}

/// Shared access to a running simulation.
#[derive(Clone)]
pub struct SimulationHandle {
    model: Arc<Mutex<PsuModel>>,
}

impl SimulationHandle {
    /// Latch a fault in the simulated hardware.
    pub fn inject_fault(&self, fault: StatusFlags) {
        info!("Injecting simulated fault {:?}", fault);
        self.model.lock().inject_fault(fault);
    }

    /// Whether the simulated output stage is active.
    pub fn output_active(&self) -> bool {
        self.model.lock().output_active()
    }

    /// Last raw set point written to the simulation.
    pub fn set_point_raw(&self) -> u16 {
        self.model.lock().set_point_raw()
    }

    /// Currently latched faults.
    pub fn latched_faults(&self) -> StatusFlags {
        self.model.lock().latched_faults()
    }
}
