//! # HV PSU Library
//!
//! Asynchronous control of a high-voltage power supply module behind a
//! blocking, register-oriented bus.
//!
//! # Module Structure
//!
//! - [`poller`] - Background sampling loop and serialized bus access
//! - [`sequencer`] - Safe enable/disable sequencing of voltage set points
//! - [`transport_registry`] - Transport factory registration
//! - [`drivers`] - Bus transport implementations
//! - [`telemetry`] - Last-value store fed by the poller callbacks
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        hv_psu                                 │
//! │  ┌──────────────────┐   ┌──────────────┐   ┌───────────────┐  │
//! │  │ VoltageSequencer │──►│   Poller     │──►│ ChannelMonitor│  │
//! │  │ (settle delays)  │   │ (bus lock)   │   │  (callbacks)  │  │
//! │  └──────────────────┘   └──────┬───────┘   └───────────────┘  │
//! │                                │ spawn_blocking               │
//! │                                ▼                              │
//! │                       ┌────────────────┐                      │
//! │                       │  BusTransport  │ (trait object)       │
//! │                       └────────────────┘                      │
//! └───────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod drivers;
pub mod poller;
pub mod sequencer;
pub mod telemetry;
pub mod transport_registry;

// Re-export key types for convenience
pub use crate::poller::{PollStats, Poller, PollerCallbacks, PollerError, PollerState};
pub use crate::sequencer::{ControllerState, SequencerConfig, SequencerError, VoltageSequencer};
pub use crate::telemetry::ChannelMonitor;
pub use crate::transport_registry::{TransportError, TransportRegistry};
