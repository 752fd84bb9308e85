//! Hardware poller and serialized bus access.
//!
//! The `Poller` owns the bus transport for its whole lifetime. A background
//! task samples one state update per iteration and dispatches it to the
//! registered callbacks, while control operations (output enable, set point,
//! fault reset) share the same bus lock so that no two transactions ever
//! overlap. Every transport call runs on Tokio's blocking pool.

use hv_common::psu::transport::{BusError, BusTransport};
use hv_common::psu::types::{
    ChannelTag, ControlFlags, RawSample, StatusFlags, normalize_raw, set_point_to_raw,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Callback invoked with a normalized analog sample in `[0, 1]`.
pub type ChannelCallback = Box<dyn Fn(f64) + Send + Sync>;

/// Callback invoked with the unscaled status bitfield.
pub type StatusCallback = Box<dyn Fn(StatusFlags) + Send + Sync>;

type SharedBus = Arc<Mutex<Box<dyn BusTransport>>>;

/// Error types for poller operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PollerError {
    /// Normalized set point outside `[0, 1]`
    #[error("High-voltage set point must be between 0 and 1, got {0}")]
    InvalidSetPoint(f64),

    /// Bus transaction failed
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The blocking task running a bus transaction panicked or was cancelled
    #[error("Bus executor failed: {0}")]
    Executor(String),

    /// The background loop ended because of a fault
    #[error("Poll loop terminated on fault: {0}")]
    LoopFaulted(Box<PollerError>),
}

/// Lifecycle state of the background loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PollerState {
    /// Loop is sampling
    Running,
    /// Loop exited after a stop request
    Stopped,
    /// Loop exited on a fault; it is never restarted
    Faulted(PollerError),
}

/// Loop statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PollStats {
    /// Completed loop iterations
    pub iterations: u64,
    /// Reads that reported no pending update
    pub empty_reads: u64,
    /// Iterations that took longer than the polling interval
    pub overruns: u64,
    /// Longest observed iteration
    pub max_iteration: Duration,
}

/// Dispatch table from channel to callback, filled once before the poller
/// starts.
pub struct PollerCallbacks {
    channels: [Option<ChannelCallback>; ChannelTag::COUNT],
    status_flags: Option<StatusCallback>,
}

impl PollerCallbacks {
    /// Create an empty table (samples are read and dropped).
    pub fn new() -> Self {
        Self {
            channels: std::array::from_fn(|_| None),
            status_flags: None,
        }
    }

    /// Register the callback for an analog channel, replacing any previous one.
    ///
    /// The status-flags channel has its own observer, see
    /// [`on_status_flags`](Self::on_status_flags); registering it here has no
    /// effect.
    pub fn on_channel<F>(mut self, channel: ChannelTag, callback: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        if channel.is_analog() {
            self.channels[channel.index()] = Some(Box::new(callback));
        } else {
            warn!(
                "Ignoring numeric callback for non-analog channel {}",
                channel
            );
        }
        self
    }

    /// Register the status-flags observer.
    pub fn on_status_flags<F>(mut self, callback: F) -> Self
    where
        F: Fn(StatusFlags) + Send + Sync + 'static,
    {
        self.status_flags = Some(Box::new(callback));
        self
    }

    /// Whether a listener exists for `channel`.
    pub fn has_listener(&self, channel: ChannelTag) -> bool {
        if channel.is_analog() {
            self.channels[channel.index()].is_some()
        } else {
            self.status_flags.is_some()
        }
    }

    fn dispatch(&self, sample: RawSample) {
        if sample.channel.is_analog() {
            if let Some(callback) = &self.channels[sample.channel.index()] {
                callback(normalize_raw(sample.raw));
            }
        } else if let Some(callback) = &self.status_flags {
            callback(StatusFlags::from_bits_retain(sample.raw));
        }
    }
}

impl Default for PollerCallbacks {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the bus transport and samples it in the background.
pub struct Poller {
    /// Bus lock; held for exactly one transaction (or one atomic pair)
    bus: SharedBus,
    /// Transport identifier for logging
    transport_name: &'static str,
    /// Shutdown request
    shutdown: watch::Sender<bool>,
    /// Loop lifecycle
    state: watch::Receiver<PollerState>,
    /// Loop statistics, updated once per iteration
    stats: Arc<parking_lot::Mutex<PollStats>>,
    /// Background loop, taken by `stop()`
    task: parking_lot::Mutex<Option<JoinHandle<Result<(), PollerError>>>>,
}

impl Poller {
    /// Take ownership of `transport` and start the background loop.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn start(
        transport: Box<dyn BusTransport>,
        callbacks: PollerCallbacks,
        interval: Duration,
    ) -> Self {
        let transport_name = transport.name();
        let bus: SharedBus = Arc::new(Mutex::new(transport));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (state_tx, state) = watch::channel(PollerState::Running);
        let stats = Arc::new(parking_lot::Mutex::new(PollStats::default()));

        info!(
            "Starting poller on '{}' transport (interval={}ms)",
            transport_name,
            interval.as_millis()
        );

        let task = tokio::spawn(run_poll_loop(
            Arc::clone(&bus),
            callbacks,
            interval,
            shutdown_rx,
            Arc::clone(&stats),
            state_tx,
        ));

        Self {
            bus,
            transport_name,
            shutdown,
            state,
            stats,
            task: parking_lot::Mutex::new(Some(task)),
        }
    }

    /// Enable or disable the high-voltage output stage.
    pub async fn enable_output(&self, on: bool) -> Result<(), PollerError> {
        let flags = if on {
            ControlFlags::HV_ON
        } else {
            ControlFlags::empty()
        };
        debug!("Writing control flags {:?}", flags);
        run_on_bus(&self.bus, move |bus| bus.write_control_flags(flags)).await
    }

    /// Program the output set point as a fraction of full scale.
    ///
    /// Even at zero the hardware may leave a small residual potential on its
    /// outputs; use `enable_output(false)` to switch it off completely.
    ///
    /// # Errors
    /// `PollerError::InvalidSetPoint` if `value` is outside `[0, 1]`; no bus
    /// traffic happens in that case.
    pub async fn set_point(&self, value: f64) -> Result<(), PollerError> {
        let raw = set_point_to_raw(value).ok_or(PollerError::InvalidSetPoint(value))?;
        debug!("Writing set point {} (raw {})", value, raw);
        run_on_bus(&self.bus, move |bus| bus.write_hv_set_point(raw)).await
    }

    /// Pulse the reset flag: `{reset}` then `{}`, with no read in between.
    ///
    /// The second write clears every control flag, so the output is disabled
    /// afterwards.
    pub async fn reset_fault(&self) -> Result<(), PollerError> {
        debug!("Pulsing fault reset");
        run_on_bus(&self.bus, |bus| {
            bus.write_control_flags(ControlFlags::RESET)?;
            bus.write_control_flags(ControlFlags::empty())
        })
        .await
    }

    /// Request shutdown and wait for the background loop to exit.
    ///
    /// An in-flight read is allowed to complete. Concurrent and repeated
    /// callers all return only once the loop has exited.
    ///
    /// # Errors
    /// `PollerError::LoopFaulted` if the loop had already ended on a fault.
    pub async fn stop(&self) -> Result<(), PollerError> {
        self.shutdown.send_replace(true);

        let task = self.task.lock().take();
        let Some(task) = task else {
            // Another caller owns the join handle.
            return match self.wait_terminated().await {
                PollerState::Faulted(e) => Err(PollerError::LoopFaulted(Box::new(e))),
                _ => Ok(()),
            };
        };

        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(PollerError::Executor(e.to_string())),
        };

        let stats = self.stats();
        info!(
            "Poller stopped after {} iterations ({} empty, {} overruns)",
            stats.iterations, stats.empty_reads, stats.overruns
        );
        result.map_err(|e| PollerError::LoopFaulted(Box::new(e)))
    }

    /// Wait until the background loop is no longer running and return its
    /// final state.
    pub async fn wait_terminated(&self) -> PollerState {
        let mut state = self.state.clone();
        let result = state
            .wait_for(|s| !matches!(s, PollerState::Running))
            .await
            .map(|s| (*s).clone());
        match result {
            Ok(final_state) => final_state,
            // Loop task went away without publishing a final state.
            Err(_) => PollerState::Faulted(PollerError::Executor(
                "poll task ended unexpectedly".to_string(),
            )),
        }
    }

    /// Current lifecycle state of the background loop.
    pub fn state(&self) -> PollerState {
        self.state.borrow().clone()
    }

    /// Snapshot of the loop statistics.
    pub fn stats(&self) -> PollStats {
        *self.stats.lock()
    }

    /// Identifier of the owned transport.
    pub fn transport_name(&self) -> &'static str {
        self.transport_name
    }
}

/// Run `fun` on the blocking pool with exclusive access to the transport.
///
/// The lock guard moves into the blocking task, so the bus stays locked
/// until the transaction has finished even if the awaiting future is dropped.
async fn run_on_bus<F, R>(bus: &SharedBus, fun: F) -> Result<R, PollerError>
where
    F: FnOnce(&mut dyn BusTransport) -> Result<R, BusError> + Send + 'static,
    R: Send + 'static,
{
    let guard = Arc::clone(bus).lock_owned().await;
    let result = tokio::task::spawn_blocking(move || {
        let mut guard = guard;
        fun(&mut **guard)
    })
    .await
    .map_err(|e| PollerError::Executor(e.to_string()))?;
    Ok(result?)
}

async fn run_poll_loop(
    bus: SharedBus,
    callbacks: PollerCallbacks,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<parking_lot::Mutex<PollStats>>,
    state: watch::Sender<PollerState>,
) -> Result<(), PollerError> {
    let result = poll_until_shutdown(&bus, &callbacks, interval, &mut shutdown, &stats).await;

    let final_state = match &result {
        Ok(()) => {
            info!("Poll loop exited on shutdown request");
            PollerState::Stopped
        }
        Err(e) => {
            error!("Poll loop terminated: {}", e);
            PollerState::Faulted(e.clone())
        }
    };
    state.send_replace(final_state);
    result
}

async fn poll_until_shutdown(
    bus: &SharedBus,
    callbacks: &PollerCallbacks,
    interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
    stats: &parking_lot::Mutex<PollStats>,
) -> Result<(), PollerError> {
    loop {
        let stop_requested = *shutdown.borrow();
        if stop_requested {
            return Ok(());
        }

        let started = Instant::now();

        let update = run_on_bus(bus, |bus| bus.read_state_update()).await?;
        let empty = match update {
            Some(sample) => {
                callbacks.dispatch(sample);
                false
            }
            None => true,
        };

        let elapsed = started.elapsed();
        record_iteration(stats, elapsed, interval, empty);

        tokio::select! {
            _ = tokio::time::sleep(interval.saturating_sub(elapsed)) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Poller handle dropped without stop().
                    return Ok(());
                }
            }
        }
    }
}

fn record_iteration(
    stats: &parking_lot::Mutex<PollStats>,
    elapsed: Duration,
    interval: Duration,
    empty: bool,
) {
    let mut stats = stats.lock();
    stats.iterations += 1;
    if empty {
        stats.empty_reads += 1;
    }
    if elapsed > stats.max_iteration {
        stats.max_iteration = elapsed;
    }

    if elapsed > interval {
        stats.overruns += 1;
        if stats.overruns <= 10 || stats.overruns.is_multiple_of(1000) {
            warn!(
                "Poll overrun #{}: iteration took {}us (target {}us)",
                stats.overruns,
                elapsed.as_micros(),
                interval.as_micros()
            );
        }
    }

    if stats.iterations.is_multiple_of(1000) {
        debug!(
            "Poll loop: {} iterations, {} empty, max={}us, overruns={}",
            stats.iterations,
            stats.empty_reads,
            stats.max_iteration.as_micros(),
            stats.overruns
        );
    }
}
