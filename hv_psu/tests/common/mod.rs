//! Shared helpers for poller and sequencer integration tests.
//!
//! `RecordingTransport` logs every bus transaction with a timestamp and
//! counts transactions that overlap in time, which must never happen.

#![allow(dead_code)]

use hv_common::psu::transport::{BusError, BusTransport};
use hv_common::psu::types::{ChannelTag, ControlFlags, RawSample};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// One bus transaction as seen by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusCall {
    Read,
    Control(ControlFlags),
    SetPoint(u16),
}

#[derive(Debug, Clone, Copy)]
pub struct CallRecord {
    pub call: BusCall,
    pub at: Instant,
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<CallRecord>>,
    queued: Mutex<VecDeque<Option<RawSample>>>,
    in_flight: AtomicBool,
    overlaps: AtomicUsize,
    fail_reads: AtomicBool,
    fail_set_point: AtomicBool,
}

/// Test-side view of a `RecordingTransport` owned by a poller.
#[derive(Clone, Default)]
pub struct BusLog {
    shared: Arc<Shared>,
}

impl BusLog {
    pub fn calls(&self) -> Vec<BusCall> {
        self.shared.calls.lock().iter().map(|r| r.call).collect()
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.shared.calls.lock().clone()
    }

    /// Every call except poll reads, in order.
    pub fn control_calls(&self) -> Vec<BusCall> {
        self.calls()
            .into_iter()
            .filter(|c| *c != BusCall::Read)
            .collect()
    }

    /// Control-call records (with timestamps), in order.
    pub fn control_records(&self) -> Vec<CallRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.call != BusCall::Read)
            .collect()
    }

    pub fn read_count(&self) -> usize {
        self.calls().iter().filter(|c| **c == BusCall::Read).count()
    }

    pub fn reads_between(&self, from: Instant, to: Instant) -> usize {
        self.records()
            .iter()
            .filter(|r| r.call == BusCall::Read && r.at > from && r.at < to)
            .count()
    }

    pub fn overlaps(&self) -> usize {
        self.shared.overlaps.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.shared.calls.lock().clear();
    }

    /// Queue updates returned by the next reads, before the default sample.
    pub fn queue(&self, updates: impl IntoIterator<Item = Option<RawSample>>) {
        self.shared.queued.lock().extend(updates);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.shared.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_set_point(&self, fail: bool) {
        self.shared.fail_set_point.store(fail, Ordering::SeqCst);
    }
}

/// Mock transport recording every transaction.
pub struct RecordingTransport {
    log: BusLog,
    transaction_time: Duration,
    default_sample: Option<RawSample>,
}

impl RecordingTransport {
    pub fn new(transaction_time: Duration) -> (Self, BusLog) {
        let log = BusLog::default();
        let transport = Self {
            log: log.clone(),
            transaction_time,
            default_sample: Some(RawSample::new(ChannelTag::Ratio, 2048)),
        };
        (transport, log)
    }

    /// Reads past the queued updates report "no data".
    pub fn with_empty_default(mut self) -> Self {
        self.default_sample = None;
        self
    }

    pub fn boxed(self) -> Box<dyn BusTransport> {
        Box::new(self)
    }

    fn transact<R>(
        &self,
        call: BusCall,
        op: impl FnOnce(&Shared) -> Result<R, BusError>,
    ) -> Result<R, BusError> {
        let shared = &self.log.shared;
        if shared.in_flight.swap(true, Ordering::SeqCst) {
            shared.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        shared.calls.lock().push(CallRecord {
            call,
            at: Instant::now(),
        });
        if !self.transaction_time.is_zero() {
            std::thread::sleep(self.transaction_time);
        }
        let result = op(shared);
        shared.in_flight.store(false, Ordering::SeqCst);
        result
    }
}

impl BusTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn read_state_update(&mut self) -> Result<Option<RawSample>, BusError> {
        let default_sample = self.default_sample;
        self.transact(BusCall::Read, |shared| {
            if shared.fail_reads.load(Ordering::SeqCst) {
                return Err(BusError::ShortRead {
                    got: 0,
                    expected: 4,
                });
            }
            Ok(shared.queued.lock().pop_front().unwrap_or(default_sample))
        })
    }

    fn write_control_flags(&mut self, flags: ControlFlags) -> Result<(), BusError> {
        self.transact(BusCall::Control(flags), |_| Ok(()))
    }

    fn write_hv_set_point(&mut self, raw: u16) -> Result<(), BusError> {
        self.transact(BusCall::SetPoint(raw), |shared| {
            if shared.fail_set_point.load(Ordering::SeqCst) {
                return Err(BusError::Io("injected set point failure".to_string()));
            }
            Ok(())
        })
    }
}

/// Poll until `condition` holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    condition()
}
