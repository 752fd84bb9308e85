//! Voltage sequencer integration tests.
//!
//! Drives `VoltageSequencer` through a real `Poller` on a recording
//! transport (with shortened settle delays) and checks the order and timing
//! of the resulting bus writes.

mod common;

use common::{BusCall, BusLog, RecordingTransport};
use hv_common::psu::types::ControlFlags;
use hv_psu::{
    ControllerState, Poller, PollerCallbacks, PollerError, SequencerConfig, SequencerError,
    VoltageSequencer,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SETTLE: Duration = Duration::from_millis(40);
const VOLTAGE_FACTOR: f64 = 10.0;

const ENABLE: BusCall = BusCall::Control(ControlFlags::HV_ON);
const DISABLE: BusCall = BusCall::Control(ControlFlags::empty());
const RESET: BusCall = BusCall::Control(ControlFlags::RESET);

fn sequencer() -> (VoltageSequencer, BusLog) {
    let (transport, log) = RecordingTransport::new(Duration::from_micros(100));
    let poller = Arc::new(Poller::start(
        transport.boxed(),
        PollerCallbacks::new(),
        Duration::from_millis(2),
    ));
    let config = SequencerConfig {
        voltage_factor: VOLTAGE_FACTOR,
        soft_start_delay: SETTLE,
        ramp_down_delay: SETTLE,
    };
    (VoltageSequencer::new(poller, config), log)
}

async fn shutdown(sequencer: VoltageSequencer) {
    sequencer.poller().stop().await.unwrap();
}

fn gap(log: &BusLog, first: usize, second: usize) -> Duration {
    let records = log.control_records();
    records[second].at.duration_since(records[first].at)
}

// ─── Validation ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_out_of_range_voltage_rejected_without_bus_traffic() {
    let (sequencer, log) = sequencer();

    for volts in [-0.5, 10.5, f64::NAN] {
        let err = sequencer.set_voltage(volts).await.unwrap_err();
        assert!(
            matches!(err, SequencerError::VoltageOutOfRange { max, .. } if max == VOLTAGE_FACTOR),
            "{volts}: {err:?}"
        );
    }

    assert!(log.control_calls().is_empty());
    assert_eq!(sequencer.get_voltage(), ControllerState::Unknown);
    shutdown(sequencer).await;
}

#[tokio::test]
async fn test_full_scale_voltage_accepted() {
    let (sequencer, log) = sequencer();

    assert!(sequencer.set_voltage(VOLTAGE_FACTOR).await.unwrap());
    assert_eq!(log.control_calls(), vec![ENABLE, BusCall::SetPoint(4095)]);
    shutdown(sequencer).await;
}

// ─── Enable / disable sequencing ────────────────────────────────────

#[tokio::test]
async fn test_first_positive_voltage_enables_then_waits_then_programs() {
    let (sequencer, log) = sequencer();

    let changed = sequencer.set_voltage(5.0).await.unwrap();

    assert!(changed);
    assert_eq!(log.control_calls(), vec![ENABLE, BusCall::SetPoint(2048)]);
    assert!(gap(&log, 0, 1) >= SETTLE, "soft-start delay not observed");
    assert_eq!(sequencer.get_voltage(), ControllerState::Known(5.0));
    shutdown(sequencer).await;
}

#[tokio::test]
async fn test_same_voltage_twice_reports_no_change() {
    let (sequencer, log) = sequencer();

    assert!(sequencer.set_voltage(5.0).await.unwrap());
    assert!(!sequencer.set_voltage(5.0).await.unwrap());

    // The redundant set point is still written, but not re-enabled.
    assert_eq!(
        log.control_calls(),
        vec![ENABLE, BusCall::SetPoint(2048), BusCall::SetPoint(2048)]
    );
    shutdown(sequencer).await;
}

#[tokio::test]
async fn test_zero_twice_ramps_down_only_once() {
    let (sequencer, log) = sequencer();

    assert!(sequencer.set_voltage(0.0).await.unwrap());
    assert_eq!(log.control_calls(), vec![BusCall::SetPoint(0), DISABLE]);
    assert!(gap(&log, 0, 1) >= SETTLE, "ramp-down delay not observed");

    let started = Instant::now();
    assert!(!sequencer.set_voltage(0.0).await.unwrap());
    assert!(started.elapsed() < SETTLE);
    assert_eq!(
        log.control_calls(),
        vec![BusCall::SetPoint(0), DISABLE, BusCall::SetPoint(0)]
    );
    shutdown(sequencer).await;
}

#[tokio::test]
async fn test_positive_to_zero_programs_then_waits_then_disables() {
    let (sequencer, log) = sequencer();

    sequencer.set_voltage(5.0).await.unwrap();
    log.clear();

    assert!(sequencer.set_voltage(0.0).await.unwrap());
    assert_eq!(log.control_calls(), vec![BusCall::SetPoint(0), DISABLE]);
    assert!(gap(&log, 0, 1) >= SETTLE);
    assert_eq!(sequencer.get_voltage(), ControllerState::Known(0.0));
    shutdown(sequencer).await;
}

#[tokio::test]
async fn test_zero_to_positive_re_enables() {
    let (sequencer, log) = sequencer();

    sequencer.set_voltage(0.0).await.unwrap();
    log.clear();

    assert!(sequencer.set_voltage(2.5).await.unwrap());
    assert_eq!(log.control_calls(), vec![ENABLE, BusCall::SetPoint(1024)]);
    assert!(gap(&log, 0, 1) >= SETTLE);
    shutdown(sequencer).await;
}

#[tokio::test]
async fn test_positive_to_positive_only_programs() {
    let (sequencer, log) = sequencer();

    sequencer.set_voltage(5.0).await.unwrap();
    log.clear();

    let started = Instant::now();
    assert!(sequencer.set_voltage(7.5).await.unwrap());
    assert!(started.elapsed() < SETTLE);
    assert_eq!(log.control_calls(), vec![BusCall::SetPoint(3071)]);
    shutdown(sequencer).await;
}

// ─── Fault reset ────────────────────────────────────────────────────

#[tokio::test]
async fn test_reset_fault_from_unknown_disables_before_pulse() {
    let (sequencer, log) = sequencer();

    sequencer.reset_fault().await.unwrap();

    assert_eq!(
        log.control_calls(),
        vec![BusCall::SetPoint(0), DISABLE, RESET, DISABLE]
    );
    assert_eq!(sequencer.get_voltage(), ControllerState::Known(0.0));
    shutdown(sequencer).await;
}

#[tokio::test]
async fn test_reset_fault_while_enabled_ramps_down_first() {
    let (sequencer, log) = sequencer();

    sequencer.set_voltage(5.0).await.unwrap();
    log.clear();

    sequencer.reset_fault().await.unwrap();
    assert_eq!(
        log.control_calls(),
        vec![BusCall::SetPoint(0), DISABLE, RESET, DISABLE]
    );
    assert!(gap(&log, 0, 1) >= SETTLE);
    shutdown(sequencer).await;
}

#[tokio::test]
async fn test_reset_fault_at_known_zero_skips_ramp_down() {
    let (sequencer, log) = sequencer();

    sequencer.set_voltage(0.0).await.unwrap();
    log.clear();

    let started = Instant::now();
    sequencer.reset_fault().await.unwrap();
    assert!(started.elapsed() < SETTLE, "output was already disabled");
    assert_eq!(
        log.control_calls(),
        vec![BusCall::SetPoint(0), RESET, DISABLE]
    );
    assert_eq!(sequencer.get_voltage(), ControllerState::Known(0.0));
    shutdown(sequencer).await;
}

// ─── Concurrency with the poll loop ─────────────────────────────────

#[tokio::test]
async fn test_polling_continues_during_settle_delay() {
    let (sequencer, log) = sequencer();

    sequencer.set_voltage(5.0).await.unwrap();

    let records = log.control_records();
    let reads = log.reads_between(records[0].at, records[1].at);
    assert!(reads >= 3, "only {reads} reads during soft-start");
    assert_eq!(log.overlaps(), 0);
    shutdown(sequencer).await;
}

#[tokio::test]
async fn test_get_voltage_does_not_wait_for_running_sequence() {
    let (sequencer, _log) = sequencer();
    let sequencer = Arc::new(sequencer);

    let running = {
        let sequencer = Arc::clone(&sequencer);
        tokio::spawn(async move { sequencer.set_voltage(5.0).await })
    };
    tokio::time::sleep(SETTLE / 4).await;

    assert_eq!(sequencer.get_voltage(), ControllerState::Unknown);
    assert!(running.await.unwrap().unwrap());
    assert_eq!(sequencer.get_voltage(), ControllerState::Known(5.0));

    sequencer.poller().stop().await.unwrap();
}

// ─── Faults mid-sequence ────────────────────────────────────────────

#[tokio::test]
async fn test_failed_sequence_leaves_state_unknown() {
    let (sequencer, log) = sequencer();

    sequencer.set_voltage(5.0).await.unwrap();
    log.set_fail_set_point(true);

    let err = sequencer.set_voltage(6.0).await.unwrap_err();
    assert!(matches!(err, SequencerError::Poller(PollerError::Bus(_))));
    assert_eq!(sequencer.get_voltage(), ControllerState::Unknown);

    // The next call treats the hardware state as unknown and re-enables.
    log.set_fail_set_point(false);
    log.clear();
    assert!(sequencer.set_voltage(6.0).await.unwrap());
    assert_eq!(log.control_calls(), vec![ENABLE, BusCall::SetPoint(2457)]);
    shutdown(sequencer).await;
}
