//! Integration tests for the mode toggle scheduler against a recording
//! radio.  The central check is ordering: the mode is only ever changed
//! while advertising is stopped.

use std::sync::Arc;
use std::time::Duration;

use bondgate::app::controller::AdmissionController;
use bondgate::app::events::AdmissionEvent;
use bondgate::app::mode::Mode;
use bondgate::app::ports::AdvertisingFilter;
use bondgate::app::strategy::StrategyKind;
use bondgate::config::AdmissionConfig;
use bondgate::scheduler::{self, ModeToggleScheduler, StopSignal};

use crate::mock_radio::{MockRadio, RadioCall, Record, RecordingSink};

fn booted(
    initial: Mode,
    tick_ms: u32,
    window_ms: u32,
    strategy: StrategyKind,
) -> (
    AdmissionController<MockRadio>,
    ModeToggleScheduler<MockRadio, RecordingSink>,
    Arc<MockRadio>,
    RecordingSink,
) {
    let config = AdmissionConfig {
        initial_mode: initial,
        tick_interval_ms: tick_ms,
        window_length_ms: window_ms,
        strategy,
        ..AdmissionConfig::default()
    };
    let radio = Arc::new(MockRadio::new());
    let ctl = AdmissionController::new(config, radio.clone()).unwrap();
    radio.observe(ctl.mode_state());
    ctl.boot(&mut RecordingSink::new()).unwrap();
    let sink = RecordingSink::new();
    let sched = ctl.scheduler(sink.clone());
    (ctl, sched, radio, sink)
}

/// Every call made while advertising is live must see the same mode that
/// was current when advertising started.
fn assert_mode_stable_while_advertising(records: &[Record]) {
    let mut live: Option<Option<Mode>> = None;
    for r in records {
        match r.call {
            RadioCall::StartAdvertising => live = Some(r.mode),
            RadioCall::StopAdvertising => {
                assert_eq!(live, Some(r.mode), "mode changed while advertising");
                live = None;
            }
            _ => {
                if let Some(m) = live {
                    assert_eq!(m, r.mode, "mode changed while advertising: {:?}", r.call);
                }
            }
        }
    }
}

fn commits(radio: &MockRadio) -> usize {
    radio
        .calls()
        .iter()
        .filter(|c| matches!(c, RadioCall::StopAdvertising))
        .count()
}

#[test]
fn boot_advertises_in_initial_mode() {
    let (ctl, _s, radio, _sink) = booted(
        Mode::RestrictedToBonded,
        1000,
        30_000,
        StrategyKind::PostConnectCheck,
    );
    assert_eq!(
        radio.calls(),
        vec![
            RadioCall::InitStack("bondgate".to_string()),
            RadioCall::SetSecurity(ctl.config().security),
            RadioCall::SetFilter(AdvertisingFilter::AllowAll),
            RadioCall::StartAdvertising,
        ]
    );
}

#[test]
fn advertising_is_paused_around_every_commit() {
    let (_ctl, mut s, radio, _sink) = booted(
        Mode::RestrictedToBonded,
        1000,
        3000,
        StrategyKind::DeclarativeFilter,
    );
    for _ in 0..20 {
        s.tick();
    }
    assert!(commits(&radio) >= 4);
    assert_mode_stable_while_advertising(&radio.records());
}

#[test]
fn commit_sequence_reconfigures_filter_for_new_mode() {
    let (ctl, mut s, radio, _sink) = booted(
        Mode::RestrictedToBonded,
        1000,
        30_000,
        StrategyKind::DeclarativeFilter,
    );
    radio.clear();
    ctl.open_window();
    s.tick();

    let records = radio.records();
    let seq: Vec<_> = records.iter().map(|r| (r.call.clone(), r.mode)).collect();
    assert_eq!(
        seq,
        vec![
            (RadioCall::StopAdvertising, Some(Mode::RestrictedToBonded)),
            (RadioCall::SetFilter(AdvertisingFilter::AllowAll), Some(Mode::Open)),
            (RadioCall::StartAdvertising, Some(Mode::Open)),
        ]
    );
}

#[test]
fn round_trip_returns_to_original_mode() {
    let (ctl, mut s, _radio, _sink) =
        booted(Mode::Open, 1000, 30_000, StrategyKind::PostConnectCheck);

    for _ in 0..31 {
        s.tick();
    }
    assert_eq!(ctl.mode(), Mode::RestrictedToBonded);

    // Idle ticks inside the window leave the committed mode alone.
    for _ in 0..29 {
        s.tick();
        assert_eq!(ctl.mode(), Mode::RestrictedToBonded);
    }

    s.tick();
    assert_eq!(ctl.mode(), Mode::Open);
}

#[test]
fn external_request_gets_a_full_window() {
    let (ctl, mut s, _radio, _sink) = booted(
        Mode::RestrictedToBonded,
        1000,
        30_000,
        StrategyKind::PostConnectCheck,
    );
    for _ in 0..20 {
        s.tick();
    }
    ctl.open_window();
    assert_eq!(s.tick().committed, Some(Mode::Open));
    assert_eq!(s.remaining_ms(), 29_000);
}

#[test]
fn failed_restart_is_retried_next_tick() {
    let (ctl, mut s, radio, _sink) = booted(
        Mode::RestrictedToBonded,
        1000,
        30_000,
        StrategyKind::PostConnectCheck,
    );
    radio.clear();
    radio.fail_next_starts(1);
    ctl.open_window();

    assert_eq!(s.tick().committed, Some(Mode::Open));
    assert_eq!(
        radio.calls(),
        vec![
            RadioCall::StopAdvertising,
            RadioCall::SetFilter(AdvertisingFilter::AllowAll),
        ]
    );

    s.tick();
    assert_eq!(radio.calls().last(), Some(&RadioCall::StartAdvertising));
}

#[test]
fn failed_stop_defers_commit() {
    let (ctl, mut s, radio, _sink) = booted(
        Mode::RestrictedToBonded,
        1000,
        30_000,
        StrategyKind::PostConnectCheck,
    );
    radio.fail_next_stops(2);
    ctl.open_window();

    s.tick();
    s.tick();
    assert_eq!(ctl.mode(), Mode::RestrictedToBonded);
    assert_eq!(s.tick().committed, Some(Mode::Open));
    assert_mode_stable_while_advertising(&radio.records());
}

#[test]
fn events_trace_flip_and_commit() {
    let (_ctl, mut s, _radio, sink) = booted(
        Mode::RestrictedToBonded,
        1000,
        2000,
        StrategyKind::PostConnectCheck,
    );
    s.tick();
    s.tick();
    s.tick();

    let events = sink.snapshot();
    assert!(events.contains(&AdmissionEvent::PendingChanged { to: Mode::Open }));
    assert!(events.contains(&AdmissionEvent::ModeCommitted {
        from: Mode::RestrictedToBonded,
        to: Mode::Open,
    }));
    let countdowns = events
        .iter()
        .filter(|e| matches!(e, AdmissionEvent::WindowRemaining { .. }))
        .count();
    assert_eq!(countdowns, 3);
}

#[test]
fn spawned_loop_toggles_until_stopped() {
    let (_ctl, s, radio, _sink) = booted(
        Mode::RestrictedToBonded,
        10,
        30,
        StrategyKind::PostConnectCheck,
    );
    let stop = Arc::new(StopSignal::new());
    let handle = scheduler::spawn(s, stop.clone()).unwrap();

    std::thread::sleep(Duration::from_millis(300));
    stop.signal(());
    handle.join().unwrap();

    assert!(commits(&radio) >= 1);
    assert_mode_stable_while_advertising(&radio.records());
}
