//! Integration tests for the controller → connection handler pipeline.
//!
//! The handler is built through `AdmissionController::handler` so it
//! shares the controller's mode state, exactly as on the device.

use std::sync::Arc;

use bondgate::app::connection::ConnHandle;
use bondgate::app::controller::AdmissionController;
use bondgate::app::events::AdmissionEvent;
use bondgate::app::handler::ConnectionHandler;
use bondgate::app::mode::Mode;
use bondgate::app::policy::Decision;
use bondgate::app::ports::{ConnParams, ConnectionEvents, DisconnectReason};
use bondgate::config::{AdmissionConfig, IdentitySource};
use bondgate::error::AdmissionFault;

use crate::mock_radio::{MockRadio, RadioCall, RecordingSink, identity, peer, status};

fn setup(
    initial: Mode,
    tweak: impl FnOnce(&mut AdmissionConfig),
) -> (
    AdmissionController<MockRadio>,
    ConnectionHandler<MockRadio, RecordingSink>,
    Arc<MockRadio>,
) {
    let mut config = AdmissionConfig {
        initial_mode: initial,
        ..AdmissionConfig::default()
    };
    tweak(&mut config);
    let radio = Arc::new(MockRadio::new());
    let ctl = AdmissionController::new(config, radio.clone()).unwrap();
    let handler = ctl.handler(RecordingSink::new());
    (ctl, handler, radio)
}

// ── Connect ───────────────────────────────────────────────────

#[test]
fn connect_requests_short_connection_interval() {
    let (_ctl, mut h, radio) = setup(Mode::Open, |_| {});
    h.on_connect(&status(1, false));
    assert_eq!(
        radio.calls()[0],
        RadioCall::UpdateParams(ConnHandle(1), ConnParams::default())
    );
    let p = ConnParams::default();
    assert_eq!((p.interval_units(), p.latency, p.timeout_units()), (6, 0, 10));
}

#[test]
fn decision_matrix_on_connect() {
    for (mode, bonded, expected) in [
        (Mode::Open, false, Decision::Accept),
        (Mode::Open, true, Decision::Accept),
        (Mode::RestrictedToBonded, true, Decision::Accept),
        (Mode::RestrictedToBonded, false, Decision::Reject),
    ] {
        let (_ctl, mut h, radio) = setup(mode, |_| {});
        if bonded {
            radio.bond(ConnHandle(9));
        }
        assert_eq!(h.on_connect(&status(9, false)), expected, "{mode} bonded={bonded}");
        let kicked = !radio.disconnects().is_empty();
        assert_eq!(kicked, expected == Decision::Reject);
    }
}

#[test]
fn stranger_in_restricted_mode_only_affects_its_own_link() {
    let (_ctl, mut h, radio) = setup(Mode::RestrictedToBonded, |_| {});
    radio.bond(ConnHandle(1));
    radio.bond(ConnHandle(2));
    h.on_connect(&status(1, false));
    h.on_connect(&status(2, false));

    assert_eq!(h.on_connect(&status(3, false)), Decision::Reject);

    assert_eq!(
        radio.disconnects(),
        vec![(ConnHandle(3), DisconnectReason::RemoteUserTerminated)]
    );
    assert_eq!(h.active_connections(), 2);
    assert!(h.connection(ConnHandle(1)).is_some());
    assert!(h.connection(ConnHandle(2)).is_some());
}

#[test]
fn admitted_links_survive_a_mode_flip() {
    let (ctl, mut h, radio) = setup(Mode::Open, |_| {});
    h.on_connect(&status(1, false));

    let mut sched = ctl.scheduler(RecordingSink::new());
    sched.set_mode(Mode::RestrictedToBonded).unwrap();

    assert!(radio.disconnects().is_empty());
    let ctx = h.connection(ConnHandle(1)).unwrap();
    assert_eq!(ctx.admitted_under, Mode::Open);

    // New arrivals see the new mode.
    assert_eq!(h.on_connect(&status(2, false)), Decision::Reject);
}

#[test]
fn table_overflow_is_rejected_as_capacity() {
    let (_ctl, mut h, radio) = setup(Mode::Open, |_| {});
    for i in 1..=4 {
        assert_eq!(h.on_connect(&status(i, false)), Decision::Accept);
    }
    assert_eq!(h.on_connect(&status(5, false)), Decision::Reject);
    assert_eq!(radio.disconnects().len(), 1);
    assert_eq!(
        h.sink().snapshot().last(),
        Some(&AdmissionEvent::Enforced {
            handle: ConnHandle(5),
            fault: AdmissionFault::CapacityExceeded,
        })
    );
}

// ── Security complete ─────────────────────────────────────────

#[test]
fn unencrypted_security_is_always_disconnected() {
    for mode in [Mode::Open, Mode::RestrictedToBonded] {
        let (_ctl, mut h, radio) = setup(mode, |_| {});
        radio.bond(ConnHandle(1));
        h.on_connect(&status(1, false));

        assert_eq!(h.on_security_complete(&status(1, false)), Decision::Reject);
        assert_eq!(
            radio.disconnects(),
            vec![(ConnHandle(1), DisconnectReason::AuthenticationFailure)]
        );
        assert!(radio.whitelisted().is_empty());
    }
}

#[test]
fn encrypted_link_whitelists_stable_identity() {
    let (_ctl, mut h, radio) = setup(Mode::Open, |_| {});
    h.on_connect(&status(1, false));
    radio.bond(ConnHandle(1));

    assert_eq!(h.on_security_complete(&status(1, true)), Decision::Accept);
    assert_eq!(radio.whitelisted(), vec![identity(1)]);

    let ctx = h.connection(ConnHandle(1)).unwrap();
    assert!(ctx.bonded && ctx.encrypted);
    assert_eq!(ctx.key_size, 16);
}

#[test]
fn on_air_whitelisting_is_configurable() {
    let (_ctl, mut h, radio) = setup(Mode::Open, |c| {
        c.whitelist_identity = IdentitySource::OnAir;
    });
    h.on_connect(&status(2, false));
    h.on_security_complete(&status(2, true));
    assert_eq!(radio.whitelisted(), vec![peer(2)]);
}

#[test]
fn whitelisting_can_be_disabled() {
    let (_ctl, mut h, radio) = setup(Mode::Open, |c| c.whitelist_on_encrypt = false);
    h.on_connect(&status(1, false));
    h.on_security_complete(&status(1, true));
    assert!(radio.whitelisted().is_empty());
}

#[test]
fn window_closing_before_bonding_rejects_at_security() {
    let (ctl, mut h, radio) = setup(Mode::Open, |_| {});
    h.on_connect(&status(1, false));

    ctl.scheduler(RecordingSink::new())
        .set_mode(Mode::RestrictedToBonded)
        .unwrap();

    // Encrypted but never bonded.
    assert_eq!(h.on_security_complete(&status(1, true)), Decision::Reject);
    assert_eq!(
        radio.disconnects(),
        vec![(ConnHandle(1), DisconnectReason::RemoteUserTerminated)]
    );
}

#[test]
fn security_for_unknown_handle_is_ignored_when_encrypted() {
    let (_ctl, mut h, radio) = setup(Mode::Open, |_| {});
    assert_eq!(h.on_security_complete(&status(7, true)), Decision::Reject);
    assert!(radio.disconnects().is_empty());
    assert!(radio.whitelisted().is_empty());
}

#[test]
fn failed_encryption_for_unknown_handle_still_disconnects() {
    let (_ctl, mut h, radio) = setup(Mode::Open, |_| {});
    assert_eq!(h.on_security_complete(&status(7, false)), Decision::Reject);
    assert_eq!(
        radio.disconnects(),
        vec![(ConnHandle(7), DisconnectReason::AuthenticationFailure)]
    );
    assert!(radio.whitelisted().is_empty());
}

// ── Bookkeeping and interactive auth ──────────────────────────

#[test]
fn lifecycle_events_are_reported_in_order() {
    let (_ctl, mut h, _radio) = setup(Mode::Open, |_| {});
    h.on_connect(&status(1, false));
    h.on_mtu_change(ConnHandle(1), 185);
    h.on_disconnect(ConnHandle(1), 0x13);

    assert_eq!(
        h.sink().snapshot(),
        vec![
            AdmissionEvent::Admitted {
                handle: ConnHandle(1),
                mode: Mode::Open,
                bonded: false,
            },
            AdmissionEvent::MtuChanged {
                handle: ConnHandle(1),
                mtu: 185,
            },
            AdmissionEvent::Disconnected {
                handle: ConnHandle(1),
                reason: 0x13,
            },
        ]
    );
    assert_eq!(h.active_connections(), 0);
}

#[test]
fn mtu_for_unknown_handle_is_dropped() {
    let (_ctl, mut h, _radio) = setup(Mode::Open, |_| {});
    h.on_mtu_change(ConnHandle(4), 247);
    assert!(h.sink().snapshot().is_empty());
}

#[test]
fn interactive_auth_never_grants_access() {
    let (_ctl, mut h, radio) = setup(Mode::Open, |_| {});
    h.on_connect(&status(1, false));

    assert_eq!(h.on_passkey_request(ConnHandle(1)), 0);
    assert!(!h.on_confirm_pin(ConnHandle(1), 654_321));
    assert_eq!(h.anomalies(), 2);
    assert!(radio.disconnects().is_empty());
    assert!(h.sink().snapshot().contains(&AdmissionEvent::Enforced {
        handle: ConnHandle(1),
        fault: AdmissionFault::UnexpectedInteractiveAuth,
    }));
}
