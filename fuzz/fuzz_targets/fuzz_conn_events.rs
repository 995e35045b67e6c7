//! Fuzz target: connection event sequences
//!
//! Drives the connection handler with arbitrary connect / security /
//! MTU / disconnect sequences while the mode flips underneath it, and
//! verifies:
//! - the connection table never exceeds `MAX_CONNECTIONS`
//! - no unbonded peer is admitted while restricted
//! - a failed encryption is always answered with a disconnect
//!
//! cargo fuzz run fuzz_conn_events

#![no_main]

use std::sync::Arc;

use bondgate::adapters::ble::BleRadio;
use bondgate::app::connection::{AddrKind, BdAddr, ConnHandle, ConnectionStatus, MAX_CONNECTIONS};
use bondgate::app::events::AdmissionEvent;
use bondgate::app::handler::ConnectionHandler;
use bondgate::app::mode::{Mode, ModeState};
use bondgate::app::ports::{ConnectionEvents, EventSink};
use bondgate::config::AdmissionConfig;
use bondgate::scheduler::ModeToggleScheduler;
use libfuzzer_sys::fuzz_target;

#[derive(Default)]
struct Guard {
    violation: Option<AdmissionEvent>,
}

impl EventSink for Guard {
    fn emit(&mut self, event: &AdmissionEvent) {
        if let AdmissionEvent::Admitted {
            mode: Mode::RestrictedToBonded,
            bonded: false,
            ..
        } = event
        {
            self.violation = Some(event.clone());
        }
    }
}

fn status(handle: u16, encrypted: bool) -> ConnectionStatus {
    let addr = BdAddr::new([handle as u8, 0, 0, 0, 0, 1], AddrKind::Random);
    ConnectionStatus {
        handle: ConnHandle(handle),
        peer_addr: addr,
        identity_addr: addr,
        authenticated: false,
        encrypted,
        key_size: if encrypted { 16 } else { 0 },
    }
}

fuzz_target!(|data: &[u8]| {
    let config = AdmissionConfig::default();
    let mode = Arc::new(ModeState::new(Mode::RestrictedToBonded));
    let radio = Arc::new(BleRadio::new());
    let mut h = ConnectionHandler::new(
        mode.clone(),
        radio.clone(),
        &config,
        Guard::default(),
    );
    let mut sched = ModeToggleScheduler::new(mode.clone(), radio.clone(), &config, Guard::default());

    for pair in data.chunks_exact(2) {
        let handle = u16::from(pair[1] & 0x07);
        match pair[0] % 7 {
            0 => {
                radio.sim_connect(ConnHandle(handle), status(handle, false).peer_addr);
                h.on_connect(&status(handle, false));
            }
            1 => {
                h.on_security_complete(&status(handle, true));
            }
            2 => {
                h.on_security_complete(&status(handle, false));
                assert_eq!(radio.sim_disconnects().last(), Some(&ConnHandle(handle)));
            }
            3 => h.on_disconnect(ConnHandle(handle), pair[1]),
            4 => h.on_mtu_change(ConnHandle(handle), u16::from(pair[1]) + 23),
            5 => radio.sim_add_bond(status(handle, false).peer_addr),
            _ => {
                let _ = sched.set_mode(mode.current().opposite());
            }
        }
        assert!(h.active_connections() <= MAX_CONNECTIONS);
        assert!(h.sink().violation.is_none(), "{:?}", h.sink().violation);
    }
});
