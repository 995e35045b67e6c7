//! Mock radio for integration tests.
//!
//! Records every transport call together with the admission mode that was
//! current at the moment of the call, so tests can assert on ordering
//! between advertising and mode commits.

use std::sync::{Arc, Mutex, OnceLock};

use bondgate::app::connection::{AddrKind, BdAddr, ConnHandle, ConnectionStatus};
use bondgate::app::events::AdmissionEvent;
use bondgate::app::mode::{Mode, ModeState};
use bondgate::app::ports::{
    AdvertisingFilter, BondStore, ConnParams, DisconnectReason, EventSink, MAX_BONDS, RadioPort,
    SecurityPolicy,
};
use bondgate::error::RadioError;

// ── Radio call record ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    InitStack(String),
    SetSecurity(SecurityPolicy),
    SetFilter(AdvertisingFilter),
    StartAdvertising,
    StopAdvertising,
    UpdateParams(ConnHandle, ConnParams),
    Disconnect(ConnHandle, DisconnectReason),
    WhitelistAdd(BdAddr),
}

#[derive(Debug, Clone)]
pub struct Record {
    pub call: RadioCall,
    /// Current mode when the call was made (`None` if not observing).
    pub mode: Option<Mode>,
}

#[derive(Default)]
struct Inner {
    records: Vec<Record>,
    bonded: Vec<ConnHandle>,
    bonds: Vec<BdAddr>,
    fail_stops: u32,
    fail_starts: u32,
}

// ── MockRadio ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MockRadio {
    inner: Mutex<Inner>,
    observed: OnceLock<Arc<ModeState>>,
}

#[allow(dead_code)]
impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot `mode.current()` on every subsequent call.
    pub fn observe(&self, mode: Arc<ModeState>) {
        let _ = self.observed.set(mode);
    }

    pub fn bond(&self, handle: ConnHandle) {
        self.inner.lock().unwrap().bonded.push(handle);
    }

    pub fn add_bond_record(&self, addr: BdAddr) {
        self.inner.lock().unwrap().bonds.push(addr);
    }

    pub fn fail_next_stops(&self, n: u32) {
        self.inner.lock().unwrap().fail_stops = n;
    }

    pub fn fail_next_starts(&self, n: u32) {
        self.inner.lock().unwrap().fail_starts = n;
    }

    pub fn records(&self) -> Vec<Record> {
        self.inner.lock().unwrap().records.clone()
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.records().into_iter().map(|r| r.call).collect()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().records.clear();
    }

    pub fn disconnects(&self) -> Vec<(ConnHandle, DisconnectReason)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RadioCall::Disconnect(h, r) => Some((h, r)),
                _ => None,
            })
            .collect()
    }

    pub fn whitelisted(&self) -> Vec<BdAddr> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RadioCall::WhitelistAdd(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RadioCall) {
        let mode = self.observed.get().map(|m| m.current());
        self.inner.lock().unwrap().records.push(Record { call, mode });
    }
}

impl RadioPort for MockRadio {
    fn init_stack(&self, device_name: &str) -> Result<(), RadioError> {
        self.record(RadioCall::InitStack(device_name.to_string()));
        Ok(())
    }

    fn set_security_policy(&self, policy: SecurityPolicy) -> Result<(), RadioError> {
        self.record(RadioCall::SetSecurity(policy));
        Ok(())
    }

    fn set_advertising_filter(&self, filter: AdvertisingFilter) -> Result<(), RadioError> {
        self.record(RadioCall::SetFilter(filter));
        Ok(())
    }

    fn start_advertising(&self) -> Result<(), RadioError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_starts > 0 {
                inner.fail_starts -= 1;
                return Err(RadioError::Stack(-2));
            }
        }
        self.record(RadioCall::StartAdvertising);
        Ok(())
    }

    fn stop_advertising(&self) -> Result<(), RadioError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_stops > 0 {
                inner.fail_stops -= 1;
                return Err(RadioError::Stack(-1));
            }
        }
        self.record(RadioCall::StopAdvertising);
        Ok(())
    }

    fn update_connection_params(
        &self,
        handle: ConnHandle,
        params: &ConnParams,
    ) -> Result<(), RadioError> {
        self.record(RadioCall::UpdateParams(handle, *params));
        Ok(())
    }

    fn disconnect(&self, handle: ConnHandle, reason: DisconnectReason) -> Result<(), RadioError> {
        self.record(RadioCall::Disconnect(handle, reason));
        Ok(())
    }

    fn whitelist_add(&self, addr: &BdAddr) -> Result<(), RadioError> {
        self.record(RadioCall::WhitelistAdd(*addr));
        Ok(())
    }
}

impl BondStore for MockRadio {
    fn is_bonded(&self, handle: ConnHandle) -> bool {
        self.inner.lock().unwrap().bonded.contains(&handle)
    }

    fn bonded_peers(&self) -> heapless::Vec<BdAddr, MAX_BONDS> {
        self.inner
            .lock()
            .unwrap()
            .bonds
            .iter()
            .copied()
            .take(MAX_BONDS)
            .collect()
    }
}

// ── Recording event sink ──────────────────────────────────────

#[derive(Default, Clone)]
pub struct RecordingSink {
    pub events: Arc<Mutex<Vec<AdmissionEvent>>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<AdmissionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AdmissionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ── Fixtures ──────────────────────────────────────────────────

#[allow(dead_code)]
pub fn peer(n: u8) -> BdAddr {
    BdAddr::new([0x40 | n, n, n, n, n, n], AddrKind::Random)
}

#[allow(dead_code)]
pub fn identity(n: u8) -> BdAddr {
    BdAddr::new([0xc0, 0, 0, 0, 0, n], AddrKind::Public)
}

#[allow(dead_code)]
pub fn status(handle: u16, encrypted: bool) -> ConnectionStatus {
    let n = handle as u8;
    ConnectionStatus {
        handle: ConnHandle(handle),
        peer_addr: peer(n),
        identity_addr: if encrypted { identity(n) } else { peer(n) },
        authenticated: false,
        encrypted,
        key_size: if encrypted { 16 } else { 0 },
    }
}
