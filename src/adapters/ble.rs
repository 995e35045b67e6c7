//! BLE radio adapter.
//!
//! Implements [`RadioPort`] and [`BondStore`] against the Bluetooth Low Energy
//! stack, and bridges stack callbacks into a
//! registered [`ConnectionEvents`] implementation.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GAP/GATT server via `esp_idf_svc::sys`.
//! - **all other targets**: simulation backend that records every call.
//!
//! ## GATT Service Layout
//!
//! | Characteristic | UUID                                   | Perms                 |
//! |----------------|----------------------------------------|-----------------------|
//! | Data           | `acdab998-f4ce-4f5d-a049-15d597803501` | Read+Write, encrypted |
//!
//! The data characteristic only exists so a central has something that
//! requires encryption; reading it is what triggers pairing on phones.

use std::sync::{Mutex, MutexGuard};

use log::info;

#[cfg(target_os = "espidf")]
use crate::app::connection::AddrKind;
use crate::app::connection::{BdAddr, ConnHandle, ConnectionStatus};
use crate::app::ports::{
    AdvertisingFilter, BondStore, ConnParams, ConnectionEvents, DisconnectReason, MAX_BONDS,
    RadioPort, SecurityPolicy,
};
use crate::error::RadioError;

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const SERVICE_UUID: u128 = 0xacdab998_f4ce_4f5d_a049_15d597803500;
pub const CHAR_DATA: u128 = 0xacdab998_f4ce_4f5d_a049_15d597803501;

/// Initial value of the data characteristic.
pub const DATA_INITIAL_VALUE: &[u8] = b"Hello World says Neil";

/// Controller filter accept list capacity.
pub const WHITELIST_CAPACITY: usize = 8;

// ───────────────────────────────────────────────────────────────
// Event dispatch (stack callback context → handler)
// ───────────────────────────────────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures.  The handler is parked in this slot and every callback
// locks it for the duration of one event.  Callbacks run on the
// Bluedroid task (not ISR), so std Mutex is safe.

type EventSlot = Option<Box<dyn ConnectionEvents + Send>>;

static DISPATCHER: std::sync::Mutex<EventSlot> = std::sync::Mutex::new(None);

/// Route stack callbacks to `events`.  Replaces any previous handler.
pub fn register_events(events: impl ConnectionEvents + Send + 'static) {
    if let Ok(mut slot) = DISPATCHER.lock() {
        *slot = Some(Box::new(events));
        info!("BLE: connection events registered");
    }
}

/// Run `f` against the registered handler, if any.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
fn dispatch<T>(f: impl FnOnce(&mut dyn ConnectionEvents) -> T) -> Option<T> {
    let mut slot = DISPATCHER.lock().ok()?;
    slot.as_mut().map(|events| f(events.as_mut()))
}

// ───────────────────────────────────────────────────────────────
// Advertising restart gate
// ───────────────────────────────────────────────────────────────
//
// Bluedroid stops advertising when a central connects, so the adapter
// restarts it when a link drops.  That restart runs on the Bluedroid task
// while a mode commit may be running on the scheduler thread.  A stop
// opens a commit and the following start closes it; a restart requested
// in between is dropped because the commit's own start covers it with
// the new filter.

pub(crate) struct AdvertisingGate {
    committing: Mutex<bool>,
}

impl AdvertisingGate {
    pub(crate) const fn new() -> Self {
        Self {
            committing: Mutex::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        match self.committing.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run `stop`; on success hold off disconnect restarts until [`Self::start`].
    pub(crate) fn stop(
        &self,
        stop: impl FnOnce() -> Result<(), RadioError>,
    ) -> Result<(), RadioError> {
        let mut committing = self.lock();
        stop()?;
        *committing = true;
        Ok(())
    }

    /// Run `start`; on success let disconnect restarts through again.
    pub(crate) fn start(
        &self,
        start: impl FnOnce() -> Result<(), RadioError>,
    ) -> Result<(), RadioError> {
        let mut committing = self.lock();
        start()?;
        *committing = false;
        Ok(())
    }

    /// Run `restart` unless a commit is open.  Returns whether it ran.
    pub(crate) fn restart_after_disconnect(&self, restart: impl FnOnce()) -> bool {
        let committing = self.lock();
        if *committing {
            return false;
        }
        restart();
        true
    }
}

// ───────────────────────────────────────────────────────────────
// Security reports
// ───────────────────────────────────────────────────────────────

/// What to do with an authentication-complete report from the stack.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthAction {
    /// Tracked link: hand the report to the connection handler.
    Dispatch(ConnHandle),
    /// Untracked peer failed pairing: disconnect it by address.
    DisconnectPeer,
    /// Untracked peer paired: nothing to admit.
    Ignore,
}

#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
pub(crate) fn auth_action(link: Option<ConnHandle>, success: bool) -> AuthAction {
    match (link, success) {
        (Some(handle), _) => AuthAction::Dispatch(handle),
        (None, false) => AuthAction::DisconnectPeer,
        (None, true) => AuthAction::Ignore,
    }
}

/// One entry of the stack's bond list.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BondRecord {
    /// Address the stack files the bond under; Bluedroid uses the
    /// connection's pseudo-address here, in connect and auth events alike.
    pub addr: BdAddr,
    /// Identity address from the peer's distributed identity key.
    pub identity: Option<BdAddr>,
    /// Stored LTK size in bytes, 0 if no LTK was kept.
    pub key_size: u8,
}

#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
impl BondRecord {
    /// Address that survives the peer's address rotation.
    pub(crate) fn stable_addr(&self) -> BdAddr {
        self.identity.unwrap_or(self.addr)
    }
}

/// Status for a link whose pairing finished.  Identity and key size come
/// from the bond record; without one the identity is the link address and
/// the key size is reported as 0 (unknown).
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
pub(crate) fn secured_status(
    handle: ConnHandle,
    peer: BdAddr,
    success: bool,
    mitm: bool,
    bond: Option<&BondRecord>,
) -> ConnectionStatus {
    ConnectionStatus {
        handle,
        peer_addr: peer,
        identity_addr: bond.map_or(peer, BondRecord::stable_addr),
        authenticated: success && mitm,
        encrypted: success,
        key_size: if success { bond.map_or(0, |b| b.key_size) } else { 0 },
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation call record
// ───────────────────────────────────────────────────────────────

/// Every radio request the simulation backend received, in order.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    InitStack,
    SetSecurity(SecurityPolicy),
    SetFilter(AdvertisingFilter),
    StartAdvertising,
    StopAdvertising,
    UpdateParams(ConnHandle),
    Disconnect(ConnHandle, DisconnectReason),
    WhitelistAdd(BdAddr),
}

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct SimState {
    calls: Vec<SimCall>,
    advertising: bool,
    bonds: heapless::Vec<BdAddr, MAX_BONDS>,
    whitelist: heapless::Vec<BdAddr, WHITELIST_CAPACITY>,
    links: Vec<(ConnHandle, BdAddr)>,
    fail_next_stop: bool,
    /// Drop this link while the next filter update is applied.
    drop_link_on_filter: Option<ConnHandle>,
}

// ───────────────────────────────────────────────────────────────
// BLE adapter
// ───────────────────────────────────────────────────────────────

pub struct BleRadio {
    #[cfg(not(target_os = "espidf"))]
    sim: Mutex<SimState>,
    #[cfg(not(target_os = "espidf"))]
    gate: AdvertisingGate,
}

impl Default for BleRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl BleRadio {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            sim: Mutex::new(SimState::default()),
            #[cfg(not(target_os = "espidf"))]
            gate: AdvertisingGate::new(),
        }
    }
}

// ── Simulation backend ────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl BleRadio {
    fn with_sim<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> T {
        let mut guard = match self.sim.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Simulate a central connecting on `handle` from `addr`.
    pub fn sim_connect(&self, handle: ConnHandle, addr: BdAddr) {
        self.with_sim(|s| {
            s.links.retain(|(h, _)| *h != handle);
            s.links.push((handle, addr));
        });
    }

    /// Simulate a persisted bond for `addr`.
    pub fn sim_add_bond(&self, addr: BdAddr) {
        self.with_sim(|s| {
            if !s.bonds.contains(&addr) {
                let _ = s.bonds.push(addr);
            }
        });
    }

    /// Simulate the stack dropping `handle`: the link is forgotten and
    /// advertising restarts unless a mode commit owns the restart.
    /// Returns whether advertising was restarted.
    pub fn sim_link_lost(&self, handle: ConnHandle) -> bool {
        self.with_sim(|s| s.links.retain(|(h, _)| *h != handle));
        self.gate.restart_after_disconnect(|| {
            self.with_sim(|s| {
                s.calls.push(SimCall::StartAdvertising);
                s.advertising = true;
            })
        })
    }

    /// Drop `handle` from inside the next `set_advertising_filter`, i.e.
    /// in the middle of a mode commit.
    pub fn sim_lose_link_during_next_filter(&self, handle: ConnHandle) {
        self.with_sim(|s| s.drop_link_on_filter = Some(handle));
    }

    /// Make the next `stop_advertising` fail.
    pub fn sim_fail_next_stop(&self) {
        self.with_sim(|s| s.fail_next_stop = true);
    }

    pub fn sim_calls(&self) -> Vec<SimCall> {
        self.with_sim(|s| s.calls.clone())
    }

    pub fn sim_disconnects(&self) -> Vec<ConnHandle> {
        self.with_sim(|s| {
            s.calls
                .iter()
                .filter_map(|c| match c {
                    SimCall::Disconnect(h, _) => Some(*h),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn sim_param_updates(&self) -> usize {
        self.with_sim(|s| {
            s.calls
                .iter()
                .filter(|c| matches!(c, SimCall::UpdateParams(_)))
                .count()
        })
    }

    pub fn sim_is_advertising(&self) -> bool {
        self.with_sim(|s| s.advertising)
    }

    pub fn sim_whitelist(&self) -> Vec<BdAddr> {
        self.with_sim(|s| s.whitelist.to_vec())
    }
}

#[cfg(not(target_os = "espidf"))]
impl RadioPort for BleRadio {
    fn init_stack(&self, device_name: &str) -> Result<(), RadioError> {
        info!(
            "BLE(sim): stack up as '{}' (service {:032x})",
            device_name, SERVICE_UUID
        );
        self.with_sim(|s| s.calls.push(SimCall::InitStack));
        Ok(())
    }

    fn set_security_policy(&self, policy: SecurityPolicy) -> Result<(), RadioError> {
        self.with_sim(|s| s.calls.push(SimCall::SetSecurity(policy)));
        Ok(())
    }

    fn set_advertising_filter(&self, filter: AdvertisingFilter) -> Result<(), RadioError> {
        let lost = self.with_sim(|s| {
            s.calls.push(SimCall::SetFilter(filter));
            s.drop_link_on_filter.take()
        });
        if let Some(handle) = lost {
            self.sim_link_lost(handle);
        }
        Ok(())
    }

    fn start_advertising(&self) -> Result<(), RadioError> {
        self.gate.start(|| {
            self.with_sim(|s| {
                s.calls.push(SimCall::StartAdvertising);
                s.advertising = true;
            });
            Ok(())
        })
    }

    fn stop_advertising(&self) -> Result<(), RadioError> {
        self.gate.stop(|| {
            self.with_sim(|s| {
                if s.fail_next_stop {
                    s.fail_next_stop = false;
                    return Err(RadioError::Stack(-1));
                }
                s.calls.push(SimCall::StopAdvertising);
                s.advertising = false;
                Ok(())
            })
        })
    }

    fn update_connection_params(
        &self,
        handle: ConnHandle,
        _params: &ConnParams,
    ) -> Result<(), RadioError> {
        self.with_sim(|s| s.calls.push(SimCall::UpdateParams(handle)));
        Ok(())
    }

    fn disconnect(&self, handle: ConnHandle, reason: DisconnectReason) -> Result<(), RadioError> {
        self.with_sim(|s| s.calls.push(SimCall::Disconnect(handle, reason)));
        Ok(())
    }

    fn whitelist_add(&self, addr: &BdAddr) -> Result<(), RadioError> {
        self.with_sim(|s| {
            s.calls.push(SimCall::WhitelistAdd(*addr));
            if s.whitelist.contains(addr) {
                return Ok(());
            }
            s.whitelist.push(*addr).map_err(|_| RadioError::WhitelistFull)
        })
    }
}

#[cfg(not(target_os = "espidf"))]
impl BondStore for BleRadio {
    fn is_bonded(&self, handle: ConnHandle) -> bool {
        self.with_sim(|s| {
            s.links
                .iter()
                .find(|(h, _)| *h == handle)
                .is_some_and(|(_, addr)| s.bonds.contains(addr))
        })
    }

    fn bonded_peers(&self) -> heapless::Vec<BdAddr, MAX_BONDS> {
        self.with_sim(|s| s.bonds.clone())
    }
}

// ── ESP-IDF backend (Bluedroid) ───────────────────────────────

#[cfg(target_os = "espidf")]
mod esp {
    use super::*;
    use core::sync::atomic::{AtomicU16, AtomicU32, Ordering};
    use esp_idf_svc::sys::*;
    use log::{error, warn};

    const FILTER_ALLOW_ALL: u8 = 0;
    const FILTER_WHITELIST: u8 = 1;

    /// Auth-request bits (Bluetooth Core Vol 3 Part H 3.5.1).
    const AUTH_BOND: u8 = 0x01;
    const AUTH_MITM: u8 = 0x04;
    const AUTH_SC: u8 = 0x08;

    static GATTS_IF: AtomicU32 = AtomicU32::new(0);
    static SVC_HANDLE: AtomicU16 = AtomicU16::new(0);
    static INITIALISED: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);
    static ADV_FILTER: core::sync::atomic::AtomicU8 = core::sync::atomic::AtomicU8::new(FILTER_ALLOW_ALL);
    static ADV_GATE: AdvertisingGate = AdvertisingGate::new();

    /// conn_id → (remote address, address type) for every live link.
    static LINKS: std::sync::Mutex<heapless::Vec<(u16, [u8; 6], u8), { crate::app::connection::MAX_CONNECTIONS }>> =
        std::sync::Mutex::new(heapless::Vec::new());

    /// Backing storage for the data characteristic's initial value.
    static mut DATA_VALUE: [u8; 21] = *b"Hello World says Neil";

    fn check(ret: esp_err_t) -> Result<(), RadioError> {
        if ret == ESP_OK as esp_err_t {
            Ok(())
        } else {
            Err(RadioError::Stack(ret))
        }
    }

    fn addr_of(bda: &[u8; 6], addr_type: u8) -> BdAddr {
        let kind = if addr_type == esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC as u8 {
            AddrKind::Public
        } else {
            AddrKind::Random
        };
        BdAddr::new(*bda, kind)
    }

    fn link_by_handle(handle: ConnHandle) -> Option<([u8; 6], u8)> {
        LINKS
            .lock()
            .ok()?
            .iter()
            .find(|(id, _, _)| *id == handle.0)
            .map(|(_, bda, t)| (*bda, *t))
    }

    fn link_by_addr(bda: &[u8; 6]) -> Option<(u16, u8)> {
        LINKS
            .lock()
            .ok()?
            .iter()
            .find(|(_, a, _)| a == bda)
            .map(|(id, _, t)| (*id, *t))
    }

    fn uuid128(uuid: u128) -> esp_bt_uuid_t {
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = 16;
        t.uuid.uuid128 = uuid.to_le_bytes();
        t
    }

    fn adv_params() -> esp_ble_adv_params_t {
        let filter = if ADV_FILTER.load(Ordering::Acquire) == FILTER_WHITELIST {
            esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_WLST_CON_WLST
        } else {
            esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY
        };
        esp_ble_adv_params_t {
            adv_int_min: 0x20,
            adv_int_max: 0x40,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: filter,
            // SAFETY: remaining fields are plain integers / byte arrays.
            ..unsafe { core::mem::zeroed() }
        }
    }

    fn bond_record(dev: &esp_ble_bond_dev_t) -> BondRecord {
        let keys = &dev.bond_key;
        let mask = keys.key_mask as u32;
        let identity = ((mask & ESP_LE_KEY_PID as u32) != 0)
            .then(|| addr_of(&keys.pid_key.static_addr, keys.pid_key.addr_type as u8));
        let key_size = if (mask & ESP_LE_KEY_PENC as u32) != 0 {
            keys.penc_key.key_size
        } else {
            0
        };
        BondRecord {
            addr: addr_of(&dev.bd_addr, dev.bd_addr_type as u8),
            identity,
            key_size,
        }
    }

    fn bond_for(bda: &[u8; 6]) -> Option<BondRecord> {
        bond_list()
            .iter()
            .find(|dev| dev.bd_addr == *bda)
            .map(bond_record)
    }

    fn bond_list() -> heapless::Vec<esp_ble_bond_dev_t, MAX_BONDS> {
        let mut out = heapless::Vec::new();
        let mut raw: [esp_ble_bond_dev_t; MAX_BONDS] = unsafe { core::mem::zeroed() };
        let mut num: i32 = MAX_BONDS as i32;
        // SAFETY: `raw` has room for `num` entries; the stack writes at most that many.
        let ret = unsafe { esp_ble_get_bond_device_list(&mut num, raw.as_mut_ptr()) };
        if ret != ESP_OK as esp_err_t {
            warn!("BLE: bond list read failed ({})", ret);
            return out;
        }
        for dev in raw.iter().take(num.max(0) as usize) {
            let _ = out.push(*dev);
        }
        out
    }

    // ── Stack callbacks ──────────────────────────────────────

    pub(super) unsafe extern "C" fn gap_event_handler(
        event: esp_gap_ble_cb_event_t,
        param: *mut esp_ble_gap_cb_param_t,
    ) {
        // SAFETY: Bluedroid passes a valid param block for the event's lifetime.
        let param = unsafe { &mut *param };
        match event {
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
                let status = unsafe { param.adv_start_cmpl.status };
                if status != esp_bt_status_t_ESP_BT_STATUS_SUCCESS {
                    warn!("BLE GAP: advertising start failed ({})", status);
                }
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_SEC_REQ_EVT => {
                // Admission is decided per connection, not here.
                unsafe {
                    esp_ble_gap_security_rsp(param.ble_security.ble_req.bd_addr.as_mut_ptr(), true);
                }
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_AUTH_CMPL_EVT => {
                let p = unsafe { &mut param.ble_security.auth_cmpl };
                let link = link_by_addr(&p.bd_addr);
                match auth_action(link.map(|(id, _)| ConnHandle(id)), p.success) {
                    AuthAction::Ignore => warn!("BLE GAP: auth complete for unknown peer"),
                    AuthAction::DisconnectPeer => {
                        warn!(
                            "BLE GAP: authentication failed for untracked peer (reason={}), terminating",
                            p.fail_reason
                        );
                        unsafe {
                            esp_ble_gap_disconnect(p.bd_addr.as_mut_ptr());
                        }
                    }
                    AuthAction::Dispatch(handle) => {
                        if !p.success {
                            warn!("BLE GAP: authentication failed (reason={})", p.fail_reason);
                        }
                        let addr_type = link.map_or(p.addr_type as u8, |(_, t)| t);
                        let bond = if p.success { bond_for(&p.bd_addr) } else { None };
                        let status = secured_status(
                            handle,
                            addr_of(&p.bd_addr, addr_type),
                            p.success,
                            (p.auth_mode as u8 & AUTH_MITM) != 0,
                            bond.as_ref(),
                        );
                        dispatch(|events| events.on_security_complete(&status));
                    }
                }
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_PASSKEY_REQ_EVT => {
                let bda = unsafe { &mut param.ble_security.ble_req.bd_addr };
                let handle = link_by_addr(bda).map_or(ConnHandle(u16::MAX), |(id, _)| ConnHandle(id));
                let passkey = dispatch(|events| events.on_passkey_request(handle)).unwrap_or(0);
                unsafe {
                    esp_ble_passkey_reply(bda.as_mut_ptr(), false, passkey);
                }
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_NC_REQ_EVT => {
                let p = unsafe { &mut param.ble_security.key_notif };
                let handle = link_by_addr(&p.bd_addr).map_or(ConnHandle(u16::MAX), |(id, _)| ConnHandle(id));
                let accept = dispatch(|events| events.on_confirm_pin(handle, p.passkey)).unwrap_or(false);
                unsafe {
                    esp_ble_confirm_reply(p.bd_addr.as_mut_ptr(), accept);
                }
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_UPDATE_CONN_PARAMS_EVT => {
                let p = unsafe { &param.update_conn_params };
                info!(
                    "BLE GAP: conn params int={} lat={} timeout={}",
                    p.conn_int, p.latency, p.timeout
                );
            }
            _ => {}
        }
    }

    pub(super) unsafe extern "C" fn gatts_event_handler(
        event: esp_gatts_cb_event_t,
        gatts_if: esp_gatt_if_t,
        param: *mut esp_ble_gatts_cb_param_t,
    ) {
        // SAFETY: Bluedroid passes a valid param block for the event's lifetime.
        let param = unsafe { &mut *param };
        match event {
            esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
                GATTS_IF.store(u32::from(gatts_if), Ordering::Release);
                let mut svc_id = esp_gatt_srvc_id_t {
                    id: esp_gatt_id_t {
                        uuid: uuid128(SERVICE_UUID),
                        inst_id: 0,
                    },
                    is_primary: true,
                };
                unsafe {
                    esp_ble_gatts_create_service(gatts_if, &mut svc_id, 4);
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
                let svc_handle = unsafe { param.create.service_handle };
                SVC_HANDLE.store(svc_handle, Ordering::Release);
                let mut char_uuid = uuid128(CHAR_DATA);
                // SAFETY: DATA_VALUE is handed to the stack once and never
                // touched from Rust again.
                let mut value = esp_attr_value_t {
                    attr_max_len: 64,
                    attr_len: DATA_INITIAL_VALUE.len() as u16,
                    attr_value: unsafe { core::ptr::addr_of_mut!(DATA_VALUE) as *mut u8 },
                };
                let mut control = esp_attr_control_t {
                    auto_rsp: ESP_GATT_AUTO_RSP as u8,
                };
                unsafe {
                    esp_ble_gatts_start_service(svc_handle);
                    esp_ble_gatts_add_char(
                        svc_handle,
                        &mut char_uuid,
                        (ESP_GATT_PERM_READ_ENCRYPTED | ESP_GATT_PERM_WRITE_ENCRYPTED) as esp_gatt_perm_t,
                        (ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_WRITE) as esp_gatt_char_prop_t,
                        &mut value,
                        &mut control,
                    );
                }
                info!("BLE GATTS: data service created (handle={})", svc_handle);
            }
            esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
                let p = unsafe { &param.connect };
                let addr_type = p.ble_addr_type as u8;
                if let Ok(mut links) = LINKS.lock() {
                    links.retain(|(id, _, _)| *id != p.conn_id);
                    if links.push((p.conn_id, p.remote_bda, addr_type)).is_err() {
                        warn!("BLE GATTS: link table full");
                    }
                }
                let peer = addr_of(&p.remote_bda, addr_type);
                let status = ConnectionStatus {
                    handle: ConnHandle(p.conn_id),
                    peer_addr: peer,
                    identity_addr: bond_for(&p.remote_bda).map_or(peer, |b| b.stable_addr()),
                    authenticated: false,
                    encrypted: false,
                    key_size: 0,
                };
                dispatch(|events| events.on_connect(&status));
            }
            esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
                let p = unsafe { &param.disconnect };
                dispatch(|events| events.on_disconnect(ConnHandle(p.conn_id), p.reason as u8));
                if let Ok(mut links) = LINKS.lock() {
                    links.retain(|(id, _, _)| *id != p.conn_id);
                }
                // Advertising stops on connect; bring it back for the next
                // peer unless a commit is about to restart it.
                let restarted = ADV_GATE.restart_after_disconnect(|| {
                    let mut params = adv_params();
                    unsafe {
                        esp_ble_gap_start_advertising(&mut params);
                    }
                });
                if !restarted {
                    info!("BLE GATTS: restart left to mode commit");
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_MTU_EVT => {
                let p = unsafe { &param.mtu };
                dispatch(|events| events.on_mtu_change(ConnHandle(p.conn_id), p.mtu));
            }
            _ => {}
        }
    }

    // ── RadioPort / BondStore ────────────────────────────────

    impl RadioPort for BleRadio {
        fn init_stack(&self, device_name: &str) -> Result<(), RadioError> {
            unsafe {
                // Release classic BT memory (BLE-only mode saves ~30 KB).
                esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

                let mut bt_cfg = esp_bt_controller_config_t::default();
                check(esp_bt_controller_init(&mut bt_cfg)).inspect_err(|e| {
                    error!("BLE: bt_controller_init failed ({})", e);
                })?;
                check(esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE))?;
                check(esp_bluedroid_init())?;
                check(esp_bluedroid_enable())?;

                check(esp_ble_gap_register_callback(Some(gap_event_handler)))?;
                check(esp_ble_gatts_register_callback(Some(gatts_event_handler)))?;
                check(esp_ble_gatts_app_register(0))?;

                let mut name = heapless::Vec::<u8, 32>::new();
                let _ = name.extend_from_slice(device_name.as_bytes());
                let _ = name.push(0);
                check(esp_ble_gap_set_device_name(name.as_ptr() as *const _))?;

                let mut svc_uuid = SERVICE_UUID.to_le_bytes();
                let mut adv_data: esp_ble_adv_data_t = core::mem::zeroed();
                adv_data.set_scan_rsp = false;
                adv_data.include_name = true;
                adv_data.service_uuid_len = svc_uuid.len() as u16;
                adv_data.p_service_uuid = svc_uuid.as_mut_ptr();
                adv_data.flag = (ESP_BLE_ADV_FLAG_GEN_DISC | ESP_BLE_ADV_FLAG_BREDR_NOT_SPT) as u8;
                check(esp_ble_gap_config_adv_data(&mut adv_data))?;
            }
            INITIALISED.store(true, Ordering::Release);
            info!("BLE(espidf): Bluedroid up, name '{}'", device_name);
            Ok(())
        }

        fn set_security_policy(&self, policy: SecurityPolicy) -> Result<(), RadioError> {
            if !INITIALISED.load(Ordering::Acquire) {
                return Err(RadioError::NotInitialised);
            }
            let mut auth_req: u8 = 0;
            if policy.bondable {
                auth_req |= AUTH_BOND;
            }
            if policy.mitm {
                auth_req |= AUTH_MITM;
            }
            if policy.secure_connections {
                auth_req |= AUTH_SC;
            }
            let iocap: u8 = ESP_IO_CAP_NONE as u8;
            let key_size: u8 = 16;
            let keys: u8 = (ESP_BLE_ENC_KEY_MASK | ESP_BLE_ID_KEY_MASK) as u8;

            let params: [(esp_ble_sm_param_t, &u8); 5] = [
                (esp_ble_sm_param_t_ESP_BLE_SM_AUTHEN_REQ_MODE, &auth_req),
                (esp_ble_sm_param_t_ESP_BLE_SM_IOCAP_MODE, &iocap),
                (esp_ble_sm_param_t_ESP_BLE_SM_MAX_KEY_SIZE, &key_size),
                (esp_ble_sm_param_t_ESP_BLE_SM_SET_INIT_KEY, &keys),
                (esp_ble_sm_param_t_ESP_BLE_SM_SET_RSP_KEY, &keys),
            ];
            for (param, value) in params {
                // SAFETY: the stack copies one byte out of `value` before returning.
                check(unsafe {
                    esp_ble_gap_set_security_param(param, value as *const u8 as *mut _, 1)
                })?;
            }
            info!(
                "BLE(espidf): security bond={} mitm={} sc={}",
                policy.bondable, policy.mitm, policy.secure_connections
            );
            Ok(())
        }

        fn set_advertising_filter(&self, filter: AdvertisingFilter) -> Result<(), RadioError> {
            let raw = match filter {
                AdvertisingFilter::AllowAll => FILTER_ALLOW_ALL,
                AdvertisingFilter::WhitelistOnly => FILTER_WHITELIST,
            };
            ADV_FILTER.store(raw, Ordering::Release);
            Ok(())
        }

        fn start_advertising(&self) -> Result<(), RadioError> {
            if !INITIALISED.load(Ordering::Acquire) {
                return Err(RadioError::NotInitialised);
            }
            ADV_GATE.start(|| {
                let mut params = adv_params();
                check(unsafe { esp_ble_gap_start_advertising(&mut params) })
            })
        }

        fn stop_advertising(&self) -> Result<(), RadioError> {
            if !INITIALISED.load(Ordering::Acquire) {
                return Err(RadioError::NotInitialised);
            }
            ADV_GATE.stop(|| check(unsafe { esp_ble_gap_stop_advertising() }))
        }

        fn update_connection_params(
            &self,
            handle: ConnHandle,
            params: &ConnParams,
        ) -> Result<(), RadioError> {
            let (bda, _) = link_by_handle(handle).ok_or(RadioError::UnknownConnection)?;
            let mut req = esp_ble_conn_update_params_t {
                bda,
                min_int: params.interval_units(),
                max_int: params.interval_units(),
                latency: params.latency,
                timeout: params.timeout_units(),
            };
            check(unsafe { esp_ble_gap_update_conn_params(&mut req) })
        }

        fn disconnect(&self, handle: ConnHandle, reason: DisconnectReason) -> Result<(), RadioError> {
            let (mut bda, _) = link_by_handle(handle).ok_or(RadioError::UnknownConnection)?;
            // Bluedroid always terminates with 0x13; the reason is for the log.
            info!("BLE(espidf): terminating {} (0x{:02x})", handle, reason.code());
            check(unsafe { esp_ble_gap_disconnect(bda.as_mut_ptr()) })
        }

        fn whitelist_add(&self, addr: &BdAddr) -> Result<(), RadioError> {
            let mut bda = addr.bytes;
            let wl_type = match addr.kind {
                AddrKind::Public => esp_ble_wl_addr_type_t_BLE_WL_ADDR_TYPE_PUBLIC,
                AddrKind::Random => esp_ble_wl_addr_type_t_BLE_WL_ADDR_TYPE_RANDOM,
            };
            let ret = unsafe { esp_ble_gap_update_whitelist(true, bda.as_mut_ptr(), wl_type) };
            if ret == ESP_ERR_NO_MEM as esp_err_t {
                return Err(RadioError::WhitelistFull);
            }
            check(ret)
        }
    }

    impl BondStore for BleRadio {
        fn is_bonded(&self, handle: ConnHandle) -> bool {
            let Some((bda, _)) = link_by_handle(handle) else {
                return false;
            };
            bond_list().iter().any(|dev| dev.bd_addr == bda)
        }

        fn bonded_peers(&self) -> heapless::Vec<BdAddr, MAX_BONDS> {
            bond_list()
                .iter()
                .map(|dev| bond_record(dev).stable_addr())
                .collect()
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
