//! Connection lifecycle handler.  Applies the admission policy to every
//! connect and security-complete event the stack delivers.
//!
//! ```text
//!  BLE host task                        ConnectionHandler
//!  ─────────────                        ─────────────────
//!  connect ─────────────────────────▶  tune params, admit? ──▶ disconnect
//!  security complete ───────────────▶  encrypted? admit?   ──▶ disconnect
//!                                       └─▶ whitelist identity (advisory)
//!  mtu / disconnect ────────────────▶  bookkeeping
//!  passkey / confirm pin ───────────▶  deny, flag anomaly
//! ```
//!
//! Every enforcement path disconnects only the offending link.  Radio
//! errors while enforcing are logged and dropped; there are no retries at
//! this layer.

use std::sync::Arc;

use log::{info, warn};

use super::connection::{ConnHandle, ConnectionContext, ConnectionStatus, ConnectionTable};
use super::events::AdmissionEvent;
use super::mode::ModeState;
use super::policy::Decision;
use super::ports::{BondStore, ConnParams, ConnectionEvents, DisconnectReason, EventSink, RadioPort};
use super::strategy::{self, EnforcementStrategy};
use crate::config::{AdmissionConfig, IdentitySource};
use crate::error::AdmissionFault;

/// Reacts to stack connection events: admits or disconnects each link
/// under the current mode, tracks live links, and whitelists peers once
/// their link is encrypted.
///
/// Reads the mode, never writes it.  One handler serves all links; the
/// adapter calls it from the stack's callback context.
pub struct ConnectionHandler<R, S> {
    mode: Arc<ModeState>,
    radio: Arc<R>,
    strategy: &'static dyn EnforcementStrategy,
    conn_params: ConnParams,
    whitelist_on_encrypt: bool,
    whitelist_identity: IdentitySource,
    connections: ConnectionTable,
    sink: S,
    /// Interactive-auth callbacks seen (configuration mismatch indicator).
    anomalies: u32,
}

impl<R, S> ConnectionHandler<R, S>
where
    R: RadioPort + BondStore,
    S: EventSink,
{
    /// Handler sharing `mode` with the scheduler.  Strategy, connection
    /// parameters and whitelisting behaviour come from `config`.
    pub fn new(mode: Arc<ModeState>, radio: Arc<R>, config: &AdmissionConfig, sink: S) -> Self {
        Self {
            mode,
            radio,
            strategy: strategy::select(config.strategy),
            conn_params: config.conn_params,
            whitelist_on_encrypt: config.whitelist_on_encrypt,
            whitelist_identity: config.whitelist_identity,
            connections: ConnectionTable::new(),
            sink,
            anomalies: 0,
        }
    }

    pub fn connection(&self, handle: ConnHandle) -> Option<&ConnectionContext> {
        self.connections.get(handle)
    }

    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn anomalies(&self) -> u32 {
        self.anomalies
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn enforce(&mut self, handle: ConnHandle, fault: AdmissionFault, reason: DisconnectReason) {
        warn!("Admission: disconnecting {} ({})", handle, fault);
        if let Err(e) = self.radio.disconnect(handle, reason) {
            warn!("Admission: disconnect {} failed: {}", handle, e);
        }
        self.sink.emit(&AdmissionEvent::Enforced { handle, fault });
    }

    fn log_status(&self, what: &str, status: &ConnectionStatus, bonded: bool) {
        info!(
            "Admission: {} {} | addr={} id={} | bonded={} auth={} enc={} key={}",
            what,
            status.handle,
            status.peer_addr,
            status.identity_addr,
            bonded,
            status.authenticated,
            status.encrypted,
            status.key_size,
        );
    }

    fn flag_anomaly(&mut self, handle: ConnHandle, what: &str) {
        self.anomalies = self.anomalies.saturating_add(1);
        warn!(
            "Admission: unexpected {} on {} (IO capability is none; check security config)",
            what, handle
        );
        self.sink.emit(&AdmissionEvent::Enforced {
            handle,
            fault: AdmissionFault::UnexpectedInteractiveAuth,
        });
    }
}

impl<R, S> ConnectionEvents for ConnectionHandler<R, S>
where
    R: RadioPort + BondStore,
    S: EventSink,
{
    fn on_connect(&mut self, status: &ConnectionStatus) -> Decision {
        let handle = status.handle;

        // Shorter interval for responsiveness; failure is not fatal.
        if let Err(e) = self.radio.update_connection_params(handle, &self.conn_params) {
            warn!("Admission: conn param update on {} failed: {}", handle, e);
        }

        let mode = self.mode.current();
        let bonded = self.radio.is_bonded(handle);
        self.log_status("connect", status, bonded);

        if !self.strategy.admit(mode, bonded).is_accept() {
            self.enforce(
                handle,
                AdmissionFault::PolicyRejection,
                DisconnectReason::RemoteUserTerminated,
            );
            return Decision::Reject;
        }

        if self
            .connections
            .insert(ConnectionContext::new(status, bonded, mode))
            .is_err()
        {
            self.enforce(
                handle,
                AdmissionFault::CapacityExceeded,
                DisconnectReason::RemoteUserTerminated,
            );
            return Decision::Reject;
        }

        self.sink.emit(&AdmissionEvent::Admitted {
            handle,
            mode,
            bonded,
        });
        Decision::Accept
    }

    fn on_disconnect(&mut self, handle: ConnHandle, reason: u8) {
        if self.connections.remove(handle).is_none() {
            info!("Admission: {} disconnected before admission", handle);
        }
        info!("Admission: {} disconnected, reason=0x{:02x}", handle, reason);
        self.sink
            .emit(&AdmissionEvent::Disconnected { handle, reason });
    }

    fn on_mtu_change(&mut self, handle: ConnHandle, mtu: u16) {
        match self.connections.get_mut(handle) {
            Some(ctx) => ctx.mtu = mtu,
            None => {
                warn!("Admission: MTU update for unknown {}", handle);
                return;
            }
        }
        info!("Admission: {} MTU -> {}", handle, mtu);
        self.sink.emit(&AdmissionEvent::MtuChanged { handle, mtu });
    }

    fn on_security_complete(&mut self, status: &ConnectionStatus) -> Decision {
        let handle = status.handle;

        if !status.encrypted {
            self.enforce(
                handle,
                AdmissionFault::EncryptionFailure,
                DisconnectReason::AuthenticationFailure,
            );
            return Decision::Reject;
        }

        let bonded = self.radio.is_bonded(handle);
        self.log_status("secured", status, bonded);

        let Some(ctx) = self.connections.get_mut(handle) else {
            // Already rejected at connect; its disconnect is in flight.
            warn!("Admission: security complete for unknown {}", handle);
            return Decision::Reject;
        };
        ctx.refresh(status, bonded);

        let mode = self.mode.current();
        if !self.strategy.admit(mode, bonded).is_accept() {
            self.enforce(
                handle,
                AdmissionFault::PolicyRejection,
                DisconnectReason::RemoteUserTerminated,
            );
            return Decision::Reject;
        }

        if self.whitelist_on_encrypt {
            let addr = match self.whitelist_identity {
                IdentitySource::Stable => status.identity_addr,
                IdentitySource::OnAir => status.peer_addr,
            };
            if addr.is_resolvable_private() {
                warn!("Admission: whitelisting rotating address {}", addr);
            }
            match self.radio.whitelist_add(&addr) {
                Ok(()) => info!("Admission: whitelisted {}", addr),
                Err(e) => warn!("Admission: whitelist add {} failed: {}", addr, e),
            }
        }

        self.sink.emit(&AdmissionEvent::Secured {
            handle,
            identity: status.identity_addr,
            key_size: status.key_size,
        });
        Decision::Accept
    }

    fn on_passkey_request(&mut self, handle: ConnHandle) -> u32 {
        self.flag_anomaly(handle, "passkey request");
        0
    }

    fn on_confirm_pin(&mut self, handle: ConnHandle, pin: u32) -> bool {
        self.flag_anomaly(handle, "numeric comparison");
        info!("Admission: rejected pin {:06} on {}", pin, handle);
        false
    }
}
