//! Port traits: the hexagonal boundary between admission logic and the
//! BLE stack.
//!
//! ```text
//!   BleRadio ──▶ ConnectionEvents ──▶ ConnectionHandler (domain)
//!   ConnectionHandler / Scheduler ──▶ RadioPort + BondStore ──▶ BleRadio
//! ```
//!
//! The radio is shared between the scheduler thread and the stack's own
//! callback task, so [`RadioPort`] and [`BondStore`] take `&self`; every
//! request is fire-and-forget and must not block on radio completion.

use serde::{Deserialize, Serialize};

use super::connection::{BdAddr, ConnHandle, ConnectionStatus};
use super::policy::Decision;
use crate::config::AdmissionConfig;
use crate::error::{Error, RadioError};

/// Maximum bond records the stack persists.
pub const MAX_BONDS: usize = 16;

// ───────────────────────────────────────────────────────────────
// Transport-facing value types
// ───────────────────────────────────────────────────────────────

/// Security manager settings.  IO capability is always "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub bondable: bool,
    pub mitm: bool,
    pub secure_connections: bool,
}

impl Default for SecurityPolicy {
    /// Bonding, just-works, legacy pairing: the combination that survives
    /// reconnects after a peripheral reboot.
    fn default() -> Self {
        Self {
            bondable: true,
            mitm: false,
            secure_connections: false,
        }
    }
}

/// Connection parameters requested right after connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnParams {
    /// Connection interval (microseconds, multiple of 1250).
    pub interval_us: u32,
    /// Peripheral latency (connection events the peripheral may skip).
    pub latency: u16,
    /// Supervision timeout (milliseconds, multiple of 10).
    pub supervision_timeout_ms: u16,
}

impl Default for ConnParams {
    fn default() -> Self {
        Self {
            interval_us: 7_500,
            latency: 0,
            supervision_timeout_ms: 100,
        }
    }
}

impl ConnParams {
    /// Interval in controller units of 1.25 ms.
    pub fn interval_units(&self) -> u16 {
        (self.interval_us / 1250) as u16
    }

    /// Timeout in controller units of 10 ms.
    pub fn timeout_units(&self) -> u16 {
        self.supervision_timeout_ms / 10
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if !(7_500..=4_000_000).contains(&self.interval_us) || self.interval_us % 1250 != 0 {
            return Err(Error::Config(
                "conn_params.interval_us must be 7500-4000000 in 1250 steps",
            ));
        }
        if self.latency > 499 {
            return Err(Error::Config("conn_params.latency must be 0-499"));
        }
        if !(100..=32_000).contains(&self.supervision_timeout_ms)
            || self.supervision_timeout_ms % 10 != 0
        {
            return Err(Error::Config(
                "conn_params.supervision_timeout_ms must be 100-32000 in 10 steps",
            ));
        }
        let min_timeout_us = (1 + u64::from(self.latency)) * u64::from(self.interval_us) * 2;
        if u64::from(self.supervision_timeout_ms) * 1000 <= min_timeout_us {
            return Err(Error::Config(
                "conn_params.supervision_timeout_ms must exceed (1+latency)*interval*2",
            ));
        }
        Ok(())
    }
}

/// Advertising filter policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingFilter {
    /// Scan and connect requests from anyone.
    AllowAll,
    /// Scan and connect requests only from whitelisted peers.
    WhitelistOnly,
}

/// HCI disconnect reasons the core issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    AuthenticationFailure = 0x05,
    RemoteUserTerminated = 0x13,
}

impl DisconnectReason {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

// ───────────────────────────────────────────────────────────────
// Radio port (domain → stack)
// ───────────────────────────────────────────────────────────────

pub trait RadioPort {
    /// Bring up controller + host, set the device name, register services.
    fn init_stack(&self, device_name: &str) -> Result<(), RadioError>;

    fn set_security_policy(&self, policy: SecurityPolicy) -> Result<(), RadioError>;

    /// Takes effect on the next `start_advertising`.
    fn set_advertising_filter(&self, filter: AdvertisingFilter) -> Result<(), RadioError>;

    fn start_advertising(&self) -> Result<(), RadioError>;

    fn stop_advertising(&self) -> Result<(), RadioError>;

    fn update_connection_params(
        &self,
        handle: ConnHandle,
        params: &ConnParams,
    ) -> Result<(), RadioError>;

    /// Request termination.  Completion arrives later as a disconnect event.
    fn disconnect(&self, handle: ConnHandle, reason: DisconnectReason) -> Result<(), RadioError>;

    /// Add a peer to the advisory accept list.
    fn whitelist_add(&self, addr: &BdAddr) -> Result<(), RadioError>;
}

// ───────────────────────────────────────────────────────────────
// Bond store (read-only view over stack-owned bond records)
// ───────────────────────────────────────────────────────────────

pub trait BondStore {
    /// Whether the peer on `handle` holds a persisted bond.
    fn is_bonded(&self, handle: ConnHandle) -> bool;

    /// Identity addresses of every persisted bond.
    fn bonded_peers(&self) -> heapless::Vec<BdAddr, MAX_BONDS>;
}

// ───────────────────────────────────────────────────────────────
// Connection events (stack → domain)
// ───────────────────────────────────────────────────────────────

/// Callbacks the stack delivers on its own task.  None may block.
pub trait ConnectionEvents {
    fn on_connect(&mut self, status: &ConnectionStatus) -> Decision;

    fn on_disconnect(&mut self, handle: ConnHandle, reason: u8);

    fn on_mtu_change(&mut self, handle: ConnHandle, mtu: u16);

    /// Pairing / encryption procedure finished for `status.handle`.
    fn on_security_complete(&mut self, status: &ConnectionStatus) -> Decision;

    /// Passkey to enter.  Unreachable with no IO capability.
    fn on_passkey_request(&mut self, handle: ConnHandle) -> u32;

    /// Numeric comparison confirmation.  Unreachable with no IO capability.
    fn on_confirm_pin(&mut self, handle: ConnHandle, pin: u32) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (domain → logging)
// ───────────────────────────────────────────────────────────────

/// The core emits structured [`AdmissionEvent`](super::events::AdmissionEvent)s
/// through this port.  Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AdmissionEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists [`AdmissionConfig`].
///
/// Implementations MUST validate before persisting.  Invalid values are
/// rejected with [`ConfigError::ValidationFailed`], not clamped.
pub trait ConfigPort {
    /// Returns [`AdmissionConfig::default()`] if nothing is stored.
    fn load(&self) -> Result<AdmissionConfig, ConfigError>;

    fn save(&self, config: &AdmissionConfig) -> Result<(), ConfigError>;
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A field failed range validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::error::Error for ConfigError {}
