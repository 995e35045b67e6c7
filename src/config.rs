//! System configuration parameters
//!
//! All tunable parameters for the admission controller.
//! Values can be overridden via NVS (non-volatile storage).

use serde::{Deserialize, Serialize};

use crate::app::mode::Mode;
use crate::app::ports::{ConnParams, SecurityPolicy};
use crate::app::strategy::StrategyKind;
use crate::error::{Error, Result};

/// Maximum advertised device name length (fits a legacy ADV payload).
pub const MAX_DEVICE_NAME_LEN: usize = 24;

/// Which peer address gets registered in the advisory whitelist once a
/// link is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentitySource {
    /// Resolved identity address (constant across reconnects).
    Stable,
    /// Address seen on the air for this connection (may rotate).
    OnAir,
}

/// Core admission configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    // --- Identity ---
    /// Name used for advertising and GAP device name
    pub device_name: heapless::String<MAX_DEVICE_NAME_LEN>,

    // --- Mode window ---
    /// Mode committed at boot (fail-closed by default)
    pub initial_mode: Mode,
    /// Scheduler tick interval (milliseconds)
    pub tick_interval_ms: u32,
    /// Time each mode stays committed before the pending mode flips (milliseconds)
    pub window_length_ms: u32,

    // --- Enforcement ---
    /// Where device-list enforcement happens
    pub strategy: StrategyKind,
    /// Security manager settings pushed to the stack at boot
    pub security: SecurityPolicy,
    /// Connection parameters requested right after connect
    pub conn_params: ConnParams,

    // --- Advisory whitelist ---
    /// Register the peer in the radio whitelist after encryption succeeds
    pub whitelist_on_encrypt: bool,
    /// Which address to register
    pub whitelist_identity: IdentitySource,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let mut device_name = heapless::String::new();
        let _ = device_name.push_str("bondgate");

        Self {
            device_name,

            // Mode window
            initial_mode: Mode::RestrictedToBonded,
            tick_interval_ms: 1000,   // 1 Hz
            window_length_ms: 30_000, // 30 s

            // Enforcement
            strategy: StrategyKind::PostConnectCheck,
            security: SecurityPolicy::default(),
            conn_params: ConnParams::default(),

            // Advisory whitelist
            whitelist_on_encrypt: true,
            whitelist_identity: IdentitySource::Stable,
        }
    }
}

impl AdmissionConfig {
    /// Range-check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty()
            || !self.device_name.bytes().all(|b| (0x20..=0x7E).contains(&b))
        {
            return Err(Error::Config(
                "device_name must be 1-24 printable ASCII bytes",
            ));
        }
        if !(10..=60_000).contains(&self.tick_interval_ms) {
            return Err(Error::Config("tick_interval_ms must be 10-60000"));
        }
        if self.window_length_ms < self.tick_interval_ms {
            return Err(Error::Config(
                "window_length_ms must be >= tick_interval_ms",
            ));
        }
        self.conn_params.validate()
    }
}
