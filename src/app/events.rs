//! Outbound admission events.
//!
//! The handler and scheduler emit these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other side
//! decide what to do with them (serial log, test recorder).

use super::connection::{BdAddr, ConnHandle};
use super::mode::Mode;
use crate::error::AdmissionFault;

/// Structured events emitted by the admission core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// Controller finished booting; advertising in `mode`.
    Started { mode: Mode, bonds: usize },

    /// Scheduler decided the next mode.
    PendingChanged { to: Mode },

    /// Scheduler committed a new current mode.
    ModeCommitted { from: Mode, to: Mode },

    /// Time until the pending mode flips.
    WindowRemaining { mode: Mode, remaining_ms: u32 },

    /// A link passed the admission policy.
    Admitted {
        handle: ConnHandle,
        mode: Mode,
        bonded: bool,
    },

    /// A link was disconnected (or an auth request denied) by the core.
    Enforced {
        handle: ConnHandle,
        fault: AdmissionFault,
    },

    /// Encryption established on a link.
    Secured {
        handle: ConnHandle,
        identity: BdAddr,
        key_size: u8,
    },

    /// A link went away.
    Disconnected { handle: ConnHandle, reason: u8 },

    /// ATT MTU renegotiated.
    MtuChanged { handle: ConnHandle, mtu: u16 },
}
