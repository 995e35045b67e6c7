//! Admission mode and the shared mode state.
//!
//! ```text
//!              window elapsed / open_window()
//!   ┌────────────────────┐ ──────────────▶ ┌────────┐
//!   │ RestrictedToBonded │                 │  Open  │
//!   └────────────────────┘ ◀────────────── └────────┘
//!              window elapsed / close_window()
//! ```
//!
//! [`ModeState`] holds two values: the *current* mode that admission
//! decisions read, and the *pending* mode the scheduler will commit at the
//! next tick.  Only the scheduler's commit step writes `current`; anyone
//! may request a pending mode.  Both are plain atomics so the BLE host
//! task can read the mode without taking a lock.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Connection admission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Mode {
    /// Pairing window open: any peer may connect and bond.
    Open = 0,
    /// Only peers that already hold a bond are admitted.
    RestrictedToBonded = 1,
}

impl Mode {
    /// The other mode.
    pub const fn opposite(self) -> Self {
        match self {
            Self::Open => Self::RestrictedToBonded,
            Self::RestrictedToBonded => Self::Open,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        // Anything unexpected reads as restricted (fail closed).
        match raw {
            0 => Self::Open,
            _ => Self::RestrictedToBonded,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::RestrictedToBonded => write!(f, "bonded-only"),
        }
    }
}

/// Process-wide mode value, shared by handle (`Arc<ModeState>`) between the
/// scheduler and the connection handler.
#[derive(Debug)]
pub struct ModeState {
    current: AtomicU8,
    pending: AtomicU8,
}

impl ModeState {
    /// Both `current` and `pending` start at `initial`.
    pub const fn new(initial: Mode) -> Self {
        Self {
            current: AtomicU8::new(initial as u8),
            pending: AtomicU8::new(initial as u8),
        }
    }

    /// Mode that admission decisions use right now.
    pub fn current(&self) -> Mode {
        Mode::from_u8(self.current.load(Ordering::Acquire))
    }

    /// Mode the scheduler will commit at its next tick.
    pub fn pending(&self) -> Mode {
        Mode::from_u8(self.pending.load(Ordering::Acquire))
    }

    /// `true` when a commit is outstanding.
    pub fn is_transition_pending(&self) -> bool {
        self.current() != self.pending()
    }

    /// Ask for `mode` to become current at the next scheduler tick.
    pub fn request(&self, mode: Mode) {
        self.pending.store(mode as u8, Ordering::Release);
    }

    /// Make `mode` current.  Callers must have stopped advertising first;
    /// only the scheduler's commit step calls this.
    pub(crate) fn commit(&self, mode: Mode) {
        self.current.store(mode as u8, Ordering::Release);
    }
}
