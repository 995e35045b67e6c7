//! Admission policy: a pure function of mode and bond status.

use super::mode::Mode;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn is_accept(self) -> bool {
        self == Self::Accept
    }
}

/// Accept iff the window is open or the peer already holds a bond.
pub fn decide(mode: Mode, bonded: bool) -> Decision {
    if mode == Mode::Open || bonded {
        Decision::Accept
    } else {
        Decision::Reject
    }
}
