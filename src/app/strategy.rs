//! Device-list enforcement strategies.
//!
//! Two ways to keep unbonded peers out while the window is closed:
//!
//! | Strategy            | Advertising filter (restricted) | After connect      |
//! |---------------------|---------------------------------|--------------------|
//! | `PostConnectCheck`  | accept all                      | [`decide`] + kick  |
//! | `DeclarativeFilter` | whitelist only                  | trust the radio    |
//!
//! `PostConnectCheck` is the default.  The radio-level filter proved
//! unreliable with peers that rotate their private address, so the
//! declarative variant is kept only for targets where it was validated.

use serde::{Deserialize, Serialize};

use super::mode::Mode;
use super::policy::{Decision, decide};
use super::ports::AdvertisingFilter;

/// Configuration-time selector for an [`EnforcementStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    PostConnectCheck,
    DeclarativeFilter,
}

/// How an admission mode is enforced on the radio.
///
/// A strategy picks the advertising filter applied at each commit and the
/// decision for peers that got through it.  Implementations are stateless
/// statics chosen once at boot through [`select`].
pub trait EnforcementStrategy: Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Filter the radio should apply while advertising in `mode`.
    fn advertising_filter(&self, mode: Mode) -> AdvertisingFilter;

    /// Decision for a peer that has already connected.
    fn admit(&self, mode: Mode, bonded: bool) -> Decision;
}

/// Advertise to everyone; enforce with [`decide`] once connected.
pub struct PostConnectCheck;

impl EnforcementStrategy for PostConnectCheck {
    fn name(&self) -> &'static str {
        "post-connect-check"
    }

    fn advertising_filter(&self, _mode: Mode) -> AdvertisingFilter {
        AdvertisingFilter::AllowAll
    }

    fn admit(&self, mode: Mode, bonded: bool) -> Decision {
        decide(mode, bonded)
    }
}

/// Let the controller's accept list drop unknown peers before they connect.
pub struct DeclarativeFilter;

impl EnforcementStrategy for DeclarativeFilter {
    fn name(&self) -> &'static str {
        "declarative-filter"
    }

    fn advertising_filter(&self, mode: Mode) -> AdvertisingFilter {
        match mode {
            Mode::Open => AdvertisingFilter::AllowAll,
            Mode::RestrictedToBonded => AdvertisingFilter::WhitelistOnly,
        }
    }

    fn admit(&self, _mode: Mode, _bonded: bool) -> Decision {
        Decision::Accept
    }
}

static POST_CONNECT_CHECK: PostConnectCheck = PostConnectCheck;
static DECLARATIVE_FILTER: DeclarativeFilter = DeclarativeFilter;

/// Resolve a configured kind to its strategy.
pub fn select(kind: StrategyKind) -> &'static dyn EnforcementStrategy {
    match kind {
        StrategyKind::PostConnectCheck => &POST_CONNECT_CHECK,
        StrategyKind::DeclarativeFilter => &DECLARATIVE_FILTER,
    }
}
