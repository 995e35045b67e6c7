//! Unified error types for the admission controller firmware.
//!
//! A single `Error` enum that every subsystem can convert into, keeping
//! the boot path's error handling uniform.  All variants are `Copy` so
//! they can be passed through callbacks running on the BLE host task
//! without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The radio/transport stack rejected a request.
    Radio(RadioError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
    /// Peripheral or stack initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Radio(e) => write!(f, "radio: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Radio errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// A request was issued before `init_stack` completed.
    NotInitialised,
    /// The vendor stack returned a non-OK status code.
    Stack(i32),
    /// The connection handle is not known to the stack.
    UnknownConnection,
    /// The controller's filter accept list has no free slot.
    WhitelistFull,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialised => write!(f, "stack not initialised"),
            Self::Stack(code) => write!(f, "stack error {code}"),
            Self::UnknownConnection => write!(f, "unknown connection"),
            Self::WhitelistFull => write!(f, "whitelist full"),
        }
    }
}

impl From<RadioError> for Error {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

// ---------------------------------------------------------------------------
// Per-connection admission faults
// ---------------------------------------------------------------------------

/// Faults are never fatal.  Each one is answered by disconnecting the
/// single offending connection (or, for interactive auth, a deny reply)
/// and is reported through the event sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionFault {
    /// Peer is not bonded and the window is closed.
    PolicyRejection,
    /// Security negotiation finished without an encrypted link.
    EncryptionFailure,
    /// Passkey / numeric-comparison callback fired although the device
    /// advertises no input/output capability.
    UnexpectedInteractiveAuth,
    /// The connection table is full.
    CapacityExceeded,
}

impl fmt::Display for AdmissionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PolicyRejection => write!(f, "peer not bonded while window closed"),
            Self::EncryptionFailure => write!(f, "link not encrypted after security procedure"),
            Self::UnexpectedInteractiveAuth => write!(f, "unexpected interactive pairing request"),
            Self::CapacityExceeded => write!(f, "connection table full"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
