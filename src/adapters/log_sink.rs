//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing admission events to the ESP-IDF
//! logger (UART / USB-CDC in production).  One line per event, prefixed
//! by subsystem so a serial capture can be grepped.

use log::{debug, info, warn};

use crate::app::events::AdmissionEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AdmissionEvent`] to the serial console.
///
/// The countdown diagnostic fires every tick; it is logged at `debug`
/// except on whole-ten-second marks so the console stays readable.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AdmissionEvent) {
        match event {
            AdmissionEvent::Started { mode, bonds } => {
                info!("START | mode={} | bonds={}", mode, bonds);
            }
            AdmissionEvent::PendingChanged { to } => {
                info!("MODE  | pending -> {}", to);
            }
            AdmissionEvent::ModeCommitted { from, to } => {
                info!("MODE  | {} -> {}", from, to);
            }
            AdmissionEvent::WindowRemaining { mode, remaining_ms } => {
                if remaining_ms % 10_000 == 0 {
                    info!("MODE  | {} | {}s left", mode, remaining_ms / 1000);
                } else {
                    debug!("MODE  | {} | {}ms left", mode, remaining_ms);
                }
            }
            AdmissionEvent::Admitted {
                handle,
                mode,
                bonded,
            } => {
                info!("ADMIT | {} | mode={} bonded={}", handle, mode, bonded);
            }
            AdmissionEvent::Enforced { handle, fault } => {
                warn!("REJECT| {} | {}", handle, fault);
            }
            AdmissionEvent::Secured {
                handle,
                identity,
                key_size,
            } => {
                info!("SECURE| {} | id={} key={}", handle, identity, key_size);
            }
            AdmissionEvent::Disconnected { handle, reason } => {
                info!("LINK  | {} down, reason=0x{:02x}", handle, reason);
            }
            AdmissionEvent::MtuChanged { handle, mtu } => {
                info!("LINK  | {} mtu={}", handle, mtu);
            }
        }
    }
}
