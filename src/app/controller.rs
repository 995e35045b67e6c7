//! Admission controller: boot sequence and wiring.
//!
//! [`AdmissionController`] owns the shared [`ModeState`] and the radio
//! handle.  It hands the connection handler a read-only view of the mode
//! and gives the scheduler the only commit path.
//!
//! ```text
//!                 ┌──────────────────────┐
//!                 │ AdmissionController  │
//!                 │  config · ModeState  │
//!                 └─────┬──────────┬─────┘
//!        handler()      │          │      scheduler()
//!   ┌───────────────────▼─┐      ┌─▼─────────────────────┐
//!   │ ConnectionHandler   │      │ ModeToggleScheduler   │
//!   │ (BLE host task)     │      │ (mode-toggle thread)  │
//!   └─────────────────────┘      └───────────────────────┘
//! ```

use std::sync::Arc;

use log::info;

use super::events::AdmissionEvent;
use super::handler::ConnectionHandler;
use super::mode::{Mode, ModeState};
use super::ports::{BondStore, EventSink, RadioPort};
use super::strategy;
use crate::config::AdmissionConfig;
use crate::error::Result;
use crate::scheduler::ModeToggleScheduler;

/// Owns the validated configuration and the shared mode, boots the stack,
/// and hands out the scheduler and connection handler wired to the same
/// mode and radio.
pub struct AdmissionController<R> {
    config: AdmissionConfig,
    mode: Arc<ModeState>,
    radio: Arc<R>,
}

impl<R> AdmissionController<R>
where
    R: RadioPort + BondStore,
{
    /// Validates `config`; the stack is not touched until [`boot`](Self::boot).
    pub fn new(config: AdmissionConfig, radio: Arc<R>) -> Result<Self> {
        config.validate()?;
        let mode = Arc::new(ModeState::new(config.initial_mode));
        Ok(Self {
            config,
            mode,
            radio,
        })
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode.current()
    }

    pub fn mode_state(&self) -> Arc<ModeState> {
        self.mode.clone()
    }

    /// Bring up the stack and start advertising in the initial mode.
    pub fn boot(&self, sink: &mut impl EventSink) -> Result<()> {
        self.radio.init_stack(&self.config.device_name)?;
        self.radio.set_security_policy(self.config.security)?;

        let bonds = self.radio.bonded_peers();
        info!("Bonded devices:");
        for (i, addr) in bonds.iter().enumerate() {
            info!("{}.: {}", i, addr);
        }

        let mode = self.mode.current();
        let filter = strategy::select(self.config.strategy).advertising_filter(mode);
        self.radio.set_advertising_filter(filter)?;
        self.radio.start_advertising()?;

        info!(
            "Admission: advertising as '{}' in {} mode",
            self.config.device_name, mode
        );
        sink.emit(&AdmissionEvent::Started {
            mode,
            bonds: bonds.len(),
        });
        Ok(())
    }

    pub fn handler<S: EventSink>(&self, sink: S) -> ConnectionHandler<R, S> {
        ConnectionHandler::new(self.mode.clone(), self.radio.clone(), &self.config, sink)
    }

    pub fn scheduler<S: EventSink>(&self, sink: S) -> ModeToggleScheduler<R, S> {
        ModeToggleScheduler::new(self.mode.clone(), self.radio.clone(), &self.config, sink)
    }

    /// Request the pairing window; committed at the next scheduler tick.
    pub fn open_window(&self) {
        info!("Admission: pairing window requested");
        self.mode.request(Mode::Open);
    }

    /// Request bonded-only mode; committed at the next scheduler tick.
    pub fn close_window(&self) {
        info!("Admission: bonded-only mode requested");
        self.mode.request(Mode::RestrictedToBonded);
    }
}
