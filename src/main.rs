//! Bondgate Firmware: Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │   BleRadio              LogEventSink        NvsConfigStore     │
//! │   (Radio + BondStore)   (EventSink)         (ConfigPort)       │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │          AdmissionController (pure logic)              │    │
//! │  │  ModeState · policy · ConnectionHandler                │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  ModeToggleScheduler (mode-toggle thread, 1 s tick)            │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use log::{info, warn};

use bondgate::adapters::ble::{self, BleRadio};
use bondgate::adapters::log_sink::LogEventSink;
use bondgate::adapters::nvs::NvsConfigStore;
use bondgate::app::controller::AdmissionController;
use bondgate::app::ports::ConfigPort;
use bondgate::config::AdmissionConfig;
use bondgate::scheduler::{self, StopSignal};

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Bondgate v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let config = match NvsConfigStore::new() {
        Ok(nvs) => match nvs.load() {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("NVS config load failed ({}), using defaults", e);
                AdmissionConfig::default()
            }
        },
        Err(e) => {
            warn!("NVS init failed ({}), running with defaults", e);
            AdmissionConfig::default()
        }
    };
    let json = serde_json::to_string(&config).map_err(|e| anyhow!("config encode: {e}"))?;
    info!("Config: {}", json);

    // ── 3. Controller + connection events ─────────────────────
    let radio = Arc::new(BleRadio::new());
    let controller = AdmissionController::new(config, radio)?;

    // Registered before the stack is up so the first connect is seen.
    ble::register_events(controller.handler(LogEventSink::new()));
    controller.boot(&mut LogEventSink::new())?;

    // ── 4. Mode toggle loop ───────────────────────────────────
    let stop = Arc::new(StopSignal::new());
    let handle = scheduler::spawn(controller.scheduler(LogEventSink::new()), stop)?;

    if handle.join().is_err() {
        bail!("mode-toggle thread panicked");
    }
    bail!("mode-toggle thread exited")
}
