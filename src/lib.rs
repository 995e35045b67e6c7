//! Bondgate firmware library.
//!
//! Time-windowed BLE connection admission: the device alternates between
//! accepting any central and accepting only bonded ones.  The pure logic
//! is exposed for integration testing; ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod error;
pub mod scheduler;
mod time_driver;
