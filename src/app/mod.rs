//! Application core: admission logic, zero I/O.
//!
//! This module contains the rules for who may connect and when: the
//! mode state, the admission policy, the enforcement strategies, and the
//! connection lifecycle handler.  All interaction with the BLE stack
//! happens through **port traits** defined in [`ports`], keeping this
//! layer fully testable without a radio.

pub mod connection;
pub mod controller;
pub mod events;
pub mod handler;
pub mod mode;
pub mod policy;
pub mod ports;
pub mod strategy;
