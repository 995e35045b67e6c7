//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements             | Connects to                |
//! |------------|------------------------|----------------------------|
//! | `ble`      | RadioPort, BondStore   | Bluedroid GAP/GATT server  |
//! | `log_sink` | EventSink              | Serial log output          |
//! | `nvs`      | ConfigPort             | NVS / in-memory store      |

pub mod ble;
pub mod log_sink;
pub mod nvs;
