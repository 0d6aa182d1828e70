//! Bluetooth Module
//!
//! Drives the robot's command characteristic over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │   (UI-facing API: request_connect / request_send / poll) │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ ExecutionBridge (ble-worker thread)
//!                       ▼
//!              ┌─────────────────┐
//!              │ CommandChannel  │  one operation at a time
//!              └────────┬────────┘
//!                       ▼
//!              ┌─────────────────┐
//!              │ConnectionManager│  discover → open → resolve
//!              └────────┬────────┘
//!                       ▼
//!              ┌─────────────────┐
//!              │   Transport     │  btleplug / mock
//!              └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Robot identity constants and name matching
//! - [`transport`] - Radio capability trait
//! - [`btleplug_transport`] - Production transport
//! - [`connection`] - Connection state machine and characteristic resolution
//! - [`channel`] - Serialized command writes with connect-on-demand
//! - [`service`] - Main service coordinator

pub mod btleplug_transport;
pub mod channel;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

// Re-export main service for convenience
pub use btleplug_transport::BtleplugTransport;
pub use error::ControlError;
pub use service::BluetoothService;
