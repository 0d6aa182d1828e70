//! Error types for the peripheral control core

use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong between a button press and a GATT write.
///
/// All variants are recoverable: the next user action may simply try again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("No device named '{name}' found within {timeout:?}")]
    DiscoveryTimeout { name: String, timeout: Duration },

    #[error("BLE adapter not available: {0}")]
    AdapterUnavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Device not connected")]
    NotConnected,

    #[error("Failed to write to characteristic: {0}")]
    WriteFailed(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Background operation failed: {message}")]
    BackgroundFault { message: String, backtrace: String },

    #[error("Background worker is not running")]
    BridgeClosed,
}

pub type ControlResult<T> = Result<T, ControlError>;
