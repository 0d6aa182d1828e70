//! Ardubot Protocol
//!
//! Identity constants for the robot's BLE sketch. These are defaults only;
//! deployments override them through [`Settings`](crate::domain::settings::Settings).

use crate::infrastructure::bluetooth::error::{ControlError, ControlResult};
use uuid::Uuid;

/// Advertised local name of the robot
pub const DEVICE_NAME: &str = "ardubotr4";

/// Robot control service UUID
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x19b10000_e8f2_537e_4f6c_d104768a1214);

/// Command characteristic UUID - where motion commands are written
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x19b10001_e8f2_537e_4f6c_d104768a1214);

/// Parse a UUID string from configuration (hyphenated or simple form)
pub fn parse_uuid(uuid_str: &str) -> ControlResult<Uuid> {
    Uuid::parse_str(uuid_str.trim())
        .map_err(|e| ControlError::Transport(format!("Invalid UUID '{}': {}", uuid_str, e)))
}

/// True when a peripheral's advertised name matches the configured target.
///
/// Exact match, ignoring case; unnamed peripherals never match.
pub fn name_matches(advertised: Option<&str>, target: &str) -> bool {
    advertised.is_some_and(|name| name.to_lowercase() == target.to_lowercase())
}
