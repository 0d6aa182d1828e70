//! BLE Connection Module
//!
//! Owns the lifecycle of the one peripheral connection: discovery, connect,
//! command characteristic selection and teardown.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::{CharacteristicRef, ConnectionState, PeripheralIdentity, Resolution};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::error::{ControlError, ControlResult};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{CharacteristicInfo, Transport};

/// How the command characteristic is looked up after connecting
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Characteristic preferred for command writes
    pub command_char_uuid: Uuid,
    /// Extra characteristic queries while the adapter reports none
    pub service_poll_retries: u32,
    /// Delay between those queries
    pub service_poll_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            command_char_uuid: protocol::COMMAND_CHAR_UUID,
            service_poll_retries: 10,
            service_poll_interval: Duration::from_millis(100),
        }
    }
}

impl ConnectionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let command_char_uuid = match protocol::parse_uuid(&settings.ble_command_char_uuid) {
            Ok(uuid) => uuid,
            Err(e) => {
                warn!("{}; using default command characteristic", e);
                protocol::COMMAND_CHAR_UUID
            }
        };
        Self {
            command_char_uuid,
            service_poll_retries: settings.service_poll_retries,
            service_poll_interval: settings.service_poll_interval(),
        }
    }
}

/// Successful outcome of [`ConnectionManager::connect`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new connection was established by this call
    Connected {
        identity: PeripheralIdentity,
        characteristic: CharacteristicRef,
    },
    /// Nothing to do, a connection was already live
    AlreadyConnected,
}

/// Everything that only exists while connected
struct ActiveLink<C> {
    identity: PeripheralIdentity,
    connection: C,
    characteristic: CharacteristicRef,
}

/// Single-peripheral connection state machine
pub struct ConnectionManager<T: Transport> {
    transport: Arc<T>,
    config: ConnectionConfig,
    state: ConnectionState,
    link: Option<ActiveLink<T::Connection>>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: Arc<T>, config: ConnectionConfig) -> Self {
        Self {
            transport,
            config,
            state: ConnectionState::Disconnected,
            link: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn identity(&self) -> Option<&PeripheralIdentity> {
        self.link.as_ref().map(|link| &link.identity)
    }

    pub fn characteristic(&self) -> Option<CharacteristicRef> {
        self.link.as_ref().map(|link| link.characteristic)
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!("Connection state: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Scan for `target_name` and connect to the first match.
    ///
    /// Returns [`ControlError::DiscoveryTimeout`] when nothing matched; the
    /// transport is not opened in that case.
    pub async fn connect(
        &mut self,
        target_name: &str,
        timeout: Duration,
    ) -> ControlResult<ConnectOutcome> {
        if self.is_connected() {
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        self.transition(ConnectionState::Discovering);
        info!("Scanning for '{}' ({:?})", target_name, timeout);
        let devices = match self.transport.discover(timeout).await {
            Ok(devices) => devices,
            Err(e) => {
                self.transition(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let Some(target) = devices
            .into_iter()
            .find(|d| protocol::name_matches(d.name.as_deref(), target_name))
        else {
            info!("Device '{}' not found", target_name);
            self.transition(ConnectionState::Disconnected);
            return Err(ControlError::DiscoveryTimeout {
                name: target_name.to_string(),
                timeout,
            });
        };

        let identity = PeripheralIdentity {
            name: target.name.unwrap_or_else(|| target_name.to_string()),
            address: target.address,
        };

        self.transition(ConnectionState::Connecting);
        info!("Connecting to {} at {}", identity.name, identity.address);
        let connection = match self.transport.open(&identity.address).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Failed to open {}: {}", identity.address, e);
                self.transition(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        self.transition(ConnectionState::ResolvingCharacteristics);
        let characteristic = match self.resolve_characteristic(&connection).await {
            Ok(characteristic) => characteristic,
            Err(e) => {
                warn!("Connection to {} unusable: {}", identity.name, e);
                if let Err(close_err) = self.transport.close(&connection).await {
                    warn!("Teardown after failed connect also failed: {}", close_err);
                }
                self.transition(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        info!(
            "Connected to {}, command characteristic {} ({:?})",
            identity.name, characteristic.uuid, characteristic.resolution
        );
        self.link = Some(ActiveLink {
            identity: identity.clone(),
            connection,
            characteristic,
        });
        self.transition(ConnectionState::Connected);

        Ok(ConnectOutcome::Connected {
            identity,
            characteristic,
        })
    }

    /// Pick the write target on a fresh connection.
    ///
    /// Never fails on an empty or unhelpful characteristic list; only an
    /// adapter error aborts.
    async fn resolve_characteristic(
        &self,
        connection: &T::Connection,
    ) -> ControlResult<CharacteristicRef> {
        let mut characteristics = self.transport.list_characteristics(connection).await?;
        let mut retries = 0;
        while characteristics.is_empty() && retries < self.config.service_poll_retries {
            tokio::time::sleep(self.config.service_poll_interval).await;
            characteristics = self.transport.list_characteristics(connection).await?;
            retries += 1;
        }

        if characteristics.is_empty() {
            debug!("No characteristics reported after {} retries", retries);
        } else {
            debug!("{} characteristics reported", characteristics.len());
        }

        Ok(select_characteristic(&characteristics, self.config.command_char_uuid))
    }

    /// Tear down the connection if there is one. Always ends Disconnected.
    pub async fn disconnect(&mut self) {
        let Some(link) = self.link.take() else {
            self.transition(ConnectionState::Disconnected);
            return;
        };

        self.transition(ConnectionState::Disconnecting);
        let result = self.transport.close(&link.connection).await;
        self.transition(ConnectionState::Disconnected);

        match result {
            Ok(()) => info!("Disconnected from {}", link.identity.name),
            Err(e) => warn!(
                "Disconnect from {} reported an error (ignored): {}",
                link.identity.name, e
            ),
        }
    }

    /// Write to the resolved characteristic of the live connection.
    ///
    /// A failed write leaves the connection untouched.
    pub async fn write(&self, payload: &[u8], acknowledge: bool) -> ControlResult<()> {
        let link = self.link.as_ref().ok_or(ControlError::NotConnected)?;
        self.transport
            .write(
                &link.connection,
                link.characteristic.uuid,
                payload,
                acknowledge,
            )
            .await
    }
}

/// Exact identifier first, then any writable characteristic, then the
/// identifier anyway.
pub fn select_characteristic(
    characteristics: &[CharacteristicInfo],
    preferred: Uuid,
) -> CharacteristicRef {
    if characteristics.iter().any(|c| c.uuid == preferred) {
        return CharacteristicRef {
            uuid: preferred,
            resolution: Resolution::Exact,
        };
    }

    if let Some(writable) = characteristics.iter().find(|c| c.writable) {
        return CharacteristicRef {
            uuid: writable.uuid,
            resolution: Resolution::WritableFallback,
        };
    }

    warn!(
        "Command characteristic not confirmed, falling back to {}",
        preferred
    );
    CharacteristicRef {
        uuid: preferred,
        resolution: Resolution::AssumedDefault,
    }
}
