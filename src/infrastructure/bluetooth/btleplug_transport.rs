//! btleplug Transport
//!
//! Cross-platform [`Transport`] over the `btleplug` central API.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::error::{ControlError, ControlResult};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    CharacteristicInfo, DiscoveredDevice, Transport,
};

/// Timeouts the adapter enforces on its own operations
#[derive(Debug, Clone)]
pub struct BtleplugConfig {
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    /// Service recorded on the characteristic when writing to an identifier
    /// the peripheral never reported
    pub service_uuid: Uuid,
}

impl Default for BtleplugConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            service_uuid: protocol::SERVICE_UUID,
        }
    }
}

impl BtleplugConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            write_timeout: settings.write_timeout(),
            service_uuid: protocol::parse_uuid(&settings.ble_service_uuid)
                .unwrap_or(protocol::SERVICE_UUID),
        }
    }
}

pub struct BtleplugTransport {
    config: BtleplugConfig,
    adapter: Mutex<Option<Adapter>>,
    // Peripherals from the most recent scan, keyed by address string
    seen: Mutex<HashMap<String, Peripheral>>,
}

impl BtleplugTransport {
    pub fn new(config: BtleplugConfig) -> Self {
        Self {
            config,
            adapter: Mutex::new(None),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Lazily bind the first adapter the platform reports.
    async fn adapter(&self) -> ControlResult<Adapter> {
        let mut slot = self.adapter.lock().await;
        if let Some(adapter) = slot.as_ref() {
            return Ok(adapter.clone());
        }

        let manager = Manager::new().await.map_err(|e| {
            ControlError::AdapterUnavailable(format!("Failed to create BLE manager: {}", e))
        })?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| {
                ControlError::AdapterUnavailable(format!("Failed to get BLE adapters: {}", e))
            })?
            .into_iter()
            .next()
            .ok_or_else(|| ControlError::AdapterUnavailable("No BLE adapters available".into()))?;

        info!("BLE adapter initialized");
        *slot = Some(adapter.clone());
        Ok(adapter)
    }

    fn to_info(characteristic: &Characteristic) -> CharacteristicInfo {
        CharacteristicInfo {
            uuid: characteristic.uuid,
            writable: characteristic.properties.contains(CharPropFlags::WRITE)
                || characteristic
                    .properties
                    .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        }
    }
}

fn write_type_for(acknowledge: bool) -> WriteType {
    if acknowledge {
        WriteType::WithResponse
    } else {
        WriteType::WithoutResponse
    }
}

/// Run `connect` under `limit`. On failure or timeout the platform may still
/// bring the link up later, so `abandon` is issued before returning the error.
async fn connect_or_abandon<C, A, D, E1, E2>(
    limit: Duration,
    connect: C,
    abandon: A,
) -> ControlResult<()>
where
    C: Future<Output = Result<(), E1>>,
    A: FnOnce() -> D,
    D: Future<Output = Result<(), E2>>,
    E1: fmt::Display,
    E2: fmt::Display,
{
    let error = match timeout(limit, connect).await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => ControlError::Transport(format!("Connection failed: {}", e)),
        Err(_) => ControlError::Transport("Connection timeout".into()),
    };

    match timeout(limit, abandon()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Teardown after failed connect failed: {}", e),
        Err(_) => warn!("Teardown after failed connect timed out"),
    }
    Err(error)
}

#[async_trait]
impl Transport for BtleplugTransport {
    type Connection = Peripheral;

    async fn discover(&self, scan_for: Duration) -> ControlResult<Vec<DiscoveredDevice>> {
        let adapter = self.adapter().await?;

        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ControlError::Transport(format!("Failed to start BLE scan: {}", e)))?;
        debug!("Scanning for {:?}", scan_for);
        tokio::time::sleep(scan_for).await;
        if let Err(e) = adapter.stop_scan().await {
            warn!("Failed to stop BLE scan: {}", e);
        }

        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| ControlError::Transport(format!("Failed to list peripherals: {}", e)))?;

        let mut seen = self.seen.lock().await;
        seen.clear();
        let mut devices = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            let name = match peripheral.properties().await {
                Ok(Some(properties)) => properties.local_name,
                Ok(None) => None,
                Err(e) => {
                    debug!("Skipping peripheral without properties: {}", e);
                    continue;
                }
            };
            let address = peripheral.id().to_string();
            devices.push(DiscoveredDevice {
                name,
                address: address.clone(),
            });
            seen.insert(address, peripheral);
        }

        debug!("Scan finished, {} peripherals seen", devices.len());
        Ok(devices)
    }

    async fn open(&self, address: &str) -> ControlResult<Peripheral> {
        let peripheral = self
            .seen
            .lock()
            .await
            .get(address)
            .cloned()
            .ok_or_else(|| ControlError::Transport(format!("Peripheral {} not scanned", address)))?;

        connect_or_abandon(
            self.config.connect_timeout,
            peripheral.connect(),
            || peripheral.disconnect(),
        )
        .await?;

        // Populates characteristics(); a failure here shows up as an empty list later
        if let Err(e) = peripheral.discover_services().await {
            warn!("Service discovery for {} failed: {}", address, e);
        }

        Ok(peripheral)
    }

    async fn close(&self, connection: &Peripheral) -> ControlResult<()> {
        connection
            .disconnect()
            .await
            .map_err(|e| ControlError::Transport(format!("Failed to disconnect: {}", e)))
    }

    async fn list_characteristics(
        &self,
        connection: &Peripheral,
    ) -> ControlResult<Vec<CharacteristicInfo>> {
        let is_connected = connection
            .is_connected()
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))?;
        if !is_connected {
            return Err(ControlError::Transport("Peripheral disconnected".into()));
        }

        let mut characteristics = connection.characteristics();
        if characteristics.is_empty() {
            if let Err(e) = connection.discover_services().await {
                debug!("Service discovery not ready: {}", e);
            }
            characteristics = connection.characteristics();
        }

        Ok(characteristics.iter().map(Self::to_info).collect())
    }

    async fn write(
        &self,
        connection: &Peripheral,
        characteristic: Uuid,
        payload: &[u8],
        acknowledge: bool,
    ) -> ControlResult<()> {
        let target = connection
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .unwrap_or_else(|| Characteristic {
                uuid: characteristic,
                service_uuid: self.config.service_uuid,
                properties: CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE,
                descriptors: BTreeSet::new(),
            });

        let write_type = write_type_for(acknowledge);

        match timeout(
            self.config.write_timeout,
            connection.write(&target, payload, write_type),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ControlError::WriteFailed(e.to_string())),
            Err(_) => Err(ControlError::WriteFailed("Write timed out".into())),
        }
    }
}
