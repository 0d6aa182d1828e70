//! Transport Adapter
//!
//! The capability set the connection manager needs from a radio stack.
//! [`BtleplugTransport`](super::btleplug_transport::BtleplugTransport) is the
//! production implementation.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::infrastructure::bluetooth::error::ControlResult;

/// A peripheral seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: Option<String>,
    pub address: String,
}

/// A characteristic exposed by a connected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    /// Supports write or write-without-response
    pub writable: bool,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opaque per-connection token.
    type Connection: Send + Sync + 'static;

    /// Scan for `timeout` and report every peripheral seen.
    async fn discover(&self, timeout: Duration) -> ControlResult<Vec<DiscoveredDevice>>;

    async fn open(&self, address: &str) -> ControlResult<Self::Connection>;

    async fn close(&self, connection: &Self::Connection) -> ControlResult<()>;

    /// May return an empty list while service discovery is still running;
    /// callers poll. An error means the connection itself is unusable.
    async fn list_characteristics(
        &self,
        connection: &Self::Connection,
    ) -> ControlResult<Vec<CharacteristicInfo>>;

    /// Implementations must bound the write with their own timeout.
    async fn write(
        &self,
        connection: &Self::Connection,
        characteristic: Uuid,
        payload: &[u8],
        acknowledge: bool,
    ) -> ControlResult<()>;
}
