//! Command Channel
//!
//! The single serialization point for everything that touches the radio.
//! Connect, disconnect and send each hold the lock for their whole sequence,
//! so a second command issued while one is in flight waits its turn.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::models::{Command, ConnectionState, PeripheralIdentity};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::connection::{
    ConnectOutcome, ConnectionConfig, ConnectionManager,
};
use crate::infrastructure::bluetooth::error::{ControlError, ControlResult};
use crate::infrastructure::bluetooth::transport::Transport;

/// Peripheral the channel connects to on demand
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub device_name: String,
    pub scan_timeout: Duration,
}

impl TargetConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            device_name: settings.device_name.clone(),
            scan_timeout: settings.scan_timeout(),
        }
    }
}

/// What a successful [`CommandChannel::send`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Set when this send had to establish the connection first
    pub connected: Option<ConnectOutcome>,
    pub bytes_written: usize,
}

pub struct CommandChannel<T: Transport> {
    manager: Mutex<ConnectionManager<T>>,
    target: TargetConfig,
}

impl<T: Transport> CommandChannel<T> {
    pub fn new(transport: Arc<T>, target: TargetConfig, config: ConnectionConfig) -> Self {
        Self {
            manager: Mutex::new(ConnectionManager::new(transport, config)),
            target,
        }
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    pub async fn connect(&self) -> ControlResult<ConnectOutcome> {
        self.connect_reporting(|| {}).await
    }

    /// Connect, calling `on_scan` only when the lock is held and a scan is
    /// about to start.
    pub async fn connect_reporting(
        &self,
        on_scan: impl FnOnce() + Send,
    ) -> ControlResult<ConnectOutcome> {
        let mut manager = self.manager.lock().await;
        if !manager.is_connected() {
            on_scan();
        }
        manager
            .connect(&self.target.device_name, self.target.scan_timeout)
            .await
    }

    pub async fn disconnect(&self) {
        self.manager.lock().await.disconnect().await;
    }

    pub async fn state(&self) -> ConnectionState {
        self.manager.lock().await.state()
    }

    pub async fn identity(&self) -> Option<PeripheralIdentity> {
        self.manager.lock().await.identity().cloned()
    }

    /// Write one command, connecting first if needed.
    ///
    /// Connection failures surface as [`ControlError::NotConnected`] (or
    /// [`ControlError::AdapterUnavailable`]) and no write is attempted. Failed
    /// writes are not retried.
    pub async fn send(&self, command: &Command) -> ControlResult<SendReceipt> {
        let mut manager = self.manager.lock().await;

        let connected = if manager.is_connected() {
            None
        } else {
            debug!("Not connected, connecting before send");
            match manager
                .connect(&self.target.device_name, self.target.scan_timeout)
                .await
            {
                Ok(outcome) => Some(outcome),
                Err(e @ ControlError::AdapterUnavailable(_)) => return Err(e),
                Err(e) => {
                    warn!("Connect before send failed: {}", e);
                    return Err(ControlError::NotConnected);
                }
            }
        };

        manager.write(&command.payload, command.acknowledge).await?;
        debug!("Wrote {} bytes", command.payload.len());

        Ok(SendReceipt {
            connected,
            bytes_written: command.payload.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::MotionCommand;
    use crate::infrastructure::bluetooth::mock::MockTransport;
    use crate::infrastructure::bluetooth::protocol;
    use crate::infrastructure::bluetooth::transport::CharacteristicInfo;

    fn channel(mock: &Arc<MockTransport>) -> Arc<CommandChannel<MockTransport>> {
        let target = TargetConfig {
            device_name: "ardubotr4".to_string(),
            scan_timeout: Duration::from_secs(5),
        };
        let config = ConnectionConfig {
            service_poll_interval: Duration::from_millis(5),
            ..ConnectionConfig::default()
        };
        Arc::new(CommandChannel::new(mock.clone(), target, config))
    }

    fn robot() -> Arc<MockTransport> {
        MockTransport::with_device(
            "ardubotr4",
            vec![CharacteristicInfo {
                uuid: protocol::COMMAND_CHAR_UUID,
                writable: true,
            }],
        )
        .into_arc()
    }

    #[tokio::test]
    async fn test_send_connects_on_demand() {
        let mock = robot();
        let channel = channel(&mock);

        let receipt = channel
            .send(&Command::motion(MotionCommand::Forward, true))
            .await
            .unwrap();
        assert!(matches!(
            receipt.connected,
            Some(ConnectOutcome::Connected { .. })
        ));
        assert_eq!(receipt.bytes_written, 7);

        let writes = mock.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].payload, b"forward");
        assert!(writes[0].acknowledge);
        assert_eq!(writes[0].characteristic, protocol::COMMAND_CHAR_UUID);

        let receipt = channel
            .send(&Command::motion(MotionCommand::Back, false))
            .await
            .unwrap();
        assert_eq!(receipt.connected, None);
        assert_eq!(mock.discover_calls(), 1);
        assert!(!mock.writes()[1].acknowledge);
    }

    #[tokio::test]
    async fn test_concurrent_sends_share_one_connect() {
        let mock = robot();
        mock.set_open_delay(Duration::from_millis(30));
        mock.set_write_delay(Duration::from_millis(10));
        let channel = channel(&mock);

        let a = tokio::spawn({
            let channel = channel.clone();
            async move { channel.send(&Command::motion(MotionCommand::Left, true)).await }
        });
        let b = tokio::spawn({
            let channel = channel.clone();
            async move { channel.send(&Command::motion(MotionCommand::Right, true)).await }
        });

        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        // Exactly one of them performed the connect
        assert_eq!(
            [a.connected.is_some(), b.connected.is_some()]
                .iter()
                .filter(|c| **c)
                .count(),
            1
        );
        assert_eq!(mock.discover_calls(), 1);
        assert_eq!(mock.open_calls(), 1);
        assert_eq!(mock.writes().len(), 2);
        assert_eq!(mock.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_send_without_peripheral_fails_not_connected() {
        let mock = MockTransport::new().into_arc();
        let channel = channel(&mock);

        let err = channel
            .send(&Command::motion(MotionCommand::Forward, true))
            .await
            .unwrap_err();
        assert_eq!(err, ControlError::NotConnected);
        assert!(mock.writes().is_empty());
        assert_eq!(channel.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_adapter_unavailable_passes_through() {
        let mock = MockTransport::new().into_arc();
        mock.fail_discover(ControlError::AdapterUnavailable("No BLE adapters available".into()));
        let channel = channel(&mock);

        let err = channel
            .send(&Command::motion(MotionCommand::Switch, true))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::AdapterUnavailable(_)));
    }

    #[tokio::test]
    async fn test_write_failure_keeps_connection() {
        let mock = robot();
        let channel = channel(&mock);
        channel.connect().await.unwrap();

        mock.fail_next_writes(1);
        let err = channel
            .send(&Command::motion(MotionCommand::Forward, true))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::WriteFailed(_)));
        assert_eq!(channel.state().await, ConnectionState::Connected);

        let receipt = channel
            .send(&Command::motion(MotionCommand::Forward, true))
            .await
            .unwrap();
        assert_eq!(receipt.connected, None);
        assert_eq!(mock.discover_calls(), 1);
        assert_eq!(mock.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_then_send_reconnects() {
        let mock = robot();
        let channel = channel(&mock);
        channel.connect().await.unwrap();
        assert_eq!(channel.identity().await.unwrap().name, "ardubotr4");

        channel.disconnect().await;
        channel.disconnect().await;
        assert_eq!(channel.identity().await, None);

        channel
            .send(&Command::motion(MotionCommand::Back, true))
            .await
            .unwrap();
        assert_eq!(mock.open_calls(), 2);
        assert_eq!(mock.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_scan_reported_only_when_disconnected() {
        let mock = robot();
        let channel = channel(&mock);

        let mut scans = 0;
        channel.connect_reporting(|| scans += 1).await.unwrap();
        let outcome = channel.connect_reporting(|| scans += 1).await.unwrap();

        assert_eq!(outcome, ConnectOutcome::AlreadyConnected);
        assert_eq!(scans, 1);
        assert_eq!(mock.discover_calls(), 1);
    }
}
