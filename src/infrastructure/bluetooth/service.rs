//! Bluetooth Service Module
//!
//! Foreground facade over the command channel. Button handlers call the
//! `request_*` methods, which never block; the UI calls [`BluetoothService::poll`]
//! once per frame to receive status updates on its own thread.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::models::{Command, ConnectionState, MotionCommand, StatusMessage};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::channel::{CommandChannel, TargetConfig};
use crate::infrastructure::bluetooth::connection::{ConnectOutcome, ConnectionConfig};
use crate::infrastructure::bluetooth::error::{ControlError, ControlResult};
use crate::infrastructure::bluetooth::transport::Transport;
use crate::infrastructure::bridge::ExecutionBridge;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ServiceEvent {
    Connection(ConnectionState),
    Status(StatusMessage),
}

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService<T: Transport> {
    bridge: ExecutionBridge,
    channel: Arc<CommandChannel<T>>,
    event_sender: mpsc::UnboundedSender<ServiceEvent>,
    event_receiver: mpsc::UnboundedReceiver<ServiceEvent>,
    acknowledge_writes: bool,
    shutdown_timeout: Duration,
    connection_state: ConnectionState,
}

impl<T: Transport> BluetoothService<T> {
    /// Start the background worker and wire the channel to `transport`
    pub fn new(transport: Arc<T>, settings: &Settings) -> std::io::Result<Self> {
        let channel = CommandChannel::new(
            transport,
            TargetConfig::from_settings(settings),
            ConnectionConfig::from_settings(settings),
        );
        let (event_sender, event_receiver) = mpsc::unbounded_channel();

        Ok(Self {
            bridge: ExecutionBridge::start()?,
            channel: Arc::new(channel),
            event_sender,
            event_receiver,
            acknowledge_writes: settings.require_response_on_write,
            shutdown_timeout: settings.shutdown_timeout(),
            connection_state: ConnectionState::Disconnected,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.channel.target().device_name
    }

    /// Last connection state reported back to the UI
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn request_connect(&self) {
        let channel = self.channel.clone();
        let sender = self.event_sender.clone();
        let name = self.device_name().to_string();

        let progress = self.event_sender.clone();
        let scanning = format!("Scanning for {}...", name);
        self.bridge
            .submit(async move {
                channel
                    .connect_reporting(move || {
                        let _ =
                            progress.send(ServiceEvent::Connection(ConnectionState::Discovering));
                        let _ = progress.send(ServiceEvent::Status(StatusMessage::info(scanning)));
                    })
                    .await
            })
            .on_complete(move |outcome| {
                for event in connect_events(&name, outcome) {
                    let _ = sender.send(event);
                }
            });
    }

    pub fn request_disconnect(&self) {
        let channel = self.channel.clone();
        let sender = self.event_sender.clone();

        self.bridge
            .submit(async move {
                channel.disconnect().await;
                Ok(())
            })
            .on_complete(move |outcome: ControlResult<()>| {
                let events = match outcome {
                    Ok(()) => vec![
                        ServiceEvent::Connection(ConnectionState::Disconnected),
                        ServiceEvent::Status(StatusMessage::info("Disconnected")),
                    ],
                    Err(e) => vec![failure_status(&e)],
                };
                for event in events {
                    let _ = sender.send(event);
                }
            });
    }

    /// Send one of the named motion commands, connecting first if needed.
    pub fn request_send(&self, command_name: &str) {
        let motion: MotionCommand = match command_name.parse() {
            Ok(motion) => motion,
            Err(unknown) => {
                let e = ControlError::UnknownCommand(unknown);
                warn!("{}", e);
                let _ = self
                    .event_sender
                    .send(ServiceEvent::Status(StatusMessage::error(e.to_string())));
                return;
            }
        };

        let command = Command::motion(motion, self.acknowledge_writes);
        let channel = self.channel.clone();
        let sender = self.event_sender.clone();
        let name = self.device_name().to_string();

        self.bridge
            .submit(async move {
                let receipt = channel.send(&command).await?;
                Ok((receipt, command))
            })
            .on_complete(move |outcome| {
                let events = match outcome {
                    Ok((receipt, command)) => {
                        let mut events = match receipt.connected {
                            Some(connected) => connect_events(&name, Ok(connected)),
                            None => Vec::new(),
                        };
                        events.push(ServiceEvent::Status(StatusMessage::success(format!(
                            "Sent: {}",
                            command.describe()
                        ))));
                        events
                    }
                    Err(ControlError::NotConnected) => vec![
                        ServiceEvent::Connection(ConnectionState::Disconnected),
                        ServiceEvent::Status(StatusMessage::error(format!(
                            "Device '{}' not found",
                            name
                        ))),
                    ],
                    Err(e @ ControlError::AdapterUnavailable(_)) => {
                        vec![ServiceEvent::Status(StatusMessage::error(format!(
                            "Connection error: {}",
                            e
                        )))]
                    }
                    Err(e @ ControlError::BackgroundFault { .. }) => vec![failure_status(&e)],
                    Err(e) => vec![ServiceEvent::Status(StatusMessage::error(format!(
                        "Send failed: {}",
                        e
                    )))],
                };
                for event in events {
                    let _ = sender.send(event);
                }
            });
    }

    /// Deliver pending results. Calls `on_status_changed` once per status
    /// update, in order, on the calling thread. Returns how many were delivered.
    pub fn poll(&mut self, mut on_status_changed: impl FnMut(&StatusMessage)) -> usize {
        self.bridge.dispatch_completions();

        let mut delivered = 0;
        while let Ok(event) = self.event_receiver.try_recv() {
            match event {
                ServiceEvent::Connection(state) => self.connection_state = state,
                ServiceEvent::Status(status) => {
                    on_status_changed(&status);
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Best-effort disconnect, then stop the worker. Each step waits at most
    /// the configured shutdown timeout.
    pub fn shutdown(&mut self) -> bool {
        let channel = self.channel.clone();
        let disconnect = self.bridge.submit(async move {
            channel.disconnect().await;
            Ok(())
        });

        match disconnect.wait(self.shutdown_timeout) {
            Some(Ok(())) => info!("Disconnected before shutdown"),
            Some(Err(e)) => warn!("Disconnect during shutdown failed: {}", e),
            None => warn!(
                "Disconnect did not finish within {:?}, shutting down anyway",
                self.shutdown_timeout
            ),
        }

        self.connection_state = ConnectionState::Disconnected;
        self.bridge.shutdown(self.shutdown_timeout)
    }
}

fn failure_status(error: &ControlError) -> ServiceEvent {
    let message = match error {
        ControlError::BackgroundFault { message, .. } => format!("Internal error: {}", message),
        other => format!("Error: {}", other),
    };
    ServiceEvent::Status(StatusMessage::error(message))
}

fn connect_events(name: &str, outcome: ControlResult<ConnectOutcome>) -> Vec<ServiceEvent> {
    match outcome {
        Ok(ConnectOutcome::AlreadyConnected) => vec![
            ServiceEvent::Connection(ConnectionState::Connected),
            ServiceEvent::Status(StatusMessage::success(format!("Connected to {}", name))),
        ],
        Ok(ConnectOutcome::Connected { characteristic, .. }) => {
            let status = if characteristic.is_confirmed() {
                StatusMessage::success(format!("Connected to {}", name))
            } else {
                StatusMessage::warning(format!(
                    "Connected to {}, but no writable characteristic was reported; using {}",
                    name, characteristic.uuid
                ))
            };
            vec![
                ServiceEvent::Connection(ConnectionState::Connected),
                ServiceEvent::Status(status),
            ]
        }
        Err(ControlError::DiscoveryTimeout { .. }) => vec![
            ServiceEvent::Connection(ConnectionState::Disconnected),
            ServiceEvent::Status(StatusMessage::error(format!(
                "Device '{}' not found",
                name
            ))),
        ],
        Err(e @ ControlError::BackgroundFault { .. }) => vec![
            ServiceEvent::Connection(ConnectionState::Disconnected),
            failure_status(&e),
        ],
        Err(e) => vec![
            ServiceEvent::Connection(ConnectionState::Disconnected),
            ServiceEvent::Status(StatusMessage::error(format!("Connection error: {}", e))),
        ],
    }
}
