use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

/// Lifecycle of the single peripheral connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Discovering,
    Connecting,
    ResolvingCharacteristics,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Discovering => "discovering",
            Self::Connecting => "connecting",
            Self::ResolvingCharacteristics => "resolving characteristics",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(label)
    }
}

/// Name and transport address of the peripheral bound to a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralIdentity {
    pub name: String,
    pub address: String,
}

/// How the write target of a connection was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The well-known command characteristic was advertised by the peripheral.
    Exact,
    /// The well-known characteristic was missing; the first writable one was used.
    WritableFallback,
    /// Nothing usable was reported; the well-known identifier is used blindly.
    AssumedDefault,
}

/// Resolved write target for the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicRef {
    pub uuid: Uuid,
    pub resolution: Resolution,
}

impl CharacteristicRef {
    pub fn is_confirmed(&self) -> bool {
        self.resolution != Resolution::AssumedDefault
    }
}

/// Motion commands understood by the robot sketch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionCommand {
    Forward,
    Back,
    Left,
    Right,
    Switch,
}

impl MotionCommand {
    pub const ALL: [MotionCommand; 5] = [
        Self::Forward,
        Self::Back,
        Self::Left,
        Self::Right,
        Self::Switch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Back => "back",
            Self::Left => "left",
            Self::Right => "right",
            Self::Switch => "switch",
        }
    }

    /// Wire payload: the command name as UTF-8, no terminator.
    pub fn payload(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MotionCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| s.to_string())
    }
}

/// A single outbound write. Created per user action and dropped after the attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub payload: Vec<u8>,
    /// Wait for the peripheral to confirm the write (write-with-response).
    pub acknowledge: bool,
}

impl Command {
    pub fn new(payload: impl Into<Vec<u8>>, acknowledge: bool) -> Self {
        Self {
            payload: payload.into(),
            acknowledge,
        }
    }

    pub fn motion(command: MotionCommand, acknowledge: bool) -> Self {
        Self::new(command.payload(), acknowledge)
    }

    /// Payload rendered for status text.
    pub fn describe(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message, MessageSeverity::Info)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(message, MessageSeverity::Success)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(message, MessageSeverity::Warning)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, MessageSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_command_payloads() {
        for cmd in MotionCommand::ALL {
            assert_eq!(cmd.payload(), cmd.as_str().as_bytes());
        }
        assert_eq!(MotionCommand::Forward.payload(), b"forward");
    }

    #[test]
    fn test_motion_command_parsing() {
        assert_eq!("forward".parse::<MotionCommand>(), Ok(MotionCommand::Forward));
        assert_eq!(" Switch ".parse::<MotionCommand>(), Ok(MotionCommand::Switch));
        assert_eq!("jump".parse::<MotionCommand>(), Err("jump".to_string()));
    }

    #[test]
    fn test_command_describe() {
        let cmd = Command::motion(MotionCommand::Left, true);
        assert!(cmd.acknowledge);
        assert_eq!(cmd.describe(), "left");
    }
}
