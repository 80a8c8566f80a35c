use crate::domain::command::Command;
use std::fmt;

/// Events sent from the Bluetooth thread to the UI
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    SessionState(SessionState),
    /// Latest telemetry text, replaces whatever was shown before
    Telemetry(String),
    /// Caption of the start/stop control after a toggle
    StartStopLabel(&'static str),
    LogMessage(StatusMessage),
    DeviceFound(ScannedDevice),
}

/// Requests sent from the UI to the Bluetooth thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BluetoothCommand {
    StartScan,
    StopScan,
    Connect(String),
    Press(Command),
    Release,
    /// Navigation away from the control screen, tears the session down
    Leave,
}

/// Why a session dropped back to a disconnected state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFault {
    /// The transport reported a disconnect (or a failed connect)
    LinkLost,
    /// Consecutive write failures reached the threshold
    WriteSaturated,
    DiscoveryFailed(String),
    ServiceMissing,
    CharacteristicMissing,
}

impl SessionFault {
    /// Transport-level faults are retried, protocol mismatches are not
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LinkLost | Self::WriteSaturated)
    }
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkLost => write!(f, "link lost"),
            Self::WriteSaturated => write!(f, "too many failed writes"),
            Self::DiscoveryFailed(reason) => write!(f, "service discovery failed: {}", reason),
            Self::ServiceMissing => write!(f, "control service not found"),
            Self::CharacteristicMissing => write!(f, "control characteristic not found"),
        }
    }
}

/// Lifecycle of a control session
///
/// `Reconnecting` and `Failed` are both disconnected states: the first has a
/// retry scheduled, the second waits for a fresh connect request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    ServicesDiscovering,
    Ready,
    Reconnecting(SessionFault),
    Failed(SessionFault),
}

impl SessionState {
    pub fn is_disconnected(&self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::Reconnecting(_) | Self::Failed(_)
        )
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    pub name: String,
    pub address: String,
    pub signal_strength: Option<i16>,
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
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
