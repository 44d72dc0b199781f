//! Notifications the coordinator sends up to whoever serves the operator.

use std::time::Duration;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::commands::SequenceStep;
use crate::sensors::{ImuReading, SensorFrame};

/// Rumble intensities for the operator's controller, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HapticFeedback {
    pub low: f32,
    pub high: f32,
    /// Milliseconds
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl HapticFeedback {
    /// The closer the obstacle, the stronger the high frequency motor.
    pub fn for_obstacle(distance_cm: f32, threshold_cm: f32, duration: Duration) -> Self {
        let ratio = distance_cm / threshold_cm;
        let low = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
        HapticFeedback {
            low,
            high: 1.0 - low,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn for_cliff(duration: Duration) -> Self {
        HapticFeedback {
            low: 0.5,
            high: 0.5,
            duration_ms: duration.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UltrasonicReading {
    /// Centimeters, with sentinels already resolved
    pub distance: f32,
}

/// One sensor frame as reported to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorTelemetry {
    pub ultrasonic: UltrasonicReading,
    pub imu: ImuReading,
    pub ir_front: bool,
    pub ir_back: bool,
    pub battery: u8,
}

impl SensorTelemetry {
    pub fn new(frame: &SensorFrame, distance_cm: f32) -> Self {
        SensorTelemetry {
            ultrasonic: UltrasonicReading {
                distance: distance_cm,
            },
            imu: frame.imu,
            ir_front: frame.ir_front,
            ir_back: frame.ir_back,
            battery: frame.battery,
        }
    }
}

/// Progress of a command sequence.
///
/// Serializes as the step itself while it runs, `{"ID": ""}` once the
/// sequence is done, and `{"ID": "", "error": ...}` when it failed.
#[derive(Debug, Clone, PartialEq)]
pub enum ActiveCommand {
    Step(SequenceStep),
    Cleared,
    Failed(String),
}

impl Serialize for ActiveCommand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ActiveCommand::Step(step) => step.serialize(serializer),
            ActiveCommand::Cleared => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("ID", "")?;
                map.end()
            }
            ActiveCommand::Failed(error) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("ID", "")?;
                map.serialize_entry("error", error)?;
                map.end()
            }
        }
    }
}

/// Everything the coordinator reports upward.
///
/// Serializes as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RobotEvent {
    SensorData(SensorTelemetry),
    Rumble(HapticFeedback),
    ActiveCommand(ActiveCommand),
}

impl RobotEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RobotEvent::SensorData(_) => "sensor_data",
            RobotEvent::Rumble(_) => "rumble",
            RobotEvent::ActiveCommand(_) => "active_command",
        }
    }
}

/// Where the coordinator delivers its notifications.
///
/// Called from the packet handling path, so implementations must not block.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, event: RobotEvent);
}

/// Forwards events into a bounded tokio channel.
/// Events are dropped, with a warning, when the receiver falls behind.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<RobotEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RobotEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ChannelSink { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, event: RobotEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(event = event.name(), "event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed");
            }
        }
    }
}

/// Logs every event and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, event: RobotEvent) {
        match &event {
            // Telemetry is too chatty for info
            RobotEvent::SensorData(t) => debug!(?t, "sensor data"),
            RobotEvent::Rumble(h) => info!(low = h.low, high = h.high, "rumble"),
            RobotEvent::ActiveCommand(a) => info!(?a, "active command"),
        }
    }
}
