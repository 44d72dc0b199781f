//! Configuration for the rover link.
//!
//! Loaded from a TOML file. Every field has a default, so an empty file or a
//! missing section is valid.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::commands::DriveMapping;
use crate::devices::ports::DEFAULT_VENDOR_IDS;
use crate::devices::DEFAULT_BAUD_RATE;
use crate::errors::ConfigError;

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub robot: RobotConfig,
    pub drive: DriveMapping,
    pub logging: LoggingConfig,
}

/// Serial port selection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port path. Autodetected when absent.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// USB vendor ids preferred during autodetection
    pub vendor_ids: Vec<u16>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            vendor_ids: DEFAULT_VENDOR_IDS.to_vec(),
        }
    }
}

/// Timing and thresholds of the safety coordinator.
///
/// All times are in milliseconds in the file; use the accessor methods
/// to get them as [Duration]s.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Period of the sensor poll loop
    pub poll_interval_ms: u64,
    /// Delay before the first poll, giving the board time to boot after the port opens
    pub poll_start_delay_ms: u64,
    /// Longest wait for a sensor response before the channel is released anyway
    pub sensor_timeout_ms: u64,
    /// Obstacles closer than this trigger the backup reflex
    pub obstacle_threshold_cm: f32,
    /// How long the backup maneuver reverses
    pub backup_duration_ms: u64,
    /// Backup speed as a fraction of full joystick deflection
    pub backup_speed: f64,
    /// Time after an obstacle trigger before the reflex can fire again
    pub obstacle_settle_ms: u64,
    /// Time after a cliff trigger before the reflex can fire again
    pub cliff_settle_ms: u64,
    /// Minimum time between two haptic notifications
    pub rumble_cooldown_ms: u64,
    /// How long the operator's controller should rumble
    pub haptic_duration_ms: u64,
    /// Minimum time between two telemetry notifications
    pub telemetry_interval_ms: u64,
    /// How long the poll loop waits after a failed send before polling again
    pub reconnect_backoff_ms: u64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        RobotConfig {
            poll_interval_ms: 100,
            poll_start_delay_ms: 1000,
            sensor_timeout_ms: 1000,
            obstacle_threshold_cm: 20.0,
            backup_duration_ms: 2000,
            backup_speed: 0.5,
            obstacle_settle_ms: 2500,
            cliff_settle_ms: 500,
            rumble_cooldown_ms: 1000,
            haptic_duration_ms: 1000,
            telemetry_interval_ms: 100,
            reconnect_backoff_ms: 1000,
        }
    }
}

impl RobotConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_start_delay(&self) -> Duration {
        Duration::from_millis(self.poll_start_delay_ms)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    pub fn backup_duration(&self) -> Duration {
        Duration::from_millis(self.backup_duration_ms)
    }

    pub fn obstacle_settle(&self) -> Duration {
        Duration::from_millis(self.obstacle_settle_ms)
    }

    pub fn cliff_settle(&self) -> Duration {
        Duration::from_millis(self.cliff_settle_ms)
    }

    pub fn rumble_cooldown(&self) -> Duration {
        Duration::from_millis(self.rumble_cooldown_ms)
    }

    pub fn haptic_duration(&self) -> Duration {
        Duration::from_millis(self.haptic_duration_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    /// Checks the values that would make the coordinator misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "robot.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.obstacle_settle_ms < self.backup_duration_ms {
            // The reflex would retrigger mid maneuver
            return Err(ConfigError::Invalid(format!(
                "robot.obstacle_settle_ms ({}) must be at least robot.backup_duration_ms ({})",
                self.obstacle_settle_ms, self.backup_duration_ms
            )));
        }
        if !(self.backup_speed > 0.0 && self.backup_speed <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "robot.backup_speed must be in (0, 1], got {}",
                self.backup_speed
            )));
        }
        if !(self.obstacle_threshold_cm.is_finite() && self.obstacle_threshold_cm > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "robot.obstacle_threshold_cm must be positive, got {}",
                self.obstacle_threshold_cm
            )));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.robot.validate()?;

        let deadzone = self.drive.deadzone;
        if !(0.0..1.0).contains(&deadzone) {
            return Err(ConfigError::Invalid(format!(
                "drive.deadzone must be in [0, 1), got {deadzone}"
            )));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid(
                "serial.baud_rate must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
