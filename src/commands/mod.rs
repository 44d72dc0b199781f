// Module that contains every command that can be sent to the robot

mod sequence;
pub use sequence::{CommandPlanner, CommandSequence, CommandType, JsonPlanner, SequenceStep};

use serde::{Deserialize, Serialize};

use crate::protocol::{LCD_LINE_LEN, MAX_MOTOR_SPEED};

/// A single host to device command.
///
/// Every variant maps to exactly one packet shape, see [crate::protocol::encode].
/// Commands are built once, never mutated, and consumed by one send.
///
/// # Variants
///
/// * [Command::Motor] - Sets the left and right wheel speeds
/// * [Command::Lcd] - Shows two lines of text on the LCD
/// * [Command::SensorRequest] - Requests one sensor packet
/// * [Command::Stop] - Stops both motors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Motor(MotorCommand),
    Lcd(LcdCommand),
    SensorRequest,
    Stop,
}

impl Command {
    /// Builds a motor command, clamping both speeds to [-255, 255].
    pub fn motor(left: i32, right: i32) -> Self {
        Command::Motor(MotorCommand::new(left, right))
    }

    /// Builds an LCD command, truncating each line to 16 characters.
    pub fn lcd(line1: &str, line2: &str) -> Self {
        Command::Lcd(LcdCommand::new(line1, line2))
    }

    pub fn stop() -> Self {
        Command::Stop
    }

    /// Maps joystick axes to a differential drive motor command.
    ///
    /// See [DriveMapping::motor_for] for the mapping.
    pub fn from_joystick(forward: f64, turn: f64, mapping: &DriveMapping) -> Self {
        Command::Motor(mapping.motor_for(forward, turn))
    }

    /// Returns true for commands that move the wheels.
    pub fn is_motor(&self) -> bool {
        matches!(self, Command::Motor(_))
    }

    /// A short lowercase name for logs and events.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Motor(_) => "motor",
            Command::Lcd(_) => "lcd",
            Command::SensorRequest => "sensor_request",
            Command::Stop => "stop",
        }
    }
}

/// Wheel speeds for both motors.
///
/// The sign is the direction and the magnitude is the PWM duty.
/// Both values are always within [-255, 255].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "MotorWire", into = "MotorWire")]
pub struct MotorCommand {
    left: i16,
    right: i16,
}

impl MotorCommand {
    pub fn new(left: i32, right: i32) -> Self {
        MotorCommand {
            left: clamp_speed(left),
            right: clamp_speed(right),
        }
    }

    pub fn left(&self) -> i16 {
        self.left
    }

    pub fn right(&self) -> i16 {
        self.right
    }
}

/// Field names used by the planner and operator JSON.
#[derive(Serialize, Deserialize)]
struct MotorWire {
    left_motor: i32,
    right_motor: i32,
}

impl From<MotorWire> for MotorCommand {
    fn from(w: MotorWire) -> Self {
        MotorCommand::new(w.left_motor, w.right_motor)
    }
}

impl From<MotorCommand> for MotorWire {
    fn from(m: MotorCommand) -> Self {
        MotorWire {
            left_motor: m.left as i32,
            right_motor: m.right as i32,
        }
    }
}

fn clamp_speed(speed: i32) -> i16 {
    speed.clamp(-(MAX_MOTOR_SPEED as i32), MAX_MOTOR_SPEED as i32) as i16
}

/// Two lines of LCD text, each at most 16 characters.
///
/// Padding to exactly 16 characters happens at encode time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LcdWire", into = "LcdWire")]
pub struct LcdCommand {
    line1: String,
    line2: String,
}

impl LcdCommand {
    pub fn new(line1: &str, line2: &str) -> Self {
        LcdCommand {
            line1: line1.chars().take(LCD_LINE_LEN).collect(),
            line2: line2.chars().take(LCD_LINE_LEN).collect(),
        }
    }

    pub fn line1(&self) -> &str {
        &self.line1
    }

    pub fn line2(&self) -> &str {
        &self.line2
    }
}

#[derive(Serialize, Deserialize)]
struct LcdWire {
    #[serde(default)]
    line_1: String,
    #[serde(default)]
    line_2: String,
}

impl From<LcdWire> for LcdCommand {
    fn from(w: LcdWire) -> Self {
        LcdCommand::new(&w.line_1, &w.line_2)
    }
}

impl From<LcdCommand> for LcdWire {
    fn from(l: LcdCommand) -> Self {
        LcdWire {
            line_1: l.line1,
            line_2: l.line2,
        }
    }
}

/// Joystick to differential drive mapping.
///
/// Each axis below `deadzone` in magnitude is treated as zero. The remaining
/// values are mapped linearly:
/// `left = scale * (forward - turn)`, `right = scale * (forward + turn)`,
/// rounded and clamped to [-255, 255].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveMapping {
    pub deadzone: f64,
    pub scale: f64,
}

impl Default for DriveMapping {
    fn default() -> Self {
        DriveMapping {
            deadzone: 0.1,
            scale: MAX_MOTOR_SPEED as f64,
        }
    }
}

impl DriveMapping {
    pub fn motor_for(&self, forward: f64, turn: f64) -> MotorCommand {
        let forward = self.apply_deadzone(forward);
        let turn = self.apply_deadzone(turn);

        let left = (self.scale * (forward - turn)).round();
        let right = (self.scale * (forward + turn)).round();

        // f64 -> i32 saturates, clamping to the motor range happens in new()
        MotorCommand::new(left as i32, right as i32)
    }

    fn apply_deadzone(&self, value: f64) -> f64 {
        if !value.is_finite() || value.abs() < self.deadzone {
            0.0
        } else {
            value
        }
    }
}
