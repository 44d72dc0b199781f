//! Timed command sequences, as produced by the natural language planner.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Command, LcdCommand, MotorCommand};
use crate::errors::SequenceError;

/// The command kinds a planner may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandType {
    Motor,
    Lcd,
    Sensor,
    Stop,
}

/// One step of a sequence: a command and how long to hold it.
///
/// # Members
///
/// * `id` - Identifier reported back in active command updates
/// * `command` - The command to send
/// * `duration` - How long to hold the command before the next step
/// * `pause_duration` - Motor steps only: after the hold, send a stop and wait this long
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StepWire", into = "StepWire")]
pub struct SequenceStep {
    pub id: String,
    pub command: Command,
    pub duration: Duration,
    pub pause_duration: Duration,
}

impl SequenceStep {
    pub fn new(command: Command, duration: Duration) -> Self {
        SequenceStep {
            id: String::new(),
            command,
            duration,
            pause_duration: Duration::ZERO,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause_duration = pause;
        self
    }

    pub fn command_type(&self) -> CommandType {
        match self.command {
            Command::Motor(_) => CommandType::Motor,
            Command::Lcd(_) => CommandType::Lcd,
            Command::SensorRequest => CommandType::Sensor,
            Command::Stop => CommandType::Stop,
        }
    }

    /// True when this step is followed by a stop and a pause.
    pub fn pauses_after(&self) -> bool {
        self.command.is_motor() && !self.pause_duration.is_zero()
    }
}

/// The JSON shape of a step, matching what the planner service emits.
#[derive(Clone, Serialize, Deserialize)]
struct StepWire {
    #[serde(rename = "ID", default)]
    id: String,
    command_type: CommandType,
    #[serde(default)]
    command: Option<PayloadWire>,
    /// Seconds
    #[serde(default)]
    duration: f64,
    /// Seconds
    #[serde(default)]
    pause_duration: f64,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum PayloadWire {
    Motor(MotorCommand),
    Lcd(LcdCommand),
}

impl TryFrom<StepWire> for SequenceStep {
    type Error = String;

    fn try_from(w: StepWire) -> Result<Self, Self::Error> {
        let command = match (w.command_type, w.command) {
            (CommandType::Motor, Some(PayloadWire::Motor(m))) => Command::Motor(m),
            (CommandType::Motor, _) => {
                return Err("MOTOR step needs left_motor and right_motor".to_string())
            }
            (CommandType::Lcd, Some(PayloadWire::Lcd(l))) => Command::Lcd(l),
            (CommandType::Lcd, _) => return Err("LCD step needs line_1 and line_2".to_string()),
            (CommandType::Sensor, _) => Command::SensorRequest,
            (CommandType::Stop, _) => Command::Stop,
        };

        Ok(SequenceStep {
            id: w.id,
            command,
            duration: seconds(w.duration, "duration")?,
            pause_duration: seconds(w.pause_duration, "pause_duration")?,
        })
    }
}

impl From<SequenceStep> for StepWire {
    fn from(step: SequenceStep) -> Self {
        let command_type = step.command_type();
        let command = match step.command {
            Command::Motor(m) => Some(PayloadWire::Motor(m)),
            Command::Lcd(l) => Some(PayloadWire::Lcd(l)),
            Command::SensorRequest | Command::Stop => None,
        };
        StepWire {
            id: step.id,
            command_type,
            command,
            duration: step.duration.as_secs_f64(),
            pause_duration: step.pause_duration.as_secs_f64(),
        }
    }
}

fn seconds(value: f64, field: &str) -> Result<Duration, String> {
    Duration::try_from_secs_f64(value).map_err(|e| format!("invalid {field} {value}: {e}"))
}

/// An ordered list of steps to play back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSequence {
    pub commands: Vec<SequenceStep>,
}

impl CommandSequence {
    pub fn new(commands: Vec<SequenceStep>) -> Self {
        CommandSequence { commands }
    }

    /// Parses either `{"commands": [...]}` or a bare array of steps.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Either {
            Wrapped(CommandSequence),
            Bare(Vec<SequenceStep>),
        }

        Ok(match serde_json::from_str::<Either>(text)? {
            Either::Wrapped(seq) => seq,
            Either::Bare(commands) => CommandSequence { commands },
        })
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

/// Turns an operator's free text query into a command sequence.
///
/// The translation itself lives outside this crate.
pub trait CommandPlanner: Send + Sync {
    fn plan(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<CommandSequence, SequenceError>> + Send;
}

/// A planner for queries that already are a JSON command sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPlanner;

impl CommandPlanner for JsonPlanner {
    fn plan(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<CommandSequence, SequenceError>> + Send {
        let planned =
            CommandSequence::from_json(query).map_err(|e| SequenceError::Planner(e.to_string()));
        async move { planned }
    }
}
