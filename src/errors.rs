use thiserror::Error;

/// Errors produced while decoding packets off the wire.
///
/// None of these are fatal. The coordinator treats every one of them as
/// "no new data this cycle".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid start byte {0:#04x}, expected 0xaa")]
    InvalidStartByte(u8),
    #[error("checksum mismatch: computed {expected:#04x}, packet carries {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },
    #[error("packet length {actual}, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no serial port found, is the robot connected?")]
    NoPortFound,
    #[error("IO Error")]
    IoError(#[from] std::io::Error),
    #[error("Serialport Error")]
    SerialportError(#[from] serialport::Error),
    #[error("the serial connection was lost")]
    ConnectionLost,
}

/// Errors that end a command sequence early.
///
/// The trailing stop is still sent whichever of these occurs.
#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("failed to send sequence step: {0}")]
    Send(#[from] DeviceError),
    #[error("sequence step was preempted by a stop")]
    Preempted,
    #[error("sequence was cancelled")]
    Cancelled,
    #[error("could not plan a sequence: {0}")]
    Planner(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
