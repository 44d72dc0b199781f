//! The binary serial protocol spoken with the microcontroller.
//!
//! Host to device packets are `[opcode][payload][checksum]`. Device to host
//! packets are fixed length sensor reports starting with [SENSOR_START_BYTE].
//! All multi-byte fields are little endian.

pub mod codec;
pub mod reader;

pub use codec::{decode, decode_command, encode};
pub use reader::FrameReader;

/// Opcodes for every host to device packet.
///
/// # Variants
///
/// * [Opcode::Motor] - Sets both wheel speeds
/// * [Opcode::Lcd] - Writes two lines to the 16x2 LCD
/// * [Opcode::SensorRequest] - Asks the device for one sensor packet
/// * [Opcode::Stop] - Stops both motors
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Motor = 0x01,
    Lcd = 0x02,
    SensorRequest = 0x03,
    Stop = 0x04,
}

impl Opcode {
    /// The total length on the wire of a packet with this opcode,
    /// including the opcode and checksum bytes.
    pub fn packet_len(self) -> usize {
        match self {
            Opcode::Motor => MOTOR_PACKET_LEN,
            Opcode::Lcd => LCD_PACKET_LEN,
            Opcode::SensorRequest | Opcode::Stop => 2,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = crate::errors::DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Opcode::Motor),
            0x02 => Ok(Opcode::Lcd),
            0x03 => Ok(Opcode::SensorRequest),
            0x04 => Ok(Opcode::Stop),
            other => Err(crate::errors::DecodeError::UnknownOpcode(other)),
        }
    }
}

/// Every sensor packet begins with this marker byte.
pub const SENSOR_START_BYTE: u8 = 0xAA;

/// Total length of a sensor packet:
/// start, f32 distance, six i16 IMU axes, f32 temperature, IR flags, battery, checksum.
pub const SENSOR_PACKET_LEN: usize = 24;

/// Total length of a motor packet: opcode, two i16 speeds, checksum.
pub const MOTOR_PACKET_LEN: usize = 6;

/// Characters per LCD line. Lines are space padded to exactly this width.
pub const LCD_LINE_LEN: usize = 16;

/// Total length of an LCD packet: opcode, two 16 byte lines, checksum.
pub const LCD_PACKET_LEN: usize = 2 + 2 * LCD_LINE_LEN;

/// The largest magnitude a wheel speed can take. Sign is direction.
pub const MAX_MOTOR_SPEED: i16 = 255;

/// The 8 bit additive checksum used in both directions.
///
/// Callers pass only the bytes that are summed, which excludes the
/// start/opcode byte and the checksum byte itself.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}
