//! Pure encoding and decoding of protocol packets. No I/O and no state.

use super::{
    checksum, Opcode, LCD_LINE_LEN, LCD_PACKET_LEN, MOTOR_PACKET_LEN, SENSOR_PACKET_LEN,
    SENSOR_START_BYTE,
};
use crate::commands::{Command, LcdCommand, MotorCommand};
use crate::errors::DecodeError;
use crate::sensors::{SensorFrame, SensorPacket};

/// Encodes a command into its wire packet.
///
/// Encoding never fails: motor speeds and LCD lines were already clamped
/// and truncated when the command was built.
pub fn encode(command: &Command) -> Vec<u8> {
    // Create the packet with the opcode
    let mut packet = Vec::with_capacity(LCD_PACKET_LEN);

    match command {
        Command::Motor(m) => {
            packet.push(Opcode::Motor as u8);
            packet.extend_from_slice(&m.left().to_le_bytes());
            packet.extend_from_slice(&m.right().to_le_bytes());
        }
        Command::Lcd(l) => {
            packet.push(Opcode::Lcd as u8);
            packet.extend_from_slice(&lcd_line(l.line1()));
            packet.extend_from_slice(&lcd_line(l.line2()));
        }
        Command::SensorRequest => packet.push(Opcode::SensorRequest as u8),
        Command::Stop => packet.push(Opcode::Stop as u8),
    }

    // The checksum covers the payload only, not the opcode
    let sum = checksum(&packet[1..]);
    packet.push(sum);

    packet
}

/// Renders a line as exactly 16 bytes, space padded.
/// Characters the LCD cannot show become '?'.
fn lcd_line(line: &str) -> [u8; LCD_LINE_LEN] {
    let mut out = [b' '; LCD_LINE_LEN];
    for (slot, c) in out.iter_mut().zip(line.chars()) {
        *slot = if c.is_ascii() && !c.is_ascii_control() {
            c as u8
        } else {
            b'?'
        };
    }
    out
}

/// Decodes a sensor packet into a [SensorFrame].
pub fn decode(bytes: &[u8]) -> Result<SensorFrame, DecodeError> {
    SensorPacket::decode(bytes).map(SensorFrame::from)
}

/// Checks the start byte and checksum of a candidate sensor packet
/// without decoding any fields.
pub fn verify_sensor_packet(bytes: &[u8]) -> Result<(), DecodeError> {
    if bytes.len() != SENSOR_PACKET_LEN {
        return Err(DecodeError::InvalidLength {
            expected: SENSOR_PACKET_LEN,
            actual: bytes.len(),
        });
    }

    if bytes[0] != SENSOR_START_BYTE {
        return Err(DecodeError::InvalidStartByte(bytes[0]));
    }

    // Sum of everything between the start byte and the checksum
    let expected = checksum(&bytes[1..SENSOR_PACKET_LEN - 1]);
    let actual = bytes[SENSOR_PACKET_LEN - 1];
    if expected != actual {
        return Err(DecodeError::ChecksumMismatch { expected, actual });
    }

    Ok(())
}

impl SensorPacket {
    /// Decodes the 24 byte device to host packet.
    pub fn decode(bytes: &[u8]) -> Result<SensorPacket, DecodeError> {
        verify_sensor_packet(bytes)?;

        let f32_at =
            |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let i16_at = |i: usize| i16::from_le_bytes([bytes[i], bytes[i + 1]]);

        Ok(SensorPacket {
            distance: f32_at(1),
            accel: [i16_at(5), i16_at(7), i16_at(9)],
            gyro: [i16_at(11), i16_at(13), i16_at(15)],
            temperature: f32_at(17),
            ir_flags: bytes[21],
            battery: bytes[22],
        })
    }

    /// Encodes the packet the way the device sends it.
    pub fn encode(&self) -> [u8; SENSOR_PACKET_LEN] {
        let mut packet = [0u8; SENSOR_PACKET_LEN];
        packet[0] = SENSOR_START_BYTE;
        packet[1..5].copy_from_slice(&self.distance.to_le_bytes());
        for (i, v) in self.accel.iter().chain(self.gyro.iter()).enumerate() {
            let at = 5 + 2 * i;
            packet[at..at + 2].copy_from_slice(&v.to_le_bytes());
        }
        packet[17..21].copy_from_slice(&self.temperature.to_le_bytes());
        packet[21] = self.ir_flags;
        packet[22] = self.battery;
        packet[23] = checksum(&packet[1..23]);
        packet
    }
}

/// Decodes one host to device packet from the front of `bytes`.
///
/// Returns the command and the number of bytes it occupied. This is the
/// device side of [encode], used to check what actually went out on the wire.
pub fn decode_command(bytes: &[u8]) -> Result<(Command, usize), DecodeError> {
    let opcode = Opcode::try_from(*bytes.first().ok_or(DecodeError::InvalidLength {
        expected: 2,
        actual: 0,
    })?)?;

    let len = opcode.packet_len();
    if bytes.len() < len {
        return Err(DecodeError::InvalidLength {
            expected: len,
            actual: bytes.len(),
        });
    }

    let payload = &bytes[1..len - 1];
    let expected = checksum(payload);
    let actual = bytes[len - 1];
    if expected != actual {
        return Err(DecodeError::ChecksumMismatch { expected, actual });
    }

    let command = match opcode {
        Opcode::Motor => {
            debug_assert_eq!(len, MOTOR_PACKET_LEN);
            let left = i16::from_le_bytes([payload[0], payload[1]]);
            let right = i16::from_le_bytes([payload[2], payload[3]]);
            Command::Motor(MotorCommand::new(left as i32, right as i32))
        }
        Opcode::Lcd => {
            let line1 = String::from_utf8_lossy(&payload[..LCD_LINE_LEN]);
            let line2 = String::from_utf8_lossy(&payload[LCD_LINE_LEN..]);
            Command::Lcd(LcdCommand::new(line1.trim_end(), line2.trim_end()))
        }
        Opcode::SensorRequest => Command::SensorRequest,
        Opcode::Stop => Command::Stop,
    };

    Ok((command, len))
}
