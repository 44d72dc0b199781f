//! Splits the raw byte stream from the device into sensor packets.

use tracing::warn;

use super::codec::verify_sensor_packet;
use super::{SENSOR_PACKET_LEN, SENSOR_START_BYTE};
use crate::errors::DecodeError;

/// Accumulates raw serial bytes and hands out aligned, full length packets.
///
/// The reader resynchronizes on [SENSOR_START_BYTE] after any corruption.
/// It never blocks and never hands out a partial packet.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
    discarded: u64,
}

impl FrameReader {
    pub fn new() -> Self {
        FrameReader {
            buffer: Vec::with_capacity(4 * SENSOR_PACKET_LEN),
            discarded: 0,
        }
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Extracts the next candidate packet, if a full one is buffered.
    ///
    /// A candidate that fails its checksum is returned as an error and only
    /// its start byte is dropped, so a stray start byte in the noise cannot
    /// swallow the real packet behind it.
    pub fn next_packet(&mut self) -> Option<Result<[u8; SENSOR_PACKET_LEN], DecodeError>> {
        while self.buffer.len() >= SENSOR_PACKET_LEN {
            // Find the start of the packet
            match self.buffer.iter().position(|b| *b == SENSOR_START_BYTE) {
                None => {
                    // Nothing salvageable in here
                    warn!(bytes = self.buffer.len(), "start byte not found, clearing buffer");
                    self.discarded += self.buffer.len() as u64;
                    self.buffer.clear();
                    return None;
                }
                Some(0) => {}
                Some(offset) => {
                    warn!(bytes = offset, "discarding bytes before start byte");
                    self.discarded += offset as u64;
                    self.buffer.drain(..offset);
                    // Make sure a full packet is still buffered
                    continue;
                }
            }

            let mut packet = [0u8; SENSOR_PACKET_LEN];
            packet.copy_from_slice(&self.buffer[..SENSOR_PACKET_LEN]);

            return match verify_sensor_packet(&packet) {
                Ok(()) => {
                    self.buffer.drain(..SENSOR_PACKET_LEN);
                    Some(Ok(packet))
                }
                Err(e) => {
                    self.discarded += 1;
                    self.buffer.drain(..1);
                    Some(Err(e))
                }
            };
        }

        None
    }

    /// Appends `bytes` and drains every packet that is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<[u8; SENSOR_PACKET_LEN], DecodeError>> {
        self.extend(bytes);
        std::iter::from_fn(|| self.next_packet()).collect()
    }

    /// Bytes currently waiting for the rest of a packet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes thrown away as noise since creation.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}
