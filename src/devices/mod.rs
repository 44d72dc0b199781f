//! The physical serial link to the rover's microcontroller.
//!
//! The link is split in two: a [Transport] that writes command packets, and
//! a reader task that runs a [FrameReader] over incoming bytes and hands every
//! packet to a [PacketHandler]. The two halves run independently. Pacing of
//! requests and responses is up to whoever owns the [Transport].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, trace, warn};

use crate::commands::Command;
use crate::errors::{DecodeError, DeviceError};
use crate::protocol::{encode, FrameReader};

pub mod ports;

/// The default baud rate of the rover firmware
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// How many bytes the reader asks the port for at once
pub const READ_CHUNK_SIZE: usize = 64;

/// The read half of an opened serial port
pub type SerialReader = ReadHalf<SerialStream>;

/// The write half of an opened serial port
pub type SerialWriter = WriteHalf<SerialStream>;

/// Shared connection state of one serial link.
///
/// Cloning gives another handle to the same state. Both the reader task and
/// the [Transport] mark the link lost when the port fails; nothing marks it
/// connected again except a fresh [open].
#[derive(Debug, Clone)]
pub struct LinkStatus {
    connected: Arc<AtomicBool>,
}

impl LinkStatus {
    pub fn new() -> Self {
        LinkStatus {
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn mark_lost(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            warn!("serial link marked lost");
        }
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        LinkStatus::new()
    }
}

/// Receives every packet the reader task pulls off the wire.
pub trait PacketHandler: Send + Sync + 'static {
    /// Called with each aligned, full length packet whose checksum verified.
    fn handle_packet(&self, packet: &[u8]);

    /// Called for each candidate packet that failed validation.
    fn handle_decode_error(&self, err: &DecodeError) {
        debug!(error = %err, "dropping invalid packet");
    }
}

impl<T: PacketHandler> PacketHandler for Arc<T> {
    fn handle_packet(&self, packet: &[u8]) {
        (**self).handle_packet(packet)
    }

    fn handle_decode_error(&self, err: &DecodeError) {
        (**self).handle_decode_error(err)
    }
}

/// The send side of the serial link.
///
/// # Members
///
/// * `writer` - Anything bytes can be written to. A serial port in production, memory in tests.
/// * `status` - Connection state shared with the reader task
pub struct Transport<W> {
    writer: W,
    status: LinkStatus,
}

impl<W: AsyncWrite + Unpin + Send> Transport<W> {
    pub fn new(writer: W, status: LinkStatus) -> Self {
        Transport { writer, status }
    }

    /// Encodes and writes one command, then flushes.
    ///
    /// Write failures are not retried. They mark the link lost and
    /// every later send fails fast with [DeviceError::ConnectionLost].
    pub async fn send(&mut self, command: &Command) -> Result<(), DeviceError> {
        if !self.status.is_connected() {
            return Err(DeviceError::ConnectionLost);
        }

        let packet = encode(command);
        trace!(command = command.name(), bytes = ?packet, "writing packet");

        // Write the whole packet before anything else can touch the writer
        let written = match self.writer.write_all(&packet).await {
            Ok(()) => self.writer.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            error!(error = %e, command = command.name(), "serial write failed");
            self.status.mark_lost();
            return Err(DeviceError::ConnectionLost);
        }

        Ok(())
    }

    pub fn status(&self) -> &LinkStatus {
        &self.status
    }
}

/// Opens the rover's serial port at `baud_rate`, 8N1.
///
/// Returns the read half, to be given to [spawn_reader], and the
/// [Transport] for the write half.
pub fn open(
    port: &str,
    baud_rate: u32,
) -> Result<(SerialReader, Transport<SerialWriter>), DeviceError> {
    let stream = tokio_serial::new(port, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .open_native_async()?;

    info!(port, baud_rate, "opened serial port");

    let (reader, writer) = tokio::io::split(stream);
    Ok((reader, Transport::new(writer, LinkStatus::new())))
}

/// Spawns the task that reads from `reader` until the port closes.
///
/// Noise and corrupt packets are dropped by the [FrameReader]; only valid
/// packets reach `handler`. A read error or end of stream marks `status` lost
/// and ends the task.
pub fn spawn_reader<R, H>(mut reader: R, status: LinkStatus, handler: H) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    H: PacketHandler,
{
    tokio::spawn(async move {
        let mut frames = FrameReader::new();
        let mut buf = [0u8; READ_CHUNK_SIZE];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    warn!("serial port closed");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "serial read failed");
                    break;
                }
            };

            frames.extend(&buf[..n]);
            while let Some(packet) = frames.next_packet() {
                match packet {
                    Ok(packet) => handler.handle_packet(&packet),
                    Err(e) => handler.handle_decode_error(&e),
                }
            }
        }

        status.mark_lost();
    })
}
