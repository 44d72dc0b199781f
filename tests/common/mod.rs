#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use rover_serial::commands::{Command, DriveMapping};
use rover_serial::config::RobotConfig;
use rover_serial::devices::{LinkStatus, Transport};
use rover_serial::protocol::decode_command;
use rover_serial::robot::{ChannelSink, HapticFeedback, Robot, RobotEvent};
use rover_serial::sensors::SensorPacket;

/// Everything written to a [SlowLink], shared with the test.
#[derive(Clone, Default)]
pub struct Wire {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Wire {
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Parses the whole byte stream back into commands.
    /// Panics if any packet is torn, interleaved or corrupt.
    pub fn commands(&self) -> Vec<Command> {
        let bytes = self.bytes();
        let mut commands = Vec::new();
        let mut at = 0;
        while at < bytes.len() {
            match decode_command(&bytes[at..]) {
                Ok((command, len)) => {
                    commands.push(command);
                    at += len;
                }
                Err(e) => panic!("bad packet at byte {at}: {e} in {bytes:02x?}"),
            }
        }
        commands
    }
}

/// A serial link that accepts one byte per write and yields between
/// bytes, so two unsynchronized writers would visibly interleave.
pub struct SlowLink {
    wire: Wire,
    ready: bool,
}

impl SlowLink {
    pub fn new() -> (Self, Wire) {
        let wire = Wire::default();
        (
            SlowLink {
                wire: wire.clone(),
                ready: false,
            },
            wire,
        )
    }
}

impl AsyncWrite for SlowLink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        if !self.ready {
            self.ready = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        self.ready = false;
        self.wire.bytes.lock().push(buf[0]);
        Poll::Ready(Ok(1))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A link whose every write fails, counting the attempts.
#[derive(Clone, Default)]
pub struct BrokenLink {
    pub attempts: Arc<Mutex<usize>>,
}

impl AsyncWrite for BrokenLink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        *self.attempts.lock() += 1;
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Default timings, except polling starts right away.
pub fn config() -> RobotConfig {
    RobotConfig {
        poll_start_delay_ms: 0,
        ..RobotConfig::default()
    }
}

pub fn robot(config: RobotConfig) -> (Robot<SlowLink>, Wire, mpsc::Receiver<RobotEvent>) {
    let (link, wire) = SlowLink::new();
    let (sink, events) = ChannelSink::new(1024);
    let robot = Robot::new(
        Transport::new(link, LinkStatus::new()),
        config,
        DriveMapping::default(),
        Arc::new(sink),
    );
    (robot, wire, events)
}

/// A valid sensor packet. `ir_flags` bit 0 set means the front sees no floor,
/// bit 1 the back.
pub fn packet(distance: f32, ir_flags: u8) -> [u8; 24] {
    SensorPacket {
        distance,
        accel: [0, 0, 16384],
        gyro: [0; 3],
        temperature: 25.0,
        ir_flags,
        battery: 80,
    }
    .encode()
}

pub fn drain(events: &mut mpsc::Receiver<RobotEvent>) -> Vec<RobotEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub fn rumbles(events: &[RobotEvent]) -> Vec<HapticFeedback> {
    events
        .iter()
        .filter_map(|e| match e {
            RobotEvent::Rumble(h) => Some(*h),
            _ => None,
        })
        .collect()
}
