//! The safety coordinator.
//!
//! [Robot] is the only writer to the serial [Transport]. Every send goes
//! through one async mutex, the send gate, so at most one command is in flight
//! and packets never interleave on the wire. Around that gate it runs the
//! sensor poll loop, the obstacle and cliff reflexes, operator drive gating
//! and command sequence playback.

mod latch;
mod notify;
mod sequence;

pub use latch::{Cooldown, Latch};
pub use notify::{
    ActiveCommand, ChannelSink, HapticFeedback, NotificationSink, RobotEvent, SensorTelemetry,
    TracingSink, UltrasonicReading,
};
pub use sequence::{SequenceHandle, THINKING_LINE};

use sequence::SequenceSlot;

use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, trace, warn};

use crate::commands::{Command, DriveMapping};
use crate::config::RobotConfig;
use crate::devices::{LinkStatus, PacketHandler, Transport};
use crate::errors::{DecodeError, DeviceError};
use crate::protocol::decode;
use crate::sensors::{DistanceHistory, SensorFrame};

/// How a gated send ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldOutcome {
    /// Sent and held for the full duration
    Completed,
    /// A stop cut the hold short, or a motor command was dropped because one
    /// arrived while it waited for the gate
    Preempted,
    /// The owning sequence was cancelled
    Cancelled,
}

/// Handle to the safety coordinator. Cheap to clone.
pub struct Robot<W> {
    inner: Arc<RobotInner<W>>,
}

impl<W> Clone for Robot<W> {
    fn clone(&self) -> Self {
        Robot {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RobotInner<W> {
    config: RobotConfig,
    drive: DriveMapping,
    sink: Arc<dyn NotificationSink>,
    status: LinkStatus,

    /// The send gate
    gate: Mutex<Transport<W>>,

    /// Set from just before a sensor request is written until its response
    /// is processed or the wait times out
    awaiting_sensor: AtomicBool,
    sensor_response: Notify,

    obstacle_clear: Latch,
    cliff_clear: Latch,
    /// Whether the most recent frame saw a cliff
    cliff_present: AtomicBool,
    rumble: Cooldown,
    telemetry: Cooldown,
    history: parking_lot::Mutex<DistanceHistory>,

    /// Bumped to cut short every hold in progress
    preempt: watch::Sender<u64>,
    shutdown: watch::Sender<bool>,
    poll_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    active_sequence: parking_lot::Mutex<Option<SequenceSlot>>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> Robot<W> {
    /// Creates the coordinator around an opened transport.
    ///
    /// Nothing is sent until [Robot::start] is called or a caller sends something.
    pub fn new(
        transport: Transport<W>,
        config: RobotConfig,
        drive: DriveMapping,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let status = transport.status().clone();
        let (preempt, _) = watch::channel(0u64);
        let (shutdown, _) = watch::channel(false);

        Robot {
            inner: Arc::new(RobotInner {
                obstacle_clear: Latch::until_clear(config.obstacle_settle()),
                cliff_clear: Latch::new(config.cliff_settle()),
                rumble: Cooldown::new(config.rumble_cooldown()),
                telemetry: Cooldown::new(config.telemetry_interval()),
                config,
                drive,
                sink,
                status,
                gate: Mutex::new(transport),
                awaiting_sensor: AtomicBool::new(false),
                sensor_response: Notify::new(),
                cliff_present: AtomicBool::new(false),
                history: parking_lot::Mutex::new(DistanceHistory::new()),
                preempt,
                shutdown,
                poll_task: parking_lot::Mutex::new(None),
                active_sequence: parking_lot::Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &RobotConfig {
        &self.inner.config
    }

    pub fn link_status(&self) -> &LinkStatus {
        &self.inner.status
    }

    /// Starts the background sensor poll loop. Does nothing if it already runs.
    pub fn start(&self) {
        let mut poll_task = self.inner.poll_task.lock();
        if poll_task.as_ref().map_or(false, |t| !t.is_finished()) {
            return;
        }

        self.inner.shutdown.send_replace(false);
        let robot = self.clone();
        let shutdown = self.inner.shutdown.subscribe();
        *poll_task = Some(tokio::spawn(robot.poll_loop(shutdown)));
        info!("sensor polling started");
    }

    /// Stops the poll loop and cancels any running sequence.
    ///
    /// Waits for the poll loop to finish its current exchange, so the wire is
    /// left between packets. A cancelled sequence still sends its final stop.
    pub async fn stop(&self) {
        self.inner.shutdown.send_replace(true);

        if let Some(active) = self.inner.active_sequence.lock().take() {
            active.cancel.send_replace(true);
        }

        let task = self.inner.poll_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "sensor poll task failed");
            }
            info!("sensor polling stopped");
        }
    }

    async fn poll_loop(self, mut shutdown: watch::Receiver<bool>) {
        // Give the board time to boot after the port opens
        tokio::select! {
            _ = sleep(self.inner.config.poll_start_delay()) => {}
            _ = shutdown_requested(&mut shutdown) => return,
        }

        let mut ticker = interval(self.inner.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = IntervalStream::new(ticker);

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                tick = ticks.next() => {
                    if tick.is_none() {
                        break;
                    }
                }
            }

            // Not cancelled mid exchange, the request always goes out whole
            if let Err(e) = self.poll_once().await {
                let backoff = self.inner.config.reconnect_backoff();
                warn!(
                    error = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "sensor poll failed, backing off"
                );
                tokio::select! {
                    _ = sleep(backoff) => {}
                    _ = shutdown_requested(&mut shutdown) => break,
                }
            }
        }
    }

    /// Sends one sensor request, unless someone else holds the gate.
    ///
    /// Returns whether a request was sent.
    pub async fn poll_once(&self) -> Result<bool, DeviceError> {
        let Ok(mut transport) = self.inner.gate.try_lock() else {
            trace!("channel busy, skipping sensor poll");
            return Ok(false);
        };

        self.wait_for_sensor_response().await;

        // Set before writing, the response may be handled before send returns
        self.inner.awaiting_sensor.store(true, Ordering::Release);
        if let Err(e) = transport.send(&Command::SensorRequest).await {
            self.inner.awaiting_sensor.store(false, Ordering::Release);
            return Err(e);
        }

        Ok(true)
    }

    /// True while a sensor request is outstanding.
    pub fn is_awaiting_sensor(&self) -> bool {
        self.inner.awaiting_sensor.load(Ordering::Acquire)
    }

    /// Waits until no sensor response is outstanding.
    ///
    /// Gives up after the sensor timeout and clears the flag, so a dropped
    /// response cannot lock the channel forever.
    async fn wait_for_sensor_response(&self) {
        let deadline = Instant::now() + self.inner.config.sensor_timeout();
        loop {
            // Register before checking so a response in between is not missed
            let notified = self.inner.sensor_response.notified();
            if !self.is_awaiting_sensor() {
                return;
            }
            if timeout_at(deadline, notified).await.is_err() {
                warn!("timed out waiting for sensor data, releasing channel");
                self.inner.awaiting_sensor.store(false, Ordering::Release);
                return;
            }
        }
    }

    fn sensor_received(&self) {
        self.inner.awaiting_sensor.store(false, Ordering::Release);
        self.inner.sensor_response.notify_waiters();
    }

    /// Handles one packet from the device.
    ///
    /// Runs the obstacle and cliff reflexes, records the distance and
    /// forwards throttled telemetry. Reflex maneuvers run on their own
    /// tasks, this never waits on the gate. Invalid packets are logged and
    /// count as no data: the outstanding request stays outstanding until a
    /// valid packet arrives or the sensor timeout releases it.
    pub fn process_sensor_packet(&self, packet: &[u8]) {
        let frame = match decode(packet) {
            Ok(frame) => frame,
            Err(e) => {
                self.handle_decode_error(&e);
                return;
            }
        };

        self.process_sensor_frame(&frame);
        self.sensor_received();
    }

    fn process_sensor_frame(&self, frame: &SensorFrame) {
        let distance = self.handle_obstacle(frame);
        self.inner.history.lock().push(distance);

        self.handle_cliff(frame);

        if self.inner.telemetry.try_acquire() {
            self.inner
                .sink
                .notify(RobotEvent::SensorData(SensorTelemetry::new(frame, distance)));
        }
    }

    /// Runs the obstacle reflex. Returns the distance with sentinels resolved.
    fn handle_obstacle(&self, frame: &SensorFrame) -> f32 {
        let distance = self.inner.history.lock().resolve(frame.distance());
        let threshold = self.inner.config.obstacle_threshold_cm;

        if !frame.is_obstacle_detected(threshold) {
            self.inner.obstacle_clear.observe_clear();
        } else if self.inner.obstacle_clear.try_trip() {
            info!(
                distance_cm = distance,
                threshold_cm = threshold,
                "obstacle detected, backing up"
            );

            self.rumble(HapticFeedback::for_obstacle(
                distance,
                threshold,
                self.inner.config.haptic_duration(),
            ));

            let robot = self.clone();
            tokio::spawn(async move { robot.backup().await });
        }

        distance
    }

    fn handle_cliff(&self, frame: &SensorFrame) {
        let cliff = frame.check_cliff();
        self.inner.cliff_present.store(cliff, Ordering::Release);

        if cliff && self.inner.cliff_clear.try_trip() {
            warn!(
                ir_front = frame.ir_front,
                ir_back = frame.ir_back,
                "cliff detected, stopping"
            );

            // Cut every hold short so the stop is next on the wire
            self.preempt_holds();
            let robot = self.clone();
            tokio::spawn(async move {
                if let Err(e) = robot.send_gated(&Command::Stop, Duration::ZERO).await {
                    error!(error = %e, "failed to send cliff stop");
                }
            });

            self.rumble(HapticFeedback::for_cliff(self.inner.config.haptic_duration()));
        }
    }

    fn rumble(&self, feedback: HapticFeedback) {
        if self.inner.rumble.try_acquire() {
            self.inner.sink.notify(RobotEvent::Rumble(feedback));
        }
    }

    /// Reverses for the backup duration, then stops.
    async fn backup(&self) {
        let mut preempt = self.inner.preempt.subscribe();
        let reverse =
            Command::from_joystick(-self.inner.config.backup_speed, 0.0, &self.inner.drive);

        match self
            .send_and_hold(&reverse, self.inner.config.backup_duration(), &mut preempt, None)
            .await
        {
            Ok(HoldOutcome::Completed) => debug!("backup complete"),
            Ok(outcome) => debug!(?outcome, "backup cut short"),
            Err(e) => error!(error = %e, "failed to send backup"),
        }

        // Stop whatever happened to the reverse
        if let Err(e) = self.send_gated(&Command::Stop, Duration::ZERO).await {
            error!(error = %e, "failed to stop after backup");
        }
    }

    /// True when operator drive commands are currently dropped.
    pub fn is_drive_gated(&self) -> bool {
        let inner = &self.inner;
        inner.cliff_present.load(Ordering::Acquire)
            || !inner.cliff_clear.is_settled()
            || !inner.obstacle_clear.is_settled()
            || self.is_awaiting_sensor()
    }

    /// Forwards an operator joystick position as a motor command.
    ///
    /// The command is dropped, returning `Ok(false)`, while a cliff is
    /// latched or present, an obstacle reflex is in progress, a sensor
    /// exchange is outstanding, or anything else holds the gate. The operator
    /// keeps sending, so the next input goes through once clear.
    pub async fn handle_joystick_input(
        &self,
        forward: f64,
        turn: f64,
    ) -> Result<bool, DeviceError> {
        if self.is_drive_gated() {
            trace!(forward, turn, "drive gated, dropping joystick input");
            return Ok(false);
        }

        let Ok(mut transport) = self.inner.gate.try_lock() else {
            trace!(forward, turn, "channel busy, dropping joystick input");
            return Ok(false);
        };

        // Re-check under the gate, a poll may have slipped in
        if self.is_awaiting_sensor() {
            return Ok(false);
        }

        let command = Command::from_joystick(forward, turn, &self.inner.drive);
        transport.send(&command).await?;
        Ok(true)
    }

    /// Stops the motors. Never dropped: waits for the gate, cutting short
    /// any hold in progress.
    pub async fn send_stop(&self) -> Result<(), DeviceError> {
        self.preempt_holds();
        self.send_gated(&Command::Stop, Duration::ZERO).await?;
        Ok(())
    }

    /// Shows two lines on the LCD.
    pub async fn send_lcd(&self, line1: &str, line2: &str) -> Result<(), DeviceError> {
        self.send_gated(&Command::lcd(line1, line2), Duration::ZERO).await?;
        Ok(())
    }

    fn preempt_holds(&self) {
        self.inner.preempt.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Sends `command` through the gate and holds the gate for `hold`.
    pub async fn send_gated(
        &self,
        command: &Command,
        hold: Duration,
    ) -> Result<HoldOutcome, DeviceError> {
        let mut preempt = self.inner.preempt.subscribe();
        self.send_and_hold(command, hold, &mut preempt, None).await
    }

    /// The one path to the wire: acquire the gate, wait out any sensor
    /// exchange, send, hold, release.
    ///
    /// Motor commands are not sent at all if `preempt` fired since it was
    /// subscribed, if `cancel` is set, or if the latest frame saw a cliff.
    /// The hold ends early on preemption or cancellation.
    async fn send_and_hold(
        &self,
        command: &Command,
        hold: Duration,
        preempt: &mut watch::Receiver<u64>,
        mut cancel: Option<&mut watch::Receiver<bool>>,
    ) -> Result<HoldOutcome, DeviceError> {
        let mut transport = self.inner.gate.lock().await;

        if command.is_motor() {
            if cancel.as_ref().map_or(false, |c| *c.borrow()) {
                return Ok(HoldOutcome::Cancelled);
            }
            if preempt.has_changed().unwrap_or(true)
                || self.inner.cliff_present.load(Ordering::Acquire)
            {
                debug!(command = command.name(), "motor command preempted before sending");
                return Ok(HoldOutcome::Preempted);
            }
        }

        self.wait_for_sensor_response().await;
        transport.send(command).await?;

        if hold.is_zero() {
            return Ok(HoldOutcome::Completed);
        }

        let cancelled = async {
            match cancel.as_deref_mut() {
                Some(c) => cancel_requested(c).await,
                None => pending::<()>().await,
            }
        };

        Ok(tokio::select! {
            _ = sleep(hold) => HoldOutcome::Completed,
            _ = preempt.changed() => HoldOutcome::Preempted,
            _ = cancelled => HoldOutcome::Cancelled,
        })
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> PacketHandler for Robot<W> {
    fn handle_packet(&self, packet: &[u8]) {
        self.process_sensor_packet(packet);
    }

    /// Logged only. A failed candidate may be line noise rather than the
    /// response, so it never releases an outstanding sensor request.
    fn handle_decode_error(&self, err: &DecodeError) {
        warn!(error = %err, "corrupt sensor packet");
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn cancel_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            // Nobody left to cancel
            pending::<()>().await;
        }
    }
}
