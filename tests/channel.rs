mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::time::sleep;

use rover_serial::commands::{Command, CommandSequence, DriveMapping, SequenceStep};
use rover_serial::devices::{spawn_reader, LinkStatus, Transport};
use rover_serial::errors::DeviceError;
use rover_serial::robot::{Robot, TracingSink};

use common::{config, packet, robot, BrokenLink};

#[tokio::test(start_paused = true)]
async fn polls_for_sensor_data() {
    let (robot, wire, _events) = robot(config());
    robot.start();

    // Answer every request right away
    for _ in 0..5 {
        sleep(Duration::from_millis(100)).await;
        robot.process_sensor_packet(&packet(100.0, 0));
    }
    robot.stop().await;

    let commands = wire.commands();
    assert!(commands.len() >= 5, "{commands:?}");
    assert!(commands.iter().all(|c| *c == Command::SensorRequest));
}

#[tokio::test(start_paused = true)]
async fn polling_waits_for_the_start_delay() {
    let (robot, wire, _events) = robot(Default::default());
    robot.start();

    sleep(Duration::from_millis(900)).await;
    assert!(wire.commands().is_empty());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(wire.commands(), vec![Command::SensorRequest]);
    robot.stop().await;
}

#[tokio::test(start_paused = true)]
async fn sends_wait_for_the_sensor_response() {
    let (robot, wire, _events) = robot(config());
    robot.start();
    sleep(Duration::from_millis(10)).await;
    assert!(robot.is_awaiting_sensor());
    assert_eq!(wire.commands(), vec![Command::SensorRequest]);

    let lcd = tokio::spawn({
        let robot = robot.clone();
        async move { robot.send_lcd("Hello", "").await }
    });
    sleep(Duration::from_millis(500)).await;

    // Neither the LCD nor another poll went out
    assert_eq!(wire.commands(), vec![Command::SensorRequest]);
    assert!(!robot.handle_joystick_input(0.5, 0.0).await.unwrap());

    robot.process_sensor_packet(&packet(100.0, 0));
    lcd.await.unwrap().unwrap();
    assert_eq!(
        wire.commands()[..2],
        [Command::SensorRequest, Command::lcd("Hello", "")]
    );
    robot.stop().await;
}

#[tokio::test(start_paused = true)]
async fn lost_response_times_out() {
    let (robot, wire, _events) = robot(config());
    robot.start();
    sleep(Duration::from_millis(10)).await;

    let lcd = tokio::spawn({
        let robot = robot.clone();
        async move { robot.send_lcd("Hello", "").await }
    });

    sleep(Duration::from_millis(900)).await;
    assert_eq!(wire.commands(), vec![Command::SensorRequest]);

    // The device never answers, one second later the channel is released
    sleep(Duration::from_millis(200)).await;
    assert!(lcd.is_finished());
    lcd.await.unwrap().unwrap();
    assert_eq!(
        wire.commands()[..2],
        [Command::SensorRequest, Command::lcd("Hello", "")]
    );
    robot.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_ends_polling() {
    let (robot, wire, _events) = robot(config());
    robot.start();
    sleep(Duration::from_millis(10)).await;
    robot.stop().await;

    let sent = wire.commands().len();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(wire.commands().len(), sent);
}

#[tokio::test(start_paused = true)]
async fn lost_link_fails_fast_and_backs_off() {
    let link = BrokenLink::default();
    let attempts = Arc::clone(&link.attempts);
    let robot = Robot::new(
        Transport::new(link, LinkStatus::new()),
        config(),
        DriveMapping::default(),
        Arc::new(TracingSink),
    );

    robot.start();
    sleep(Duration::from_millis(2500)).await;

    // One real write, then every send fails without touching the port
    assert_eq!(*attempts.lock(), 1);
    assert!(!robot.link_status().is_connected());
    assert!(!robot.is_awaiting_sensor());
    assert!(matches!(robot.send_stop().await, Err(DeviceError::ConnectionLost)));
    assert!(matches!(
        robot.handle_joystick_input(0.5, 0.0).await,
        Err(DeviceError::ConnectionLost)
    ));

    robot.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reader_feeds_the_reflexes() {
    let (robot, wire, _events) = robot(config());
    let (mut device, port) = tokio::io::duplex(256);
    let reader = spawn_reader(port, robot.link_status().clone(), robot.clone());

    // Line noise, a torn packet, then an obstacle split across two writes
    let obstacle = packet(6.0, 0);
    device.write_all(&[0x00, 0x13, 0x37]).await.unwrap();
    device.write_all(&packet(50.0, 0)[..10]).await.unwrap();
    device.write_all(&obstacle[..7]).await.unwrap();
    sleep(Duration::from_millis(5)).await;
    device.write_all(&obstacle[7..]).await.unwrap();

    sleep(Duration::from_secs(3)).await;
    assert_eq!(wire.commands(), vec![Command::motor(-128, -128), Command::Stop]);

    // Unplugging the device marks the link lost
    drop(device);
    reader.await.unwrap();
    assert!(!robot.link_status().is_connected());
}

#[tokio::test(start_paused = true)]
async fn line_noise_does_not_release_the_sensor_wait() {
    let (robot, wire, _events) = robot(config());
    let (mut device, port) = tokio::io::duplex(256);
    let _reader = spawn_reader(port, robot.link_status().clone(), robot.clone());

    robot.start();
    sleep(Duration::from_millis(10)).await;
    assert!(robot.is_awaiting_sensor());

    // A stray start byte followed by garbage fails its checksum
    let mut noise = vec![0xAA];
    noise.extend([0x11; 23]);
    device.write_all(&noise).await.unwrap();
    sleep(Duration::from_millis(10)).await;

    assert!(robot.is_awaiting_sensor());
    assert!(!robot.handle_joystick_input(0.8, 0.0).await.unwrap());

    // The real response behind the noise releases it
    device.write_all(&packet(100.0, 0)).await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert!(!robot.is_awaiting_sensor());
    assert!(robot.handle_joystick_input(0.8, 0.0).await.unwrap());

    robot.stop().await;
    assert_eq!(
        wire.commands()[..2],
        [Command::SensorRequest, Command::motor(204, 204)]
    );
}

#[tokio::test(start_paused = true)]
async fn corrupt_response_leaves_the_request_outstanding() {
    let (robot, _wire, _events) = robot(config());
    robot.start();
    sleep(Duration::from_millis(10)).await;

    let mut bad = packet(100.0, 0);
    bad[23] = bad[23].wrapping_add(1);
    robot.process_sensor_packet(&bad);
    assert!(robot.is_awaiting_sensor());

    robot.process_sensor_packet(&packet(100.0, 0));
    assert!(!robot.is_awaiting_sensor());
    robot.stop().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_senders_never_interleave() {
    let (robot, wire, _events) = robot(config());
    robot.start();

    // A fake device that answers every 150ms
    let device = tokio::spawn({
        let robot = robot.clone();
        async move {
            for i in 0..40 {
                sleep(Duration::from_millis(150)).await;
                let distance = if i % 10 == 5 { 8.0 } else { 120.0 };
                let ir = if i == 25 { 0b01 } else { 0 };
                robot.process_sensor_packet(&packet(distance, ir));
            }
        }
    });

    let operator = tokio::spawn({
        let robot = robot.clone();
        async move {
            for i in 0..100 {
                let _ = robot.handle_joystick_input(0.6, (i % 5) as f64 / 10.0).await;
                sleep(Duration::from_millis(37)).await;
            }
        }
    });

    let screen = tokio::spawn({
        let robot = robot.clone();
        async move {
            for i in 0..10 {
                robot.send_lcd(&format!("Line {i}"), "").await.unwrap();
                sleep(Duration::from_millis(330)).await;
            }
        }
    });

    let sequence = robot.run_sequence(CommandSequence::new(vec![
        SequenceStep::new(Command::motor(120, 120), Duration::from_millis(700)),
        SequenceStep::new(Command::lcd("Seq", "step"), Duration::from_millis(300)),
        SequenceStep::new(Command::motor(-80, 80), Duration::from_millis(400))
            .with_pause(Duration::from_millis(200)),
    ]));

    sleep(Duration::from_millis(1200)).await;
    robot.send_stop().await.unwrap();

    device.await.unwrap();
    operator.await.unwrap();
    screen.await.unwrap();
    let _ = sequence.join().await;
    robot.stop().await;

    // Every byte parses into whole packets, in one stream
    let commands = wire.commands();
    assert!(commands.contains(&Command::SensorRequest));
    assert!(commands.contains(&Command::lcd("Line 9", "")));
    assert!(commands.contains(&Command::Stop));
    assert_eq!(wire.bytes().len(), commands.iter().map(encoded_len).sum::<usize>());
}

fn encoded_len(command: &Command) -> usize {
    rover_serial::protocol::encode(command).len()
}
