mod common;

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

use rover_serial::commands::{Command, CommandPlanner, CommandSequence, JsonPlanner, SequenceStep};
use rover_serial::errors::SequenceError;
use rover_serial::robot::{ActiveCommand, RobotEvent, THINKING_LINE};

use common::{config, drain, packet, robot};

fn step(id: &str, command: Command, secs: f64) -> SequenceStep {
    let mut step = SequenceStep::new(command, Duration::from_secs_f64(secs));
    step.id = id.to_string();
    step
}

fn active_commands(events: &mut mpsc::Receiver<RobotEvent>) -> Vec<ActiveCommand> {
    drain(events)
        .into_iter()
        .filter_map(|e| match e {
            RobotEvent::ActiveCommand(a) => Some(a),
            _ => None,
        })
        .collect()
}

/// Plans every query into the same sequence.
struct Scripted(CommandSequence);

impl CommandPlanner for Scripted {
    fn plan(
        &self,
        _query: &str,
    ) -> impl Future<Output = Result<CommandSequence, SequenceError>> + Send {
        let sequence = self.0.clone();
        async move { Ok(sequence) }
    }
}

#[tokio::test(start_paused = true)]
async fn plays_steps_in_order_and_stops() {
    let (robot, wire, mut events) = robot(config());
    let lcd = step("a", Command::lcd("Hello", "there"), 1.0);
    let motor = step("b", Command::motor(150, 150), 2.0).with_pause(Duration::from_millis(500));
    let stop = step("c", Command::Stop, 0.0);

    let start = Instant::now();
    let handle = robot.run_sequence(CommandSequence::new(vec![
        lcd.clone(),
        motor.clone(),
        stop.clone(),
    ]));

    sleep(Duration::from_millis(500)).await;
    assert_eq!(wire.commands(), vec![Command::lcd("Hello", "there")]);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(
        wire.commands(),
        vec![Command::lcd("Hello", "there"), Command::motor(150, 150)]
    );

    handle.join().await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(3500), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(3600), "{elapsed:?}");

    assert_eq!(
        wire.commands(),
        vec![
            Command::lcd("Hello", "there"),
            Command::motor(150, 150),
            // pause after the motor step
            Command::Stop,
            Command::Stop,
            // final stop
            Command::Stop
        ]
    );
    assert_eq!(
        active_commands(&mut events),
        vec![
            ActiveCommand::Step(lcd),
            ActiveCommand::Step(motor),
            ActiveCommand::Step(stop),
            ActiveCommand::Cleared
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn new_sequence_replaces_the_running_one() {
    let (robot, wire, mut events) = robot(config());
    let first = step("first", Command::motor(150, 150), 10.0);
    let second = step("second", Command::lcd("Second", ""), 0.0);

    let a = robot.run_sequence(CommandSequence::new(vec![first.clone()]));
    sleep(Duration::from_millis(100)).await;
    let b = robot.run_sequence(CommandSequence::new(vec![second.clone()]));

    assert!(matches!(a.join().await, Err(SequenceError::Cancelled)));
    b.join().await.unwrap();

    // The first sequence's stop lands before anything from the second
    assert_eq!(
        wire.commands(),
        vec![
            Command::motor(150, 150),
            Command::Stop,
            Command::lcd("Second", ""),
            Command::Stop
        ]
    );
    assert_eq!(
        active_commands(&mut events),
        vec![
            ActiveCommand::Step(first),
            ActiveCommand::Failed("sequence was cancelled".to_string()),
            ActiveCommand::Step(second),
            ActiveCommand::Cleared
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_still_sends_the_final_stop() {
    let (robot, wire, _events) = robot(config());

    let handle = robot.run_sequence(CommandSequence::new(vec![
        step("go", Command::motor(100, 100), 5.0),
        step("more", Command::motor(200, 200), 5.0),
    ]));
    sleep(Duration::from_secs(1)).await;
    handle.cancel();

    let start = Instant::now();
    assert!(matches!(handle.join().await, Err(SequenceError::Cancelled)));
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(wire.commands(), vec![Command::motor(100, 100), Command::Stop]);
}

#[tokio::test(start_paused = true)]
async fn stop_preempts_a_running_sequence() {
    let (robot, wire, mut events) = robot(config());

    let go = step("go", Command::motor(150, 150), 10.0);
    let handle = robot.run_sequence(CommandSequence::new(vec![go]));
    sleep(Duration::from_millis(100)).await;
    robot.send_stop().await.unwrap();

    assert!(matches!(handle.join().await, Err(SequenceError::Preempted)));
    assert_eq!(
        wire.commands(),
        vec![Command::motor(150, 150), Command::Stop, Command::Stop]
    );
    assert!(matches!(
        active_commands(&mut events).last(),
        Some(ActiveCommand::Failed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn cliff_preempts_a_running_sequence() {
    let (robot, wire, _events) = robot(config());

    let go = step("go", Command::motor(150, 150), 10.0);
    let handle = robot.run_sequence(CommandSequence::new(vec![go]));
    sleep(Duration::from_millis(100)).await;
    robot.process_sensor_packet(&packet(100.0, 0b01));
    sleep(Duration::from_millis(100)).await;

    assert!(handle.is_finished());
    assert!(matches!(handle.join().await, Err(SequenceError::Preempted)));
    assert_eq!(
        wire.commands(),
        vec![Command::motor(150, 150), Command::Stop, Command::Stop]
    );
}

#[tokio::test(start_paused = true)]
async fn motor_steps_are_not_sent_over_a_cliff() {
    let (robot, wire, _events) = robot(config());

    robot.process_sensor_packet(&packet(100.0, 0b11));
    sleep(Duration::from_millis(10)).await;

    let go = step("go", Command::motor(150, 150), 1.0);
    let handle = robot.run_sequence(CommandSequence::new(vec![go]));
    assert!(matches!(handle.join().await, Err(SequenceError::Preempted)));
    assert_eq!(wire.commands(), vec![Command::Stop, Command::Stop]);
}

#[tokio::test(start_paused = true)]
async fn query_shows_thinking_then_plays() {
    let (robot, wire, _events) = robot(config());
    let query = r#"[{
        "ID": "1",
        "command_type": "MOTOR",
        "command": {"left_motor": 100, "right_motor": 100},
        "duration": 1
    }]"#;

    let handle = robot.handle_query(&JsonPlanner, query).await.unwrap();
    handle.join().await.unwrap();

    assert_eq!(
        wire.commands(),
        vec![
            Command::lcd(THINKING_LINE, ""),
            Command::motor(100, 100),
            Command::Stop
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn query_uses_the_given_planner() {
    let (robot, wire, _events) = robot(config());
    let planner = Scripted(CommandSequence::new(vec![step("hi", Command::lcd("Hi", ""), 0.5)]));

    let handle = robot.handle_query(&planner, "say hi").await.unwrap();
    handle.join().await.unwrap();

    assert_eq!(
        wire.commands(),
        vec![Command::lcd(THINKING_LINE, ""), Command::lcd("Hi", ""), Command::Stop]
    );
}

#[tokio::test(start_paused = true)]
async fn unplannable_query_is_reported() {
    let (robot, wire, mut events) = robot(config());

    let err = robot.handle_query(&JsonPlanner, "drive in a circle").await;
    assert!(matches!(err, Err(SequenceError::Planner(_))));
    assert_eq!(wire.commands(), vec![Command::lcd(THINKING_LINE, "")]);

    match active_commands(&mut events).as_slice() {
        [ActiveCommand::Failed(msg)] => assert!(msg.starts_with("could not plan"), "{msg}"),
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn demo_square_plays_through() {
    let (robot, wire, mut events) = robot(config());
    let square = CommandSequence::from_json(include_str!("../demos/square.json")).unwrap();
    assert_eq!(square.len(), 9);

    robot.run_sequence(square).join().await.unwrap();

    let commands = wire.commands();
    assert_eq!(commands.first(), Some(&Command::lcd("Driving a", "square")));
    assert_eq!(commands.iter().filter(|c| c.is_motor()).count(), 7);
    assert_eq!(commands.last(), Some(&Command::Stop));
    assert_eq!(active_commands(&mut events).last(), Some(&ActiveCommand::Cleared));
}
