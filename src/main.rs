use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use rover_serial::commands::{CommandSequence, JsonPlanner};
use rover_serial::config::AppConfig;
use rover_serial::devices::{self, ports};
use rover_serial::robot::{ChannelSink, Robot, SequenceHandle};

/// Config file picked up from the working directory when --config is not given
const DEFAULT_CONFIG_FILE: &str = "rover.toml";

/// Serial link and safety coordinator for the rover.
///
/// Reads operator commands from stdin, one per line, and prints every event
/// as a JSON line on stdout. Logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "rover-serial", version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port to open instead of autodetecting one
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Log filter, e.g. "debug" or "rover_serial=trace". RUST_LOG wins over this.
    #[arg(long)]
    log_level: Option<String>,

    /// List candidate serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

/// One line of operator input.
#[derive(Debug, Clone, PartialEq)]
enum ConsoleCommand {
    Drive { forward: f64, turn: f64 },
    Stop,
    Lcd { line1: String, line2: String },
    Run(PathBuf),
    Query(String),
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        Ok(match word {
            "drive" => {
                let mut axes = rest.split_whitespace().map(f64::from_str);
                match (axes.next(), axes.next(), axes.next()) {
                    (Some(Ok(forward)), Some(Ok(turn)), None) => {
                        ConsoleCommand::Drive { forward, turn }
                    }
                    _ => bail!("usage: drive <forward> <turn>"),
                }
            }
            "stop" => ConsoleCommand::Stop,
            "lcd" => {
                let (line1, line2) = rest.split_once('|').unwrap_or((rest, ""));
                ConsoleCommand::Lcd {
                    line1: line1.to_string(),
                    line2: line2.to_string(),
                }
            }
            "run" if !rest.is_empty() => ConsoleCommand::Run(PathBuf::from(rest)),
            "run" => bail!("usage: run <sequence.json>"),
            "query" if !rest.is_empty() => ConsoleCommand::Query(rest.to_string()),
            "query" => bail!("usage: query <text>"),
            "quit" | "exit" => ConsoleCommand::Quit,
            other => bail!("unknown command {other:?}"),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    init_logging(&config.logging.level);

    if cli.list_ports {
        return list_ports(&config);
    }

    // Find the rover
    let port = match &config.serial.port {
        Some(port) => port.clone(),
        None => {
            let found = ports::find_rover_port(&config.serial.vendor_ids)
                .context("could not autodetect the rover's serial port")?;
            info!(port = found.name(), class = ?found.class, "autodetected serial port");
            found.name().to_string()
        }
    };

    let (reader, transport) = devices::open(&port, config.serial.baud_rate)
        .with_context(|| format!("failed to open {port}"))?;
    let status = transport.status().clone();

    let (sink, mut events) = ChannelSink::new(256);
    let robot = Robot::new(transport, config.robot.clone(), config.drive, Arc::new(sink));

    let reader_task = devices::spawn_reader(reader, status, robot.clone());
    robot.start();

    // Events go out as JSON lines
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, event = event.name(), "failed to serialize event"),
            }
        }
    });

    let sequence = console(&robot).await;

    info!("shutting down");
    robot.stop().await;
    if let Some(sequence) = sequence {
        if let Err(e) = sequence.join().await {
            debug!(error = %e, "sequence ended");
        }
    }
    if let Err(e) = robot.send_stop().await {
        warn!(error = %e, "could not send final stop");
    }

    reader_task.abort();
    drop(robot);
    // The printer ends once the robot, and with it the sink, is gone
    if let Err(e) = printer.await {
        error!(error = %e, "event printer failed");
    }

    Ok(())
}

/// Loads the config file, then applies command line overrides.
fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            AppConfig::from_file(DEFAULT_CONFIG_FILE)?
        }
        None => AppConfig::default(),
    };

    if let Some(port) = &cli.port {
        config.serial.port = Some(port.clone());
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn list_ports(config: &AppConfig) -> Result<()> {
    let candidates = ports::discover_rover_ports(&config.serial.vendor_ids)?;
    if candidates.is_empty() {
        println!("no candidate serial ports found");
    }
    for candidate in candidates {
        println!("{}\t{:?}", candidate.name(), candidate.class);
    }
    Ok(())
}

/// Runs operator commands from stdin until quit, end of input or ctrl-c.
///
/// Returns the last sequence started, if any.
async fn console<W>(robot: &Robot<W>) -> Option<SequenceHandle>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sequence = None;

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed to read stdin");
                break;
            }
        };

        let command = match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Quit) => break,
            Ok(command) => command,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };

        match run_command(robot, command).await {
            Ok(Some(handle)) => sequence = Some(handle),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "command failed"),
        }
    }

    sequence
}

async fn run_command<W>(robot: &Robot<W>, command: ConsoleCommand) -> Result<Option<SequenceHandle>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    match command {
        ConsoleCommand::Drive { forward, turn } => {
            if !robot.handle_joystick_input(forward, turn).await? {
                debug!(forward, turn, "drive dropped");
            }
        }
        ConsoleCommand::Stop => robot.send_stop().await?,
        ConsoleCommand::Lcd { line1, line2 } => robot.send_lcd(&line1, &line2).await?,
        ConsoleCommand::Run(path) => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let sequence = CommandSequence::from_json(&text)
                .with_context(|| format!("invalid sequence in {}", path.display()))?;
            return Ok(Some(robot.run_sequence(sequence)));
        }
        ConsoleCommand::Query(text) => {
            let handle = robot.handle_query(&JsonPlanner, &text).await?;
            return Ok(Some(handle));
        }
        ConsoleCommand::Quit => {}
    }

    Ok(None)
}
