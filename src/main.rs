use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use uart_servo_runtime::config::{
    DEFAULT_BAUDRATE, DEFAULT_MEAN_DPS, DEFAULT_PORT, PROBE_WAIT_MS, RESCAN_MAX_ID,
    UPDATE_INTERVAL_MS,
};
use uart_servo_runtime::runtime::{self, BusManager, RuntimeOptions};
use uart_servo_runtime::servo::{Clock, ManagerConfig, SpinMode};

/// Drive a chain of Fashion Star UART servos
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Serial port of the bus adapter
    #[arg(long, default_value = DEFAULT_PORT)]
    port: String,

    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    baud: u32,

    /// Servos registered up front (ids 0..N)
    #[arg(long, default_value_t = 1)]
    servos: u8,

    /// Default angular speed for angle commands (deg/s)
    #[arg(long, default_value_t = DEFAULT_MEAN_DPS)]
    mean_dps: f64,

    /// Talk to a simulated bus instead of the serial port
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the zenoh bridge
    Run,
    /// Ping every id below --max-id and list the servos that answer
    Scan {
        #[arg(long, default_value_t = RESCAN_MAX_ID)]
        max_id: u8,
    },
    /// Ping one servo
    Ping {
        #[arg(long)]
        id: u8,
    },
    /// Read one servo's angle
    Query {
        #[arg(long)]
        id: u8,
    },
    /// Move a servo and follow the estimate until it stops
    Angle {
        #[arg(long)]
        id: u8,
        #[arg(long, allow_hyphen_values = true)]
        angle: f64,
        #[arg(long)]
        duration_ms: Option<u32>,
        /// Mean speed in deg/s, used when no duration is given
        #[arg(long)]
        speed: Option<f64>,
        #[arg(long, default_value_t = 0)]
        power: u16,
    },
    /// Wheel mode
    Spin {
        #[arg(long)]
        id: u8,
        #[arg(long, value_enum)]
        mode: SpinArg,
        /// Revolutions (round) or milliseconds (timed)
        #[arg(long, default_value_t = 0)]
        value: u16,
        /// Turn counter-clockwise
        #[arg(long)]
        ccw: bool,
        #[arg(long)]
        speed: Option<u16>,
    },
    /// Damping mode
    Damping {
        #[arg(long)]
        id: u8,
        #[arg(long, default_value_t = 0)]
        power: u16,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SpinArg {
    Stop,
    Normal,
    Round,
    Timed,
}

impl From<SpinArg> for SpinMode {
    fn from(arg: SpinArg) -> Self {
        match arg {
            SpinArg::Stop => SpinMode::Stop,
            SpinArg::Normal => SpinMode::Normal,
            SpinArg::Round => SpinMode::Round,
            SpinArg::Timed => SpinMode::Timed,
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let cli = Cli::parse();
    let options = RuntimeOptions {
        port: cli.port,
        baudrate: cli.baud,
        simulate: cli.simulate,
        manager: ManagerConfig {
            servo_count: cli.servos,
            mean_dps: cli.mean_dps,
        },
    };

    let result = match cli.command {
        Cmd::Run => runtime::run(options).await,
        command => run_once(&options, command),
    };

    if let Err(e) = result {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

/// One-shot commands: send, poll for the reply or the end of the motion, print
fn run_once(options: &RuntimeOptions, command: Cmd) -> CliResult {
    let mut manager = runtime::open_bus(options)?;

    match command {
        Cmd::Run => return Err("run needs the async runtime".into()),
        Cmd::Scan { max_id } => {
            let found = manager.rescan(max_id)?;
            println!("Found {} servo(s): {:?}", found.len(), found);
        }
        Cmd::Ping { id } => {
            manager.request_ping(id)?;
            settle(&mut manager)?;
            let online = manager.servo(id).is_some_and(|servo| servo.is_online());
            println!("Servo {}: {}", id, if online { "online" } else { "no reply" });
        }
        Cmd::Query { id } => {
            manager.request_query_angle(id)?;
            settle(&mut manager)?;
            match manager.angle(id) {
                Some(angle) => println!("Servo {}: {:.1} deg", id, angle),
                None => println!("Servo {}: no reply", id),
            }
        }
        Cmd::Angle {
            id,
            angle,
            duration_ms,
            speed,
            power,
        } => {
            // Learn the present angle first so the motion can be timed from it
            manager.request_query_angle(id)?;
            settle(&mut manager)?;

            let duration = manager.request_set_angle(id, angle, duration_ms, speed, power)?;
            println!("Servo {} -> {:.1} deg over {} ms", id, angle, duration);
            follow(&mut manager, id)?;
        }
        Cmd::Spin {
            id,
            mode,
            value,
            ccw,
            speed,
        } => {
            manager.request_set_spin(id, mode.into(), value, !ccw, speed)?;
            println!("Servo {}: spin {:?}", id, mode);
        }
        Cmd::Damping { id, power } => {
            manager.request_set_damping(id, power)?;
            println!("Servo {}: damping, power {}", id, power);
        }
    }

    Ok(())
}

/// Give the bus time to answer, then process replies
fn settle(manager: &mut BusManager) -> CliResult {
    manager.clock().sleep(Duration::from_millis(PROBE_WAIT_MS));
    manager.update()?;
    Ok(())
}

/// Print the angle estimate every poll until the servo stops
fn follow(manager: &mut BusManager, id: u8) -> CliResult {
    let poll = Duration::from_millis(UPDATE_INTERVAL_MS);
    let mut last_print = None;

    while !manager.is_all_stationary() {
        manager.update()?;
        if let Some(angle) = manager.angle(id) {
            // Print roughly every 0.5 deg of travel
            if last_print.is_none_or(|last: f64| (angle - last).abs() >= 0.5) {
                println!("  {:.1} deg", angle);
                last_print = Some(angle);
            }
        }
        manager.clock().sleep(poll);
    }

    if let Some(angle) = manager.angle(id) {
        println!("Servo {} stopped at {:.1} deg", id, angle);
    }
    Ok(())
}
