// 100 Hz bus poll loop bridged to zenoh
// Commands arrive as JSON on TOPIC_CMD, servo state is published on TOPIC_STATE.
// The manager itself never blocks, so the loop cadence is set by the tick alone.

use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

// local imports
use crate::config::{TOPIC_CMD, TOPIC_STATE, UPDATE_INTERVAL_MS};
use crate::messages::{BusState, ServoCommand};
use crate::servo::{
    Clock, ManagerConfig, Result, SerialTransport, ServoManager, SimBus, SystemClock, Transport,
};

/// Manager over whichever transport the options selected
pub type BusManager = ServoManager<Box<dyn Transport>, SystemClock>;

/// Where and how to reach the servo bus
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub port: String,
    pub baudrate: u32,
    /// Use the in-process simulated bus instead of the serial port
    pub simulate: bool,
    pub manager: ManagerConfig,
}

/// Open the serial (or simulated) bus and wrap it in a manager
pub fn open_bus(options: &RuntimeOptions) -> Result<BusManager> {
    let transport: Box<dyn Transport> = if options.simulate {
        info!(
            "Using simulated bus with {} servo(s)",
            options.manager.servo_count
        );
        Box::new(SimBus::new(SystemClock, 0..options.manager.servo_count))
    } else {
        info!(
            "Opening servo bus on {} @ {} baud",
            options.port, options.baudrate
        );
        Box::new(SerialTransport::open_with_baudrate(
            &options.port,
            options.baudrate,
        )?)
    };

    Ok(ServoManager::new(transport, SystemClock, options.manager))
}

/// Apply one bus command to the manager
pub fn apply_command<T: Transport, C: Clock>(
    manager: &mut ServoManager<T, C>,
    cmd: &ServoCommand,
) -> Result<()> {
    match *cmd {
        ServoCommand::Ping { id } => manager.request_ping(id),
        ServoCommand::QueryAngle { id } => manager.request_query_angle(id),
        ServoCommand::SetAngle {
            id,
            angle,
            duration_ms,
            mean_dps,
            power,
        } => manager
            .request_set_angle(id, angle, duration_ms, mean_dps, power)
            .map(|_| ()),
        ServoCommand::SetSpin {
            id,
            mode,
            value,
            clockwise,
            speed,
        } => manager.request_set_spin(id, mode, value, clockwise, speed),
        ServoCommand::SetDamping { id, power } => manager.request_set_damping(id, power),
        // Runs one step per update() so the poll loop keeps publishing
        ServoCommand::Rescan { max_id } => manager.start_rescan(max_id),
    }
}

/// Current state of the whole bus
pub fn bus_state<T: Transport, C: Clock>(manager: &ServoManager<T, C>) -> BusState {
    BusState {
        servos: manager.snapshot(),
        all_stationary: manager.is_all_stationary(),
    }
}

pub async fn run(
    options: RuntimeOptions,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut manager = open_bus(&options)?;

    let online = manager.probe()?;
    info!("{} servo(s) online: {:?}", online.len(), online);
    manager.request_query_all_angles()?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_state = session.declare_publisher(TOPIC_STATE).await?;

    let mut tick = interval(Duration::from_millis(UPDATE_INTERVAL_MS));

    info!("Runtime started: {}ms poll interval", UPDATE_INTERVAL_MS);
    info!("Subscribed to: {}", TOPIC_CMD);
    info!("Publishing to: {}", TOPIC_STATE);

    loop {
        tick.tick().await;

        // 1. Drain all pending commands (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ServoCommand>(&payload) {
                Ok(cmd) => {
                    info!("Received command: {:?}", &cmd);
                    if let Err(e) = apply_command(&mut manager, &cmd) {
                        warn!("Command {:?} failed: {}", cmd, e);
                    }
                }
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                }
            }
        }

        // 2. Poll the bus: replies, motion sync
        manager.update()?;

        // 3. Publish state
        let state_json = serde_json::to_string(&bus_state(&manager))?;
        pub_state.put(state_json).await?;
    }
}
