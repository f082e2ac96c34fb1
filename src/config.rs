// Serial, timing and topic defaults

// Serial port of the UART servo bus adapter
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUDRATE: u32 = 115_200;

// Short read timeout; reads only ever ask for bytes already buffered
pub const SERIAL_TIMEOUT_MS: u64 = 10;

// Reference poll cadence for ServoManager::update
pub const UPDATE_INTERVAL_MS: u64 = 10;

// Default angular speed used to time angle commands (deg/s)
pub const DEFAULT_MEAN_DPS: f64 = 100.0;

// Motion duration for a servo whose angle has never been observed
pub const INITIAL_MOTION_MS: u32 = 800;

// Discovery timing
pub const PROBE_WAIT_MS: u64 = 100;
pub const RESCAN_MAX_ID: u8 = 254;
pub const RESCAN_POLLS: usize = 20;
pub const RESCAN_POLL_INTERVAL_MS: u64 = 50;

// Zenoh topics
pub const TOPIC_CMD: &str = "uservo/cmd"; // commands
pub const TOPIC_STATE: &str = "uservo/state"; // servo states
