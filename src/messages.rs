// Message types exchanged with the runtime over zenoh

use serde::{Deserialize, Serialize};

use crate::config::RESCAN_MAX_ID;
use crate::servo::SpinMode;

// Command from scripts/orchestration -> runtime
// Tagged by "cmd", e.g. {"cmd":"set_angle","id":0,"angle":90.0}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ServoCommand {
    Ping {
        id: u8,
    },
    QueryAngle {
        id: u8,
    },
    SetAngle {
        id: u8,
        angle: f64,
        duration_ms: Option<u32>,
        mean_dps: Option<f64>,
        #[serde(default)]
        power: u16,
    },
    SetSpin {
        id: u8,
        mode: SpinMode,
        #[serde(default)]
        value: u16,
        #[serde(default = "default_clockwise")]
        clockwise: bool,
        speed: Option<u16>,
    },
    SetDamping {
        id: u8,
        #[serde(default)]
        power: u16,
    },
    Rescan {
        #[serde(default = "default_max_id")]
        max_id: u8,
    },
}

fn default_clockwise() -> bool {
    true
}

fn default_max_id() -> u8 {
    RESCAN_MAX_ID
}

/// State of one servo as published by the runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServoState {
    pub id: u8,
    /// Open-loop angle estimate (deg), null while unknown
    pub angle: Option<f64>,
    pub target: Option<f64>,
    pub online: bool,
    pub stationary: bool,
}

/// Whole-bus state published every tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BusState {
    pub servos: Vec<ServoState>,
    pub all_stationary: bool,
}
