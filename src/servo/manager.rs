// Device manager for a chain of UART servos
//
// Owns the transport, the reply reassembler and one motion model per servo id.
// Everything happens synchronously inside the request_* calls and update();
// nothing blocks except probe() and rescan(), which wait on the clock.
// start_rescan() runs the same discovery one step per update() instead.
//
// Replies are matched to servos by the id inside their payload, never by
// request order. Two in-flight requests of the same command to the same id
// cannot be told apart.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::error::{Result, ServoError};
use super::motion::{Clock, MotionModel};
use super::protocol::{self, Command, Direction};
use super::reassembler::FrameBuffer;
use super::transport::Transport;
use crate::config::{
    DEFAULT_MEAN_DPS, INITIAL_MOTION_MS, PROBE_WAIT_MS, RESCAN_POLLS, RESCAN_POLL_INTERVAL_MS,
};
use crate::messages::ServoState;

/// Bit set in the SET_SPIN method byte for clockwise rotation
const SPIN_CLOCKWISE: u8 = 0x80;

/// Angle range representable in the i16 tenths-of-degree wire field
const MIN_ANGLE: f64 = i16::MIN as f64 / 10.0;
const MAX_ANGLE: f64 = i16::MAX as f64 / 10.0;

/// How long a rescan waits for each id to answer its ping
const RESCAN_REPLY_TIMEOUT: Duration =
    Duration::from_millis(RESCAN_POLLS as u64 * RESCAN_POLL_INTERVAL_MS);

/// Wheel (continuous rotation) control modes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpinMode {
    Stop = 0,
    Normal = 1,
    /// Turn a fixed number of revolutions
    Round = 2,
    /// Turn for a fixed time in ms
    Timed = 3,
}

/// Manager construction parameters
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Servos registered up front, ids 0..servo_count
    pub servo_count: u8,
    /// Default angular speed (deg/s) used to time angle commands
    pub mean_dps: f64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            servo_count: 1,
            mean_dps: DEFAULT_MEAN_DPS,
        }
    }
}

/// A decoded servo reply
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Response {
    Ping { id: u8 },
    Angle { id: u8, angle: f64 },
}

impl Response {
    /// Decode a reply payload; `Ok(None)` for command codes without a handler
    pub fn decode(code: u8, payload: &[u8]) -> Result<Option<Self>> {
        match Command::try_from(code) {
            Ok(Command::Ping) => match payload {
                [id] => Ok(Some(Response::Ping { id: *id })),
                _ => Err(invalid_length(code, 1, payload.len())),
            },
            Ok(Command::QueryAngle) => match payload {
                [id, lo, hi] => {
                    // Wire unit is 0.1 degree
                    let tenths = i16::from_le_bytes([*lo, *hi]);
                    Ok(Some(Response::Angle {
                        id: *id,
                        angle: tenths as f64 / 10.0,
                    }))
                }
                _ => Err(invalid_length(code, 3, payload.len())),
            },
            _ => Ok(None),
        }
    }
}

fn invalid_length(code: u8, expected: usize, got: usize) -> ServoError {
    ServoError::InvalidResponse {
        code,
        reason: format!("Expected {} payload bytes, got {}", expected, got),
    }
}

/// Discovery in progress: the id awaiting a ping reply
#[derive(Debug, Clone, Copy)]
struct Scan {
    id: u8,
    max_id: u8,
    deadline: Instant,
}

/// Servo bus manager: request encoding, reply dispatch and motion tracking
pub struct ServoManager<T: Transport, C: Clock> {
    transport: T,
    clock: C,
    buffer: FrameBuffer,
    servos: BTreeMap<u8, MotionModel>,
    mean_dps: f64,
    scan: Option<Scan>,
}

impl<T: Transport, C: Clock> ServoManager<T, C> {
    /// Create a manager with servos 0..servo_count registered (offline, angle unknown)
    pub fn new(transport: T, clock: C, config: ManagerConfig) -> Self {
        let now = clock.now();
        let servos = (0..config.servo_count)
            .map(|id| (id, MotionModel::new(id, now)))
            .collect();

        Self {
            transport,
            clock,
            buffer: FrameBuffer::new(Direction::Response),
            servos,
            mean_dps: config.mean_dps,
            scan: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn mean_dps(&self) -> f64 {
        self.mean_dps
    }

    fn send_request(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        let frame = protocol::pack(command as u8, payload);
        debug!("Sending {:?}: {:02X?}", command, frame);
        self.transport.write(&frame)
    }

    /// Ask a servo to echo its id
    pub fn request_ping(&mut self, id: u8) -> Result<()> {
        debug!("Ping servo {}", id);
        self.send_request(Command::Ping, &[id])
    }

    /// Ask a servo for its present angle
    pub fn request_query_angle(&mut self, id: u8) -> Result<()> {
        self.send_request(Command::QueryAngle, &[id])
    }

    /// Query the angle of every registered servo
    pub fn request_query_all_angles(&mut self) -> Result<()> {
        let ids: Vec<u8> = self.servos.keys().copied().collect();
        for id in ids {
            self.request_query_angle(id)?;
        }
        Ok(())
    }

    /// Ask a servo for its full configuration (reply is not decoded)
    pub fn request_query_info(&mut self, id: u8) -> Result<()> {
        self.send_request(Command::QueryInfo, &[id])
    }

    /// Command a servo to `angle` degrees
    ///
    /// Without an explicit `duration_ms` the motion is timed from `mean_dps`
    /// (or the manager default) and the distance to the present estimate. A
    /// servo whose angle is still unknown always gets the initial-motion
    /// duration. The local motion model starts moving immediately.
    ///
    /// Angles outside the wire range are clamped to it; NaN and infinities
    /// are rejected before anything is sent.
    ///
    /// Returns the motion duration sent to the servo, in ms.
    pub fn request_set_angle(
        &mut self,
        id: u8,
        angle: f64,
        duration_ms: Option<u32>,
        mean_dps: Option<f64>,
        power: u16,
    ) -> Result<u32> {
        if !angle.is_finite() {
            warn!("Refusing to move servo {} to {} deg", id, angle);
            return Err(ServoError::InvalidAngle { id, angle });
        }
        let angle = angle.clamp(MIN_ANGLE, MAX_ANGLE);

        let now = self.clock.now();
        let default_dps = self.mean_dps;
        let servo = self.servos.get_mut(&id).ok_or_else(|| {
            warn!("Refusing to move unknown servo {}", id);
            ServoError::UnknownServo { id }
        })?;

        let duration_ms = match (servo.angle(now), duration_ms) {
            (None, _) => INITIAL_MOTION_MS,
            (Some(_), Some(explicit)) => explicit,
            (Some(present), None) => {
                let dps = mean_dps.filter(|dps| *dps > 0.0).unwrap_or(default_dps);
                ((angle - present).abs() / dps * 1000.0) as u32
            }
        };
        // Wire field is 16 bits
        let duration_ms = duration_ms.min(u16::MAX as u32);

        servo.move_to(angle, duration_ms, now);

        let tenths = (angle * 10.0) as i16;
        let mut payload = Vec::with_capacity(7);
        payload.push(id);
        payload.extend_from_slice(&tenths.to_le_bytes());
        payload.extend_from_slice(&(duration_ms as u16).to_le_bytes());
        payload.extend_from_slice(&power.to_le_bytes());
        self.send_request(Command::SetAngle, &payload)?;

        Ok(duration_ms)
    }

    /// Put a servo in wheel mode
    ///
    /// `value` is a revolution count in `Round` mode and a time in ms in
    /// `Timed` mode. `speed` (deg/s) defaults to the manager mean speed.
    pub fn request_set_spin(
        &mut self,
        id: u8,
        mode: SpinMode,
        value: u16,
        clockwise: bool,
        speed: Option<u16>,
    ) -> Result<()> {
        let method = if clockwise {
            mode as u8 | SPIN_CLOCKWISE
        } else {
            mode as u8
        };
        let speed = speed.unwrap_or(self.mean_dps as u16);

        let mut payload = Vec::with_capacity(6);
        payload.push(id);
        payload.push(method);
        payload.extend_from_slice(&speed.to_le_bytes());
        payload.extend_from_slice(&value.to_le_bytes());
        self.send_request(Command::SetSpin, &payload)
    }

    /// Put a servo in damping mode with the given holding power
    pub fn request_set_damping(&mut self, id: u8, power: u16) -> Result<()> {
        let mut payload = Vec::with_capacity(3);
        payload.push(id);
        payload.extend_from_slice(&power.to_le_bytes());
        self.send_request(Command::SetDamping, &payload)
    }

    /// Poll the bus: decode every complete reply, then settle finished motions
    pub fn update(&mut self) -> Result<()> {
        let bytes = self.transport.read_available()?;
        self.buffer.extend(&bytes);

        for frame in self.buffer.drain() {
            let Some((code, payload)) = protocol::unpack(&frame) else {
                continue;
            };

            match Response::decode(code, payload) {
                Ok(Some(response)) => self.handle(response),
                Ok(None) => warn!("Unknown response code: {}", code),
                Err(e) => warn!("Dropping reply: {}", e),
            }
        }

        let now = self.clock.now();
        for servo in self.servos.values_mut() {
            servo.update(now);
        }

        self.step_scan()
    }

    fn handle(&mut self, response: Response) {
        match response {
            Response::Ping { id } => self.on_ping_reply(id),
            Response::Angle { id, angle } => self.on_angle_reply(id, angle),
        }
    }

    fn on_ping_reply(&mut self, id: u8) {
        if self.servos.contains_key(&id) {
            info!("Ping echo from known servo {}", id);
        } else {
            info!("Ping echo from new servo {}", id);
        }
        self.get_or_create(id).set_online(true);
    }

    fn on_angle_reply(&mut self, id: u8, angle: f64) {
        debug!("Servo {} reports {:.1} deg", id, angle);
        let now = self.clock.now();
        let servo = self.get_or_create(id);
        servo.set_online(true);
        servo.observe_angle(angle, now);
    }

    /// Registry upsert: the model for `id`, created on first sight
    pub fn get_or_create(&mut self, id: u8) -> &mut MotionModel {
        let now = self.clock.now();
        self.servos
            .entry(id)
            .or_insert_with(|| MotionModel::new(id, now))
    }

    pub fn servo(&self, id: u8) -> Option<&MotionModel> {
        self.servos.get(&id)
    }

    /// Registered ids, ascending
    pub fn servo_ids(&self) -> Vec<u8> {
        self.servos.keys().copied().collect()
    }

    /// Estimated angle of a servo, `None` if unknown or unregistered
    pub fn angle(&mut self, id: u8) -> Option<f64> {
        let now = self.clock.now();
        self.servos.get_mut(&id)?.angle(now)
    }

    /// True when no registered servo is moving
    pub fn is_all_stationary(&self) -> bool {
        let now = self.clock.now();
        self.servos.values().all(|servo| servo.is_stationary(now))
    }

    /// Serializable view of every registered servo
    pub fn snapshot(&self) -> Vec<ServoState> {
        let now = self.clock.now();
        self.servos
            .values()
            .map(|servo| ServoState {
                id: servo.id(),
                angle: servo.estimate(now),
                target: servo.target_angle(),
                online: servo.is_online(),
                stationary: servo.is_stationary(now),
            })
            .collect()
    }

    /// Ping every registered servo in turn and report who answered
    pub fn probe(&mut self) -> Result<Vec<u8>> {
        let mut online = Vec::new();
        for id in self.servo_ids() {
            self.request_ping(id)?;
            self.clock.sleep(Duration::from_millis(PROBE_WAIT_MS));
            self.update()?;

            if self.servos.get(&id).is_some_and(|servo| servo.is_online()) {
                info!("Servo {} answered ping", id);
                online.push(id);
            } else {
                error!("Servo {} is offline, check wiring and power", id);
            }
        }
        Ok(online)
    }

    /// Rebuild the registry by pinging ids 0..max_id one at a time
    ///
    /// Waits on the clock until the whole range has been tried.
    pub fn rescan(&mut self, max_id: u8) -> Result<Vec<u8>> {
        self.start_rescan(max_id)?;
        self.update()?;
        while self.is_scanning() {
            self.clock.sleep(Duration::from_millis(RESCAN_POLL_INTERVAL_MS));
            self.update()?;
        }
        Ok(self.servo_ids())
    }

    /// Begin a rescan that advances inside `update()` without waiting
    ///
    /// The registry is cleared now and refilled as ping replies arrive. Each
    /// id gets the rescan reply timeout before the next one is pinged.
    pub fn start_rescan(&mut self, max_id: u8) -> Result<()> {
        info!("Rescanning servo ids 0..{}", max_id);
        self.servos.clear();
        self.scan = None;
        if max_id == 0 {
            info!("Rescan found 0 servo(s)");
            return Ok(());
        }
        self.scan_ping(0, max_id)
    }

    /// True while a rescan started by `start_rescan` is still running
    pub fn is_scanning(&self) -> bool {
        self.scan.is_some()
    }

    fn scan_ping(&mut self, id: u8, max_id: u8) -> Result<()> {
        self.request_ping(id)?;
        self.scan = Some(Scan {
            id,
            max_id,
            deadline: self.clock.now() + RESCAN_REPLY_TIMEOUT,
        });
        Ok(())
    }

    fn step_scan(&mut self) -> Result<()> {
        let Some(scan) = self.scan else {
            return Ok(());
        };
        let answered = self.servos.contains_key(&scan.id);
        if !answered && self.clock.now() < scan.deadline {
            return Ok(());
        }

        self.scan = None;
        // id < max_id <= u8::MAX
        let next = scan.id + 1;
        if next < scan.max_id {
            return self.scan_ping(next, scan.max_id);
        }

        let found = self.servo_ids();
        info!("Rescan found {} servo(s): {:?}", found.len(), found);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ping() {
        assert_eq!(
            Response::decode(1, &[4]).unwrap(),
            Some(Response::Ping { id: 4 })
        );
        assert!(Response::decode(1, &[]).is_err());
    }

    #[test]
    fn test_decode_angle() {
        // -90.5 deg = -905 tenths
        let raw = (-905i16).to_le_bytes();
        assert_eq!(
            Response::decode(10, &[2, raw[0], raw[1]]).unwrap(),
            Some(Response::Angle { id: 2, angle: -90.5 })
        );
        assert!(Response::decode(10, &[2, 0]).is_err());
    }

    #[test]
    fn test_decode_unhandled_codes() {
        assert_eq!(Response::decode(Command::SetAngle as u8, &[]).unwrap(), None);
        assert_eq!(Response::decode(200, &[1, 2, 3]).unwrap(), None);
    }

    #[test]
    fn test_spin_mode_values() {
        assert_eq!(SpinMode::Timed as u8 | SPIN_CLOCKWISE, 0x83);
        assert_eq!(SpinMode::Stop as u8, 0);
    }
}
