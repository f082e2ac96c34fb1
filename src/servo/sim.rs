// Simulated servo bus
//
// An in-process stand-in for the UART adapter: request frames written to it
// are reassembled and answered the way real servos would, with replies queued
// for the next read_available(). Simulated servos move linearly over the
// commanded duration on the shared clock.

use std::collections::BTreeMap;
use tracing::{debug, trace};

use super::error::Result;
use super::motion::{Clock, MotionModel};
use super::protocol::{self, Command, Direction};
use super::reassembler::FrameBuffer;
use super::transport::Transport;

/// Servo bus simulation implementing [`Transport`]
pub struct SimBus<C: Clock> {
    clock: C,
    requests: FrameBuffer,
    servos: BTreeMap<u8, MotionModel>,
    outgoing: Vec<u8>,
}

impl<C: Clock> SimBus<C> {
    /// Simulate servos with the given ids, all resting at 0 degrees
    pub fn new(clock: C, ids: impl IntoIterator<Item = u8>) -> Self {
        let now = clock.now();
        let servos = ids
            .into_iter()
            .map(|id| {
                let mut servo = MotionModel::new(id, now);
                servo.observe_angle(0.0, now);
                (id, servo)
            })
            .collect();

        Self {
            clock,
            requests: FrameBuffer::new(Direction::Request),
            servos,
            outgoing: Vec::new(),
        }
    }

    /// Place a simulated servo at `angle` instantly
    pub fn set_angle(&mut self, id: u8, angle: f64) {
        let now = self.clock.now();
        if let Some(servo) = self.servos.get_mut(&id) {
            servo.move_to(angle, 0, now);
        }
    }

    /// Present angle of a simulated servo
    pub fn servo_angle(&self, id: u8) -> Option<f64> {
        self.servos.get(&id)?.estimate(self.clock.now())
    }

    /// Inject raw bytes into the reply stream
    pub fn inject(&mut self, bytes: &[u8]) {
        self.outgoing.extend_from_slice(bytes);
    }

    fn reply(&mut self, command: Command, payload: &[u8]) {
        let frame = protocol::pack_as(Direction::Response, command as u8, payload);
        self.outgoing.extend_from_slice(&frame);
    }

    fn handle_request(&mut self, code: u8, payload: &[u8]) {
        let now = self.clock.now();
        match (Command::try_from(code), payload) {
            (Ok(Command::Ping), [id]) if self.servos.contains_key(id) => {
                self.reply(Command::Ping, &[*id]);
            }
            (Ok(Command::QueryAngle), [id]) => {
                let Some(angle) = self.servo_angle(*id) else {
                    return;
                };
                let tenths = ((angle * 10.0).round() as i16).to_le_bytes();
                self.reply(Command::QueryAngle, &[*id, tenths[0], tenths[1]]);
            }
            (Ok(Command::SetAngle), [id, a0, a1, d0, d1, _, _]) => {
                let angle = i16::from_le_bytes([*a0, *a1]) as f64 / 10.0;
                let duration_ms = u16::from_le_bytes([*d0, *d1]) as u32;
                if let Some(servo) = self.servos.get_mut(id) {
                    debug!("Sim servo {} -> {:.1} deg over {} ms", id, angle, duration_ms);
                    servo.move_to(angle, duration_ms, now);
                }
            }
            _ => trace!("Sim bus ignoring command {} ({} bytes)", code, payload.len()),
        }
    }
}

impl<C: Clock> Transport for SimBus<C> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.requests.extend(bytes);
        for frame in self.requests.drain() {
            if let Some((code, payload)) = protocol::unpack_as(&frame, Direction::Request) {
                self.handle_request(code, payload);
            }
        }
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.outgoing))
    }
}
