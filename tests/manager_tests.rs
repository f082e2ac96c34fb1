use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use uart_servo_runtime::servo::protocol::{self, Command, Direction};
use uart_servo_runtime::servo::{
    ManagerConfig, ManualClock, Result, ServoError, ServoManager, SimBus, SpinMode, Transport,
};

/// Records every write and replays scripted reply bytes, one chunk per read
#[derive(Default)]
struct Wire {
    written: Vec<Vec<u8>>,
    incoming: VecDeque<Vec<u8>>,
}

#[derive(Clone, Default)]
struct MockTransport {
    wire: Rc<RefCell<Wire>>,
}

impl MockTransport {
    fn reply(&self, bytes: Vec<u8>) {
        self.wire.borrow_mut().incoming.push_back(bytes);
    }

    fn written(&self) -> Vec<Vec<u8>> {
        self.wire.borrow().written.clone()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.wire.borrow_mut().written.push(bytes.to_vec());
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        Ok(self.wire.borrow_mut().incoming.pop_front().unwrap_or_default())
    }
}

fn response(command: Command, payload: &[u8]) -> Vec<u8> {
    protocol::pack_as(Direction::Response, command as u8, payload)
}

fn angle_reply(id: u8, angle: f64) -> Vec<u8> {
    let tenths = ((angle * 10.0) as i16).to_le_bytes();
    response(Command::QueryAngle, &[id, tenths[0], tenths[1]])
}

type Harness = (ServoManager<MockTransport, ManualClock>, MockTransport, ManualClock);

fn manager(servo_count: u8) -> Harness {
    let transport = MockTransport::default();
    let clock = ManualClock::new();
    let config = ManagerConfig {
        servo_count,
        ..ManagerConfig::default()
    };
    let manager = ServoManager::new(transport.clone(), clock.clone(), config);
    (manager, transport, clock)
}

/// Manager with servo `id` known to rest at `angle`
fn settled_manager(servo_count: u8, id: u8, angle: f64) -> Harness {
    let (mut manager, transport, clock) = manager(servo_count);
    transport.reply(angle_reply(id, angle));
    manager.update().unwrap();
    (manager, transport, clock)
}

#[test]
fn eager_registry_from_servo_count() {
    let (manager, _, _) = manager(3);
    assert_eq!(manager.servo_ids(), vec![0, 1, 2]);
    assert!(manager.servo(1).is_some_and(|servo| !servo.is_online()));
    assert!(manager.is_all_stationary());
}

#[test]
fn ping_request_bytes() {
    let (mut manager, transport, _) = manager(1);
    manager.request_ping(3).unwrap();
    assert_eq!(transport.written(), vec![vec![0x12, 0x4C, 0x01, 0x01, 0x03, 0x63]]);
}

#[test]
fn ping_reply_registers_new_servo_online() {
    let (mut manager, transport, _) = manager(1);
    transport.reply(response(Command::Ping, &[7]));
    manager.update().unwrap();

    assert_eq!(manager.servo_ids(), vec![0, 7]);
    assert!(manager.servo(7).unwrap().is_online());
    assert!(!manager.servo(0).unwrap().is_online());
}

#[test]
fn angle_reply_creates_and_sets_angle() {
    let (mut manager, transport, _) = manager(0);
    transport.reply(angle_reply(4, -45.5));
    manager.update().unwrap();

    assert_eq!(manager.angle(4), Some(-45.5));
    assert!(manager.servo(4).unwrap().is_online());
}

#[test]
fn set_angle_timed_from_mean_speed() {
    let (mut manager, transport, _) = settled_manager(1, 0, 0.0);

    // 90 deg at the default 100 deg/s
    let duration = manager.request_set_angle(0, 90.0, None, None, 0).unwrap();
    assert_eq!(duration, 900);

    let expected = protocol::pack(
        Command::SetAngle as u8,
        &[0, 0x84, 0x03, 0x84, 0x03, 0x00, 0x00],
    );
    assert_eq!(transport.written(), vec![expected]);
}

#[test]
fn set_angle_explicit_duration_and_speed() {
    let (mut manager, _, clock) = settled_manager(1, 0, 10.0);

    assert_eq!(manager.request_set_angle(0, 30.0, None, Some(40.0), 0).unwrap(), 500);

    clock.advance_ms(600);
    manager.update().unwrap();
    assert_eq!(manager.request_set_angle(0, -30.0, Some(250), Some(1.0), 0).unwrap(), 250);
}

#[test]
fn set_angle_unknown_angle_uses_initial_motion() {
    let (mut manager, transport, clock) = manager(1);

    let duration = manager.request_set_angle(0, 60.0, Some(100), None, 300).unwrap();
    assert_eq!(duration, 800);
    let frame = &transport.written()[0];
    let (_, payload) = protocol::unpack_as(frame, Direction::Request).unwrap();
    assert_eq!(payload[3..5], 800u16.to_le_bytes());
    assert_eq!(payload[5..7], 300u16.to_le_bytes());

    clock.advance_ms(400);
    assert_eq!(manager.angle(0), None);
    clock.advance_ms(401);
    assert_eq!(manager.angle(0), Some(60.0));
}

#[test]
fn set_angle_rejects_unknown_servo_without_writing() {
    let (mut manager, transport, _) = manager(2);
    let result = manager.request_set_angle(9, 10.0, None, None, 0);
    assert!(matches!(result, Err(ServoError::UnknownServo { id: 9 })));
    assert!(transport.written().is_empty());
}

#[test]
fn set_angle_rejects_non_finite_angle() {
    let (mut manager, transport, _) = settled_manager(1, 0, 10.0);
    for angle in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let result = manager.request_set_angle(0, angle, Some(100), None, 0);
        assert!(matches!(result, Err(ServoError::InvalidAngle { id: 0, .. })));
    }
    assert!(transport.written().is_empty());
    assert_eq!(manager.servo(0).unwrap().target_angle(), Some(10.0));
}

#[test]
fn set_angle_clamped_to_wire_range() {
    let (mut manager, transport, clock) = settled_manager(2, 0, 0.0);
    manager.request_set_angle(0, 5000.0, Some(100), None, 0).unwrap();
    manager.request_set_angle(1, -5000.0, Some(100), None, 0).unwrap();

    let written = transport.written();
    let (_, high) = protocol::unpack_as(&written[0], Direction::Request).unwrap();
    let (_, low) = protocol::unpack_as(&written[1], Direction::Request).unwrap();
    assert_eq!(high[1..3], i16::MAX.to_le_bytes());
    assert_eq!(low[1..3], i16::MIN.to_le_bytes());

    clock.advance_ms(900);
    manager.update().unwrap();
    assert_eq!(manager.angle(0), Some(3276.7));
    assert_eq!(manager.angle(1), Some(-3276.8));
}

#[test]
fn estimate_follows_motion() {
    let (mut manager, _, clock) = settled_manager(1, 0, 0.0);
    manager.request_set_angle(0, 90.0, Some(1000), None, 0).unwrap();
    assert!(!manager.is_all_stationary());

    clock.advance_ms(500);
    manager.update().unwrap();
    let angle = manager.angle(0).unwrap();
    assert!((angle - 45.0).abs() < 1e-9, "got {}", angle);

    clock.advance_ms(700);
    manager.update().unwrap();
    assert_eq!(manager.angle(0), Some(90.0));
    assert!(manager.is_all_stationary());
}

#[test]
fn replies_matched_by_payload_id() {
    let (mut manager, transport, _) = manager(3);
    manager.request_query_angle(1).unwrap();
    manager.request_query_angle(2).unwrap();

    // Answers arrive out of request order
    let mut bytes = angle_reply(2, 20.0);
    bytes.extend(angle_reply(1, -10.0));
    transport.reply(bytes);
    manager.update().unwrap();

    assert_eq!(manager.angle(1), Some(-10.0));
    assert_eq!(manager.angle(2), Some(20.0));
    assert_eq!(manager.angle(0), None);
}

#[test]
fn reply_split_across_polls() {
    let (mut manager, transport, _) = manager(1);
    let reply = angle_reply(0, 12.5);
    transport.reply(reply[..3].to_vec());
    transport.reply(reply[3..].to_vec());

    manager.update().unwrap();
    assert_eq!(manager.angle(0), None);
    manager.update().unwrap();
    assert_eq!(manager.angle(0), Some(12.5));
}

#[test]
fn unknown_codes_and_noise_are_skipped() {
    let (mut manager, transport, _) = manager(1);

    let mut corrupt = response(Command::Ping, &[5]);
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0x01;

    let mut bytes = vec![0xAA, 0x05, 0x00];
    bytes.extend(protocol::pack_as(Direction::Response, 0x42, &[1, 2]));
    bytes.extend(corrupt);
    bytes.extend(response(Command::Ping, &[])); // undecodable payload
    bytes.extend(response(Command::Ping, &[6]));
    transport.reply(bytes);

    manager.update().unwrap();
    assert_eq!(manager.servo_ids(), vec![0, 6]);
}

#[test]
fn spin_and_damping_payloads() {
    let (mut manager, transport, _) = manager(1);
    manager.request_set_spin(0, SpinMode::Timed, 1500, true, None).unwrap();
    manager.request_set_spin(1, SpinMode::Round, 3, false, Some(45)).unwrap();
    manager.request_set_damping(2, 500).unwrap();

    let written = transport.written();
    // Default speed is the manager mean speed (100 deg/s)
    assert_eq!(
        written[0],
        protocol::pack(Command::SetSpin as u8, &[0, 0x83, 100, 0, 0xDC, 0x05])
    );
    assert_eq!(
        written[1],
        protocol::pack(Command::SetSpin as u8, &[1, 0x02, 45, 0, 3, 0])
    );
    assert_eq!(
        written[2],
        protocol::pack(Command::SetDamping as u8, &[2, 0xF4, 0x01])
    );
}

#[test]
fn query_all_and_info_requests() {
    let (mut manager, transport, _) = manager(3);
    manager.request_query_all_angles().unwrap();
    manager.request_query_info(1).unwrap();

    let written = transport.written();
    assert_eq!(written.len(), 4);
    for (id, frame) in written[..3].iter().enumerate() {
        assert_eq!(*frame, protocol::pack(Command::QueryAngle as u8, &[id as u8]));
    }
    assert_eq!(written[3], protocol::pack(Command::QueryInfo as u8, &[1]));
}

#[test]
fn probe_reports_responding_servos() {
    let clock = ManualClock::new();
    let bus = SimBus::new(clock.clone(), [0, 2]);
    let config = ManagerConfig {
        servo_count: 3,
        ..ManagerConfig::default()
    };
    let mut manager = ServoManager::new(bus, clock.clone(), config);

    assert_eq!(manager.probe().unwrap(), vec![0, 2]);
    assert!(!manager.servo(1).unwrap().is_online());
}

#[test]
fn rescan_rebuilds_registry() {
    let clock = ManualClock::new();
    let bus = SimBus::new(clock.clone(), [3, 9]);
    let config = ManagerConfig {
        servo_count: 2,
        ..ManagerConfig::default()
    };
    let mut manager = ServoManager::new(bus, clock.clone(), config);

    assert_eq!(manager.rescan(16).unwrap(), vec![3, 9]);
    assert_eq!(manager.servo_ids(), vec![3, 9]);
    assert!(manager.servo(3).unwrap().is_online());
    assert!(!manager.is_scanning());
}

#[test]
fn rescan_waits_for_slow_reply() {
    let (mut manager, transport, clock) = manager(0);
    manager.start_rescan(2).unwrap();

    // Id 0 answers late but inside its reply window
    clock.advance_ms(500);
    manager.update().unwrap();
    transport.reply(response(Command::Ping, &[0]));
    manager.update().unwrap();
    assert_eq!(manager.servo_ids(), vec![0]);

    // Id 1 never answers
    clock.advance_ms(999);
    manager.update().unwrap();
    assert!(manager.is_scanning());
    clock.advance_ms(1);
    manager.update().unwrap();
    assert!(!manager.is_scanning());

    let pings: Vec<Vec<u8>> = (0..2)
        .map(|id| protocol::pack(Command::Ping as u8, &[id]))
        .collect();
    assert_eq!(transport.written(), pings);
}

#[test]
fn sim_round_trip_move() {
    let clock = ManualClock::new();
    let bus = SimBus::new(clock.clone(), [0]);
    let mut manager = ServoManager::new(bus, clock.clone(), ManagerConfig::default());

    manager.request_query_angle(0).unwrap();
    manager.update().unwrap();
    assert_eq!(manager.angle(0), Some(0.0));

    manager.request_set_angle(0, -20.0, None, None, 0).unwrap();
    clock.advance_ms(100);
    manager.update().unwrap();
    let estimate = manager.angle(0).unwrap();
    let measured = manager.transport().servo_angle(0).unwrap();
    assert!((estimate - measured).abs() < 1e-9);

    clock.advance_ms(150);
    manager.request_query_angle(0).unwrap();
    manager.update().unwrap();
    assert_eq!(manager.angle(0), Some(-20.0));
}
