// Open-loop motion model for one servo
//
// The protocol has no position streaming, so between a SET_ANGLE command and
// the end of its motion window the angle is estimated by linear interpolation
// over time. Query replies overwrite the estimate with a measurement.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Source of "now" for motion estimation
pub trait Clock {
    fn now(&self) -> Instant;

    /// Block (or pretend to) for `duration`
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually advanced clock; clones share the same time
///
/// `sleep` advances the shared time instead of blocking.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Kinematic state of a single servo
#[derive(Debug, Clone)]
pub struct MotionModel {
    id: u8,
    current_angle: Option<f64>,
    target_angle: Option<f64>,
    motion_start: Instant,
    motion_duration_ms: u32,
    is_online: bool,
}

impl MotionModel {
    /// A servo with unknown angle, not yet seen on the bus
    pub fn new(id: u8, now: Instant) -> Self {
        Self {
            id,
            current_angle: None,
            target_angle: None,
            motion_start: now,
            motion_duration_ms: 0,
            is_online: false,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn is_online(&self) -> bool {
        self.is_online
    }

    pub fn set_online(&mut self, online: bool) {
        self.is_online = online;
    }

    pub fn current_angle(&self) -> Option<f64> {
        self.current_angle
    }

    pub fn target_angle(&self) -> Option<f64> {
        self.target_angle
    }

    pub fn motion_duration_ms(&self) -> u32 {
        self.motion_duration_ms
    }

    /// Start a new motion towards `target` lasting `duration_ms`
    ///
    /// Interpolation restarts from the estimate at `now`, so a command issued
    /// mid-motion continues from where the servo is believed to be.
    pub fn move_to(&mut self, target: f64, duration_ms: u32, now: Instant) {
        self.current_angle = self.angle(now);
        self.target_angle = Some(target);
        self.motion_start = now;
        self.motion_duration_ms = duration_ms;
    }

    /// Record a measured angle from a query reply
    ///
    /// A servo at rest adopts the measurement as its target too, otherwise the
    /// next sync would snap back to the commanded angle.
    pub fn observe_angle(&mut self, angle: f64, now: Instant) {
        let stationary = self.is_stationary(now);
        self.current_angle = Some(angle);
        if stationary {
            self.target_angle = Some(angle);
            self.motion_duration_ms = 0;
        }
    }

    /// True once the motion window has elapsed or start and target coincide
    pub fn is_stationary(&self, now: Instant) -> bool {
        if self.current_angle == self.target_angle || self.motion_duration_ms == 0 {
            return true;
        }

        self.elapsed_ms(now) > self.motion_duration_ms as f64
    }

    /// Estimated angle at `now`, syncing the current angle once at rest
    pub fn angle(&mut self, now: Instant) -> Option<f64> {
        if self.is_stationary(now) {
            self.current_angle = self.target_angle;
        }
        self.estimate(now)
    }

    /// Estimated angle at `now` without touching the model
    pub fn estimate(&self, now: Instant) -> Option<f64> {
        if self.is_stationary(now) {
            return self.target_angle;
        }

        let (start, target) = (self.current_angle?, self.target_angle?);
        let ratio = (self.elapsed_ms(now) / self.motion_duration_ms as f64).clamp(0.0, 1.0);
        if ratio >= 1.0 {
            return Some(target);
        }

        let angle = start + (target - start) * ratio;
        Some(angle.clamp(start.min(target), start.max(target)))
    }

    /// Per-poll sync: settle the model once its motion has finished
    pub fn update(&mut self, now: Instant) {
        if self.is_stationary(now) {
            self.current_angle = self.target_angle;
            self.motion_duration_ms = 0;
        }
    }

    fn elapsed_ms(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.motion_start).as_secs_f64() * 1000.0
    }
}
