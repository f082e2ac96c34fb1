// Keyboard jog: A/D nudge the angle, R/F change the step, Q quit
//
// Usage: cargo run --example jog -- [port] [id]
// Pass "sim" as the port to jog a simulated servo.
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tracing::info;

use uart_servo_runtime::config::{DEFAULT_BAUDRATE, DEFAULT_PORT, UPDATE_INTERVAL_MS};
use uart_servo_runtime::runtime::{self, BusManager, RuntimeOptions};
use uart_servo_runtime::servo::ManagerConfig;

const STEPS: [f64; 3] = [1.0, 5.0, 15.0]; // deg per key press
const JOG_DPS: f64 = 90.0;
const ANGLE_LIMIT: f64 = 135.0;

fn main() -> JogResult {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_PORT.to_string());
    let id: u8 = match std::env::args().nth(2) {
        Some(arg) => arg.parse()?,
        None => 0,
    };

    let options = RuntimeOptions {
        simulate: port == "sim",
        port,
        baudrate: DEFAULT_BAUDRATE,
        manager: ManagerConfig {
            servo_count: id.saturating_add(1),
            ..ManagerConfig::default()
        },
    };
    let mut manager = runtime::open_bus(&options)?;
    manager.probe()?;
    manager.request_query_angle(id)?;

    info!("Controls: A/D=jog, R/F=step, Q=quit");
    print_step(0);

    enable_raw_mode()?;
    let result = run_jog(&mut manager, id);
    disable_raw_mode()?;

    result
}

type JogResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

fn run_jog(manager: &mut BusManager, id: u8) -> JogResult {
    let mut step_idx: usize = 0;

    loop {
        // Poll for key with the bus cadence as timeout
        if event::poll(Duration::from_millis(UPDATE_INTERVAL_MS))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('a') if pressed => jog(manager, id, -STEPS[step_idx])?,
                    KeyCode::Char('d') if pressed => jog(manager, id, STEPS[step_idx])?,

                    // Step size
                    KeyCode::Char('r') if pressed => {
                        step_idx = (step_idx + 1).min(STEPS.len() - 1);
                        print_step(step_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        step_idx = step_idx.saturating_sub(1);
                        print_step(step_idx);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        manager.update()?;
    }

    Ok(())
}

fn jog(manager: &mut BusManager, id: u8, delta: f64) -> JogResult {
    // Unknown angle: jog from zero, the servo will report back on the next query
    let present = manager.angle(id).unwrap_or(0.0);
    let target = (present + delta).clamp(-ANGLE_LIMIT, ANGLE_LIMIT);
    manager.request_set_angle(id, target, None, Some(JOG_DPS), 0)?;
    info!("Servo {}: {:.1} -> {:.1} deg\r", id, present, target);
    Ok(())
}

fn print_step(idx: usize) {
    info!("Step: {} deg\r", STEPS[idx]);
}
