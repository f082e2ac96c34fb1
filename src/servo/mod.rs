// UART servo bus module
//
// Provides:
// - Fashion Star request/response frame codec
// - Byte-stream frame reassembler
// - Open-loop motion model with an injectable clock
// - Device manager tying them to a transport
// - Serial and simulated transports

pub mod error;
pub mod manager;
pub mod motion;
pub mod protocol;
pub mod reassembler;
pub mod sim;
pub mod transport;

pub use error::{Result, ServoError};
pub use manager::{ManagerConfig, Response, ServoManager, SpinMode};
pub use motion::{Clock, ManualClock, MotionModel, SystemClock};
pub use protocol::{Command, Direction};
pub use reassembler::FrameBuffer;
pub use sim::SimBus;
pub use transport::{SerialTransport, Transport};
