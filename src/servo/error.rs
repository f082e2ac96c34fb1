// Error types for the UART servo bus

/// Error types for servo bus communication
#[derive(Debug, thiserror::Error)]
pub enum ServoError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown servo id {id}")]
    UnknownServo { id: u8 },

    #[error("Invalid angle {angle} for servo {id}")]
    InvalidAngle { id: u8, angle: f64 },

    #[error("Invalid response for command {code}: {reason}")]
    InvalidResponse { code: u8, reason: String },
}

pub type Result<T> = std::result::Result<T, ServoError>;
