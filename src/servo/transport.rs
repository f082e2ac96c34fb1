// Byte transport for the half-duplex servo bus

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::trace;

use super::error::Result;
use crate::config::{DEFAULT_BAUDRATE, SERIAL_TIMEOUT_MS};

/// Non-blocking byte pipe to the servo bus
pub trait Transport {
    /// Write a complete frame; no reply is awaited
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Return whatever bytes have arrived, possibly none, without blocking
    fn read_available(&mut self) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        (**self).read_available()
    }
}

/// Serial port connected to a UART servo bus adapter
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open the bus at the default baud rate
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let available = self.port.bytes_to_read()? as usize;
        if available == 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0u8; available];
        let read = self.port.read(&mut buffer)?;
        buffer.truncate(read);
        trace!("Received {} bytes: {:02X?}", read, buffer);
        Ok(buffer)
    }
}
