//! Serial driver for the RS-485 bus
//!
//! Provides async frame I/O over a tokio-serial port. Framing and validation
//! live in [`crate::frame`]; this layer only moves bytes.

use async_trait::async_trait;
use cooltower_core::config::{Parity, SerialConfig};
use cooltower_core::{CoolTowerError, Result};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, warn};

use crate::frame::{self, hex};

/// Byte transport for Modbus RTU frames
///
/// Implemented by [`SerialDriver`] for real hardware and by
/// [`crate::simulator::SimulatedBus`] for mock mode and tests.
#[async_trait]
pub trait RtuTransport: Send {
    /// Write one complete request frame
    async fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Read a response of up to `expected` bytes.
    ///
    /// Returns whatever arrived once the response is complete or `window`
    /// elapses, so a short or empty buffer means the device went quiet.
    async fn receive(&mut self, expected: usize, window: Duration) -> Result<Vec<u8>>;

    /// Discard unread input
    fn clear_input_buffer(&mut self) -> Result<()>;

    /// Port path, for logging
    fn port_path(&self) -> Option<&str>;
}

/// Serial driver for the drive bus
pub struct SerialDriver {
    port: SerialStream,
    port_path: String,
    write_timeout: Duration,
    debug_frames: bool,
}

fn data_bits(bits: u8) -> Result<tokio_serial::DataBits> {
    match bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(CoolTowerError::Config(format!(
            "Unsupported data bits: {}",
            other
        ))),
    }
}

fn stop_bits(bits: u8) -> Result<tokio_serial::StopBits> {
    match bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        other => Err(CoolTowerError::Config(format!(
            "Unsupported stop bits: {}",
            other
        ))),
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    }
}

impl SerialDriver {
    /// Open the serial port described by `config`.
    pub fn new(config: &SerialConfig) -> Result<Self> {
        debug!(
            "Opening serial port: {} @ {} baud, parity={:?}, {} data bits, {} stop bits",
            config.port, config.baud_rate, config.parity, config.data_bits, config.stop_bits
        );

        let port = tokio_serial::new(&config.port, config.baud_rate)
            .timeout(Duration::from_millis(config.response_timeout_ms))
            .data_bits(data_bits(config.data_bits)?)
            .parity(parity(config.parity))
            .stop_bits(stop_bits(config.stop_bits)?)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                error!("Failed to open serial port {}: {}", config.port, e);
                CoolTowerError::Transport(format!("Failed to open serial port: {}", e))
            })?;

        debug!("Serial port opened successfully");

        if config.debug_frames {
            debug!("Frame debug logging enabled");
        }

        Ok(Self {
            port,
            port_path: config.port.clone(),
            write_timeout: Duration::from_millis(config.response_timeout_ms),
            debug_frames: config.debug_frames,
        })
    }
}

#[async_trait]
impl RtuTransport for SerialDriver {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        if self.debug_frames {
            debug!("TX: {}", hex(frame));
        }

        timeout(self.write_timeout, self.port.write_all(frame))
            .await
            .map_err(|_| {
                error!("Write timeout");
                CoolTowerError::Timeout("Write operation timed out".to_string())
            })?
            .map_err(|e| {
                error!("Write failed: {}", e);
                CoolTowerError::Transport(format!("Write failed: {}", e))
            })?;

        timeout(self.write_timeout, self.port.flush())
            .await
            .map_err(|_| CoolTowerError::Timeout("Flush operation timed out".to_string()))?
            .map_err(|e| CoolTowerError::Transport(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    async fn receive(&mut self, expected: usize, window: Duration) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(expected);
        let mut chunk = [0u8; 256];
        let deadline = Instant::now() + window;

        while !frame::is_complete(&buffer, expected) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, self.port.read(&mut chunk)).await {
                Err(_) => break,
                Ok(Ok(0)) => {
                    warn!("Serial port returned EOF - adapter may have been unplugged");
                    return Err(CoolTowerError::Transport(
                        "Serial port returned EOF".to_string(),
                    ));
                }
                Ok(Ok(n)) => buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => {
                    error!("Read error: {}", e);
                    return Err(CoolTowerError::Transport(format!("Read error: {}", e)));
                }
            }
        }

        if self.debug_frames {
            debug!("RX: {}", hex(&buffer));
        }
        Ok(buffer)
    }

    fn clear_input_buffer(&mut self) -> Result<()> {
        self.port
            .clear(tokio_serial::ClearBuffer::Input)
            .map_err(|e| {
                warn!("Failed to clear input buffer: {}", e);
                CoolTowerError::Transport(format!("Failed to clear buffer: {}", e))
            })
    }

    fn port_path(&self) -> Option<&str> {
        Some(&self.port_path)
    }
}

/// List serial ports present on the host, for diagnostics.
pub fn available_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(|e| {
        error!("Failed to enumerate serial ports: {}", e);
        CoolTowerError::Transport(format!("Failed to enumerate ports: {}", e))
    })?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_ports() {
        // Only checks that enumeration does not panic
        let _ = available_ports();
    }

    #[test]
    fn test_framing_conversions() {
        assert!(matches!(data_bits(8), Ok(tokio_serial::DataBits::Eight)));
        assert!(data_bits(9).is_err());
        assert!(matches!(stop_bits(2), Ok(tokio_serial::StopBits::Two)));
        assert!(stop_bits(0).is_err());
        assert_eq!(parity(Parity::Even), tokio_serial::Parity::Even);
    }

    #[tokio::test]
    async fn test_open_missing_port_is_transport_error() {
        let config = SerialConfig {
            port: "/dev/does-not-exist-cooltower".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            SerialDriver::new(&config),
            Err(CoolTowerError::Transport(_))
        ));
    }
}
