//! Port abstraction layer for serial communication.
//!
//! Provides the adapter trait, the terminal-device implementation and a mock
//! for tests, plus enumeration of the ports present on the system.

pub mod error;
pub mod mock;
pub mod traits;
#[cfg(unix)]
pub mod tty_port;

pub use error::PortError;
pub use mock::MockSerialPort;
pub use traits::*;
#[cfg(unix)]
pub use tty_port::TtyPort;

/// A serial port found on the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortListing {
    pub name: String,
    pub description: String,
}

/// Enumerate the serial ports the operating system knows about.
pub fn available_ports() -> Result<Vec<PortListing>, PortError> {
    let ports = serialport::available_ports()
        .map_err(|e| PortError::open_failed("<enumeration>", e.to_string()))?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => format!(
                    "USB {:04x}:{:04x}{}",
                    info.vid,
                    info.pid,
                    info.product.map(|s| format!(" {s}")).unwrap_or_default()
                ),
                serialport::SerialPortType::PciPort => "PCI".to_string(),
                serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                serialport::SerialPortType::Unknown => "Unknown".to_string(),
            };
            PortListing {
                name: p.port_name,
                description,
            }
        })
        .collect())
}
