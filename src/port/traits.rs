//! Core traits for serial port abstraction.
//!
//! Defines the `SerialPortAdapter` trait that allows both real serial ports
//! and mock implementations to be used interchangeably, together with the
//! configuration value types shared by the command line, the config file and
//! the port implementations.

use super::error::PortError;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Baud rates accepted by the port, in ascending order.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400, 460800, 921600,
];

/// Baud rates accepted by the port, in ascending order.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 7200, 9600, 14400, 19200,
    28800, 38400, 57600, 76800, 115200, 230400,
];

/// Check a baud rate against [`SUPPORTED_BAUD_RATES`].
///
/// Unsupported rates are rejected, never rounded; the error carries the next
/// higher supported rate as a hint.
pub fn validate_baud_rate(rate: u32) -> Result<u32, PortError> {
    if SUPPORTED_BAUD_RATES.contains(&rate) {
        Ok(rate)
    } else {
        Err(PortError::UnsupportedBaudRate {
            requested: rate,
            suggestion: SUPPORTED_BAUD_RATES.iter().copied().find(|r| *r > rate),
        })
    }
}

/// Configuration parameters for a serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfiguration {
    /// System path of the device, e.g. `/dev/ttyUSB0`.
    pub device: String,

    /// Baud rate (bits per second). Must be in [`SUPPORTED_BAUD_RATES`].
    pub baud_rate: u32,

    /// Parity checking mode.
    pub parity: Parity,

    /// Number of data bits (5, 6, 7, or 8).
    pub data_bits: DataBits,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Treat the link as always connected regardless of the modem status lines.
    pub ignore_modem_lines: bool,

    /// Discard stale buffered input/output right after opening.
    pub flush_on_open: bool,

    /// DTR state to apply when opening.
    pub dtr: ModemLineRequest,

    /// RTS state to apply when opening.
    pub rts: ModemLineRequest,

    /// Wait timeout in microseconds: negative blocks indefinitely, 0 returns
    /// immediately, positive waits at most that long.
    pub timeout_us: i64,
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud_rate: 9600,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            ignore_modem_lines: true,
            flush_on_open: false,
            dtr: ModemLineRequest::Unchanged,
            rts: ModemLineRequest::Unchanged,
            timeout_us: -1,
        }
    }
}

impl PortConfiguration {
    /// Create a configuration for `device` with default line settings.
    pub fn for_device(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Self::default()
        }
    }

    /// Check the values that can be checked without touching the device.
    pub fn validate(&self) -> Result<(), PortError> {
        validate_baud_rate(self.baud_rate)?;
        Ok(())
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    /// Number of bits as an integer.
    pub fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = u8;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(other),
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl Parity {
    /// The single letter used in framing tokens such as `9600N81`.
    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    Two,
}

impl StopBits {
    /// Number of stop bits as an integer.
    pub fn bits(self) -> u8 {
        match self {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Requested state of a modem control output line (DTR or RTS) at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModemLineRequest {
    /// Leave the line as it was found.
    #[default]
    Unchanged,
    Assert,
    Deassert,
}

bitflags! {
    /// Readiness classes reported by [`SerialPortAdapter::wait_for_events`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u8 {
        const READABLE = 0b001;
        const WRITABLE = 0b010;
        const ERROR    = 0b100;
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |mask: EventMask, c: char| if self.contains(mask) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(EventMask::READABLE, 'r'),
            flag(EventMask::WRITABLE, 'w'),
            flag(EventMask::ERROR, 'e')
        )
    }
}

/// Trait for serial port I/O operations.
///
/// This trait abstracts over serial port operations, allowing both
/// real hardware ports and mock implementations for testing. Reads and writes
/// never block: "nothing available" / "would block" is reported as `Ok(0)`.
pub trait SerialPortAdapter: Send + fmt::Debug {
    /// Get the name/path of this serial port.
    fn name(&self) -> &str;

    /// Whether the port currently holds an open handle.
    fn is_open(&self) -> bool;

    /// Read bytes from the serial port into the provided buffer.
    ///
    /// Returns the number of bytes actually read, 0 if nothing is pending.
    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// Write bytes to the serial port.
    ///
    /// Returns the number of bytes actually written. Partial writes are
    /// valid; the caller retries the remainder.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Wait up to the configured timeout for any of the requested readiness
    /// classes. An interrupting signal yields an empty mask.
    fn wait_for_events(&mut self, interest: EventMask) -> Result<EventMask, PortError>;

    /// Discard pending input and output. With `drain_output`, wait for the
    /// transmit buffer to be sent first.
    fn clear_buffers(&mut self, drain_output: bool) -> Result<(), PortError>;

    /// Flush, restore the settings captured at open time and release the
    /// handle. Closing a closed port is a no-op.
    fn close(&mut self);

    /// Get the current bytes available to read (if supported).
    ///
    /// Returns `None` if the operation is not supported or cannot be determined.
    fn bytes_to_read(&self) -> Option<usize> {
        None
    }
}
