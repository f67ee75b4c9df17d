//! Port-specific error types.
//!
//! Defines error types for serial port operations, separate from application-level
//! errors to maintain clean separation of concerns. Every variant names the device
//! it concerns so a single diagnostic line is enough for the user.

use thiserror::Error;

/// Errors that can occur during serial port operations.
#[derive(Debug, Error)]
pub enum PortError {
    /// The device could not be opened or locked.
    #[error("Failed to open port '{device}': {reason}")]
    OpenFailed { device: String, reason: String },

    /// The device opened but is not a terminal-class device.
    #[error("Port is no TTY: {0}")]
    NotATty(String),

    /// The current line discipline could not be read.
    #[error("Failed to get port terminal attributes of '{device}': {source}")]
    AttributeReadFailed {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// The requested line discipline could not be applied.
    #[error("Failed to set port terminal attributes of '{device}': {source}")]
    AttributeWriteFailed {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing the modem control lines failed.
    #[error("Modem control line access failed on '{device}': {source}")]
    ModemLinesFailed {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// The baud rate is not one of the supported standard rates.
    #[error("Invalid baud rate: {requested}{}", suggestion_text(.suggestion))]
    UnsupportedBaudRate {
        requested: u32,
        suggestion: Option<u32>,
    },

    /// Reading from the device failed.
    #[error("Reading port '{device}' failed: {source}")]
    ReadFailed {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing to the device failed.
    #[error("Failed write to port '{device}': {source}")]
    WriteFailed {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting for readiness on the device failed.
    #[error("Waiting for i/o states of '{device}' failed: {source}")]
    WaitFailed {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// Attempted to use a port that's not open.
    #[error("Port is not open: {0}")]
    NotOpen(String),
}

fn suggestion_text(suggestion: &Option<u32>) -> String {
    suggestion
        .map(|rate| format!(" (Did you mean {rate})"))
        .unwrap_or_default()
}

impl PortError {
    /// Create an OpenFailed error from a device path and a reason.
    pub fn open_failed(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OpenFailed {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// True for errors raised while opening and configuring the device.
    pub fn is_open_error(&self) -> bool {
        matches!(
            self,
            Self::OpenFailed { .. }
                | Self::NotATty(_)
                | Self::AttributeReadFailed { .. }
                | Self::AttributeWriteFailed { .. }
                | Self::ModemLinesFailed { .. }
        )
    }

    /// True for configuration mistakes that never reached the device.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::UnsupportedBaudRate { .. })
    }
}
