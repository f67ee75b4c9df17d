//! Unified application error type.
//!
//! Every failure that can end the program is an `AppError`, and every
//! `AppError` maps to exactly one process exit code.

use crate::bridge::BridgeError;
use crate::config::ConfigError;
use crate::framing::FramingError;
use crate::lifecycle::ExitCode;
use crate::matcher::MatcherError;
use crate::port::PortError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Bad command line value.
    #[error("{0}")]
    Argument(String),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Matcher(#[from] MatcherError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error("{0}")]
    Fatal(String),
}

impl AppError {
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Argument(_) | Self::Framing(_) | Self::Matcher(_) | Self::Config(_) => {
                ExitCode::Argument
            }
            Self::Port(e) if e.is_configuration_error() => ExitCode::Argument,
            Self::Port(_) => ExitCode::Io,
            Self::Bridge(e) if e.is_fatal() => ExitCode::Fatal,
            Self::Bridge(_) => ExitCode::Io,
            Self::Signals(_) | Self::Fatal(_) => ExitCode::Fatal,
        }
    }
}

/// A specialized `Result` type for application-level operations.
pub type AppResult<T> = Result<T, AppError>;
