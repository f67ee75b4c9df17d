//! Serial Bridge Library
//!
//! Redirects a local terminal or pipe to a serial device and back, with
//! inactivity timeout, received-line limit and a disconnect trigger as
//! stop conditions, and guaranteed restoration of device and terminal
//! settings on every exit path.
//!
//! # Modules
//!
//! - `port`: serial port abstraction, termios implementation and mock
//! - `framing`: parser for `115200N81` style line settings
//! - `matcher`: streaming disconnect-sequence detection
//! - `session`: per-run counters and line detection
//! - `bridge`: the relay loop, local console and readiness waiting
//! - `lifecycle`: exit funnel and signal handling
//! - `config`: configuration management with TOML support
//! - `cli`: command line model
//! - `error`: unified error handling and exit codes

#[cfg(not(unix))]
compile_error!("serial_bridge needs a Unix terminal interface");

pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod framing;
pub mod lifecycle;
pub mod logging;
pub mod matcher;
pub mod port;
pub mod session;

// Re-export commonly used types for convenience
pub use bridge::{Bridge, BridgeError, BridgeOptions};
pub use error::{AppError, AppResult};
pub use framing::{FramingError, LineSettings};
pub use lifecycle::{ExitCode, ExitController, Outcome, StopFlag, StopReason};
pub use matcher::{DisconnectMatcher, MatcherError};
pub use port::{
    DataBits, MockSerialPort, Parity, PortConfiguration, PortError, SerialPortAdapter, StopBits,
    TtyPort,
};
pub use session::{BridgeSession, SessionStats};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
