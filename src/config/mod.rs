//! Configuration module for serial-bridge.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_BRIDGE_CONFIG` environment variable (explicit path)
//! 2. `./serial-bridge.toml` (current directory)
//! 3. `~/.config/serial-bridge/config.toml` (platform config directory)
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Scalar values can be overridden via environment variables.
//! The pattern is: `SERIAL_BRIDGE_<SECTION>_<KEY>`
//!
//! Examples:
//! - `SERIAL_BRIDGE_SERIAL_DEFAULT_BAUD=9600`
//! - `SERIAL_BRIDGE_SESSION_COLOR=1`
//!
//! Command line flags take precedence over everything here.
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_bridge::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! println!("Default baud: {}", loader.config().serial.default_baud);
//! # Ok::<(), serial_bridge::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, load_from_str, resolve_config_path,
    ConfigLoader,
};
pub use schema::{Config, LogFormat, LoggingConfig, SerialConfig, SessionConfig};
