//! Command line model and its resolution against the loaded configuration.

use crate::bridge::{BridgeOptions, RenderOptions};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::framing::LineSettings;
use crate::matcher::DisconnectMatcher;
use crate::port::{ModemLineRequest, PortConfiguration};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Requested level for a modem control output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LineLevel {
    On,
    Off,
}

impl From<LineLevel> for ModemLineRequest {
    fn from(level: LineLevel) -> Self {
        match level {
            LineLevel::On => ModemLineRequest::Assert,
            LineLevel::Off => ModemLineRequest::Deassert,
        }
    }
}

fn seconds_in(text: &str, max: f64) -> Result<f64, String> {
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| format!("'{text}' is not a number"))?;
    if value.is_finite() && (0.0..=max).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is outside 0 to {max} seconds"))
    }
}

fn parse_timeout(text: &str) -> Result<f64, String> {
    seconds_in(text, 1e6)
}

fn parse_wait(text: &str) -> Result<f64, String> {
    seconds_in(text, 100.0)
}

// Command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(
    name = "serial-bridge",
    version,
    about = "Redirects a local terminal or pipe to a serial device.",
    after_help = "Examples:\n  serial-bridge /dev/ttyUSB0 115200\n  serial-bridge /dev/ttyS0 9600N81 -T 2 -d 'Bye\\r'\n  echo 'AT' | serial-bridge -l 1 /dev/ttyACM0"
)]
pub struct Args {
    /// Serial device path or a configured alias.
    #[arg(required_unless_present = "list")]
    pub device: Option<String>,

    /// Line settings: baud rate, then optional parity (n/e/o), data bits (7/8)
    /// and stop bits (1/2), e.g. 115200 or 9600N81.
    pub framing: Option<String>,

    /// Exit after this many seconds without any I/O (0 disables).
    #[arg(short = 'T', long, value_name = "SECONDS", value_parser = parse_timeout)]
    pub timeout: Option<f64>,

    /// Exit after this many received lines (0 disables).
    #[arg(short = 'l', long, value_name = "N",
          value_parser = clap::value_parser!(u64).range(0..=1_000_000))]
    pub lines: Option<u64>,

    /// Exit when the device sends this text. Accepts \r \n \t \xHH escapes.
    #[arg(short = 'd', long, value_name = "TEXT")]
    pub disconnect: Option<String>,

    /// Prefix each received line with a unix timestamp.
    #[arg(short = 't', long)]
    pub timestamp: bool,

    /// Echo transmitted characters to the local output.
    #[arg(short = 'e', long)]
    pub local_echo: bool,

    /// Delay between transmitted characters.
    #[arg(short = 'w', long, value_name = "SECONDS", value_parser = parse_wait)]
    pub char_wait: Option<f64>,

    /// Delay after opening the device before any traffic.
    #[arg(short = 'W', long, value_name = "SECONDS", value_parser = parse_wait)]
    pub start_wait: Option<f64>,

    /// Colored output.
    #[arg(short = 'c', long)]
    pub color: bool,

    /// Show control characters as visible symbols.
    #[arg(short = 'n', long)]
    pub control_chars: bool,

    /// Report the exit reason and transfer counters.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Debug output on stderr (implies --verbose).
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// List the serial ports found on this system and exit.
    #[arg(long)]
    pub list: bool,

    /// Read local input from this file instead of stdin.
    #[arg(long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Write local output to this file instead of stdout.
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Set DTR when opening.
    #[arg(long, value_enum)]
    pub dtr: Option<LineLevel>,

    /// Set RTS when opening.
    #[arg(long, value_enum)]
    pub rts: Option<LineLevel>,

    /// Keep data already buffered in the device when opening.
    #[arg(long)]
    pub no_flush: bool,
}

/// Everything needed to run one session.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: PortConfiguration,
    pub bridge: BridgeOptions,
    pub matcher: DisconnectMatcher,
    pub start_wait: Duration,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub verbose: bool,
    pub debug: bool,
    pub colors: bool,
}

impl Args {
    pub fn verbose(&self) -> bool {
        self.verbose || self.debug
    }

    /// Combine the arguments with configuration defaults. Nothing here
    /// touches the device.
    pub fn resolve(&self, config: &Config) -> AppResult<Settings> {
        let device = self
            .device
            .as_deref()
            .map(|name| config.serial.resolve_port(name))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::argument("No port given (/dev/...)"))?;

        let line = match self.framing.as_deref() {
            Some(token) => token.parse::<LineSettings>()?,
            None => LineSettings {
                baud_rate: config.serial.default_baud,
                parity: None,
                data_bits: None,
                stop_bits: None,
            },
        };

        let session = &config.session;
        let tick = session.tick();
        let port = PortConfiguration {
            device,
            baud_rate: line.baud_rate,
            parity: line.parity.unwrap_or(config.serial.parity),
            data_bits: line.data_bits.unwrap_or(config.serial.data_bits),
            stop_bits: line.stop_bits.unwrap_or(config.serial.stop_bits),
            ignore_modem_lines: config.serial.ignore_modem_lines,
            flush_on_open: config.serial.flush_on_open && !self.no_flush,
            dtr: self.dtr.map_or(config.serial.dtr, Into::into),
            rts: self.rts.map_or(config.serial.rts, Into::into),
            timeout_us: i64::try_from(tick.as_micros()).unwrap_or(i64::MAX),
        };
        port.validate()?;

        let matcher = match self.disconnect.as_deref() {
            Some(text) => DisconnectMatcher::from_escaped(text)?,
            None => DisconnectMatcher::disabled(),
        };

        let colors = self.color || session.color;
        let bridge = BridgeOptions {
            tick,
            timeout: self
                .timeout
                .filter(|t| *t > 0.0)
                .map(Duration::from_secs_f64),
            max_lines: self.lines.filter(|n| *n > 0),
            char_wait: self
                .char_wait
                .map(Duration::from_secs_f64)
                .unwrap_or_default(),
            local_echo: self.local_echo || session.local_echo,
            render: RenderOptions {
                colors,
                control_chars: self.control_chars || session.control_chars,
                timestamps: self.timestamp || session.timestamps,
            },
        };

        let settings = Settings {
            port,
            bridge,
            matcher,
            start_wait: self
                .start_wait
                .map(Duration::from_secs_f64)
                .unwrap_or_default(),
            input: self.input.clone(),
            output: self.output.clone(),
            verbose: self.verbose(),
            debug: self.debug,
            colors,
        };
        debug!(?settings, "arguments resolved");
        Ok(settings)
    }
}
