//! The bridge loop: relays bytes between the serial device and the local
//! console, one bounded wait per tick, until a stop condition is reached.
//!
//! Each tick charges the inactivity budget, waits for readiness, drains the
//! serial side first and then services local input. Stop conditions are the
//! inactivity timeout, the received-line limit, the disconnect trigger and a
//! pending termination signal; any I/O failure ends the loop with an error.

pub mod console;
pub mod render;
pub mod waiter;

pub use console::{Console, ScriptedConsole, StdConsole};
pub use render::{Color, RenderOptions, Renderer};
pub use waiter::{Channel, PollWaiter, Readiness, ScriptedWaiter, WaitRequest, Waiter};

use crate::lifecycle::{StopFlag, StopReason};
use crate::matcher::DisconnectMatcher;
use crate::port::{EventMask, PortError, SerialPortAdapter};
use crate::session::{BridgeSession, ByteClass, SessionStats};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Size of the relay buffers in both directions.
pub const RELAY_BUFFER_SIZE: usize = 256;

/// Default scheduling tick.
pub const DEFAULT_TICK: Duration = Duration::from_millis(1);

/// Failures that end the bridge loop.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Port(#[from] PortError),

    #[error("I/O {0} error")]
    Channel(Channel),

    #[error("Reading local input failed: {0}")]
    LocalRead(#[source] io::Error),

    #[error("Writing to local output failed: {0}")]
    LocalWrite(#[source] io::Error),

    #[error("Failed to open {what} '{path}': {source}")]
    LocalOpen {
        what: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Waiting for i/o states failed: {0}")]
    Wait(#[source] io::Error),
}

impl BridgeError {
    /// A failure of the wait primitive itself rather than of a stream.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Wait(_))
    }
}

/// Behaviour of one bridge run.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub tick: Duration,
    /// Inactivity timeout; `None` disables it.
    pub timeout: Option<Duration>,
    /// Stop after this many received lines; `None` disables it.
    pub max_lines: Option<u64>,
    /// Delay between transmitted characters; zero sends whole buffers.
    pub char_wait: Duration,
    pub local_echo: bool,
    pub render: RenderOptions,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            timeout: None,
            max_lines: None,
            char_wait: Duration::ZERO,
            local_echo: false,
            render: RenderOptions::default(),
        }
    }
}

/// Owns the session state and drives the serial port and console it is
/// handed on each call.
pub struct Bridge {
    options: BridgeOptions,
    session: BridgeSession,
    matcher: DisconnectMatcher,
    renderer: Renderer,
}

impl Bridge {
    pub fn new(options: BridgeOptions, matcher: DisconnectMatcher) -> Self {
        Self {
            session: BridgeSession::new(options.timeout),
            renderer: Renderer::new(options.render),
            options,
            matcher,
        }
    }

    /// Replace the renderer, e.g. to fix the timestamp clock.
    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn session(&self) -> &BridgeSession {
        &self.session
    }

    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }

    /// Run ticks until a stop condition or an error.
    pub fn run<S, C, W>(
        &mut self,
        serial: &mut S,
        console: &mut C,
        waiter: &mut W,
        stop: &StopFlag,
    ) -> Result<StopReason, BridgeError>
    where
        S: SerialPortAdapter,
        C: Console,
        W: Waiter<S, C>,
    {
        debug!(options = ?self.options, matcher = ?self.matcher, "bridge running");
        let result = loop {
            match self.tick(serial, console, waiter, stop) {
                Ok(None) => continue,
                Ok(Some(reason)) => break Ok(reason),
                Err(e) => break Err(e),
            }
        };
        self.renderer.finish();
        if self.renderer.has_pending() {
            let reset = self.renderer.take();
            if let Err(e) = console
                .write_output(&reset)
                .and_then(|()| console.flush_output())
            {
                debug!(error = %e, "final color reset could not be written");
            }
        }
        debug!(stats = ?self.session.stats(), "bridge stopped");
        result
    }

    /// One scheduling step.
    pub fn tick<S, C, W>(
        &mut self,
        serial: &mut S,
        console: &mut C,
        waiter: &mut W,
        stop: &StopFlag,
    ) -> Result<Option<StopReason>, BridgeError>
    where
        S: SerialPortAdapter,
        C: Console,
        W: Waiter<S, C>,
    {
        if let Some(signal) = stop.pending() {
            return Ok(Some(StopReason::Signal(signal)));
        }

        let tick = self.options.tick;
        if self.session.charge_tick(tick) {
            if let Some(timeout) = self.session.timeout() {
                return Ok(Some(StopReason::Timeout(timeout)));
            }
        }

        let pacing = self.session.pacing_pending(tick);
        let request = WaitRequest {
            want_input: !pacing && !self.session.input_eof(),
            input_closed: self.session.input_eof(),
            timeout: tick,
        };
        let ready = waiter.wait(serial, console, request)?;
        if ready.any() {
            self.session.note_activity();
        }
        if let Some(channel) = ready.error {
            return Err(BridgeError::Channel(channel));
        }

        if ready.serial_readable {
            if let Some(reason) = self.drain_serial(serial, console)? {
                return Ok(Some(reason));
            }
        }

        if ready.input_readable {
            self.service_input(serial, console)?;
        }

        Ok(None)
    }

    fn drain_serial<S: SerialPortAdapter, C: Console>(
        &mut self,
        serial: &mut S,
        console: &mut C,
    ) -> Result<Option<StopReason>, BridgeError> {
        let mut buffer = [0u8; RELAY_BUFFER_SIZE];
        loop {
            let n = serial.read_bytes(&mut buffer)?;
            if n == 0 {
                break;
            }
            debug!("[RX {n}]");
            if let Some(reason) = self.relay_received(&buffer[..n]) {
                self.flush_rendered(console)?;
                return Ok(Some(reason));
            }
            if n < buffer.len() {
                break;
            }
        }
        self.flush_rendered(console)?;
        Ok(None)
    }

    fn relay_received(&mut self, data: &[u8]) -> Option<StopReason> {
        for &byte in data {
            let class = self.session.receive_byte(byte);
            self.renderer.received(byte, class);

            if class == (ByteClass::Terminator { counted: true }) {
                let lines = self.session.stats().lines_received;
                if self.options.max_lines.is_some_and(|max| lines >= max) {
                    if byte != b'\n' {
                        self.renderer.newline();
                    }
                    return Some(StopReason::LineLimit(lines));
                }
            }

            if self.matcher.feed(byte) {
                debug!(trigger = ?String::from_utf8_lossy(self.matcher.trigger()), "disconnect sequence detected");
                return Some(StopReason::Disconnect);
            }
        }
        None
    }

    fn service_input<S: SerialPortAdapter, C: Console>(
        &mut self,
        serial: &mut S,
        console: &mut C,
    ) -> Result<(), BridgeError> {
        self.session.start_send_delay(self.options.char_wait);
        let mut buffer = [0u8; RELAY_BUFFER_SIZE];
        let limit = if self.options.char_wait.is_zero() {
            buffer.len()
        } else {
            1
        };

        let n = match console.read_input(&mut buffer[..limit]) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                return Ok(())
            }
            Err(e) => return Err(BridgeError::LocalRead(e)),
        };

        if n == 0 {
            if !console.input_is_interactive() {
                debug!("[EOF IN]");
                self.session.mark_input_eof();
            }
            return Ok(());
        }

        debug!("[TX {n}]");
        write_all_serial(serial, &buffer[..n])?;
        self.session.record_sent(n);

        if self.options.local_echo {
            for &byte in &buffer[..n] {
                self.renderer.echoed(byte);
            }
            self.flush_rendered(console)?;
        }
        Ok(())
    }

    fn flush_rendered<C: Console>(&mut self, console: &mut C) -> Result<(), BridgeError> {
        if !self.renderer.has_pending() {
            return Ok(());
        }
        let data = self.renderer.take();
        console.write_output(&data).map_err(BridgeError::LocalWrite)?;
        console.flush_output().map_err(BridgeError::LocalWrite)
    }
}

/// Write everything, waiting for the device to accept more after a
/// partial write.
fn write_all_serial<S: SerialPortAdapter>(serial: &mut S, data: &[u8]) -> Result<(), BridgeError> {
    let mut rest = data;
    while !rest.is_empty() {
        let written = serial.write_bytes(rest)?;
        rest = &rest[written..];
        if written == 0 {
            let mask = serial.wait_for_events(EventMask::WRITABLE | EventMask::ERROR)?;
            if mask.contains(EventMask::ERROR) {
                return Err(BridgeError::Channel(Channel::Serial));
            }
        }
    }
    Ok(())
}
