//! Shared test utilities for serial-bridge tests.
//!
//! This module provides common test infrastructure including:
//! - Mock port creation with pre-programmed chunks
//! - A harness that runs the bridge loop against scripted streams
//! - Pseudo-terminal helpers standing in for a real device

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serial_bridge::bridge::{Bridge, BridgeOptions, Renderer, ScriptedConsole, ScriptedWaiter};
use serial_bridge::lifecycle::{StopFlag, StopReason};
use serial_bridge::matcher::DisconnectMatcher;
use serial_bridge::port::MockSerialPort;
use serial_bridge::session::SessionStats;
use serial_bridge::BridgeError;
use std::time::Duration;

/// Create a mock serial port with pre-programmed read chunks.
///
/// # Example
/// ```ignore
/// let mock = create_mock_port_with_chunks("MOCK0", &[b"OK\r\n", b"READY\r\n"]);
/// ```
pub fn create_mock_port_with_chunks(port_name: &str, chunks: &[&[u8]]) -> MockSerialPort {
    let mut mock = MockSerialPort::new(port_name);
    for chunk in chunks {
        mock.enqueue_read(chunk);
    }
    mock
}

/// Options with a 1 ms tick and everything else off.
pub fn quiet_options() -> BridgeOptions {
    BridgeOptions {
        tick: Duration::from_millis(1),
        ..BridgeOptions::default()
    }
}

/// Result of one scripted bridge run.
pub struct BridgeRun {
    pub result: Result<StopReason, BridgeError>,
    pub stats: SessionStats,
    pub output: Vec<u8>,
    pub written: Vec<u8>,
    pub waiter: ScriptedWaiter,
}

impl BridgeRun {
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn reason(&self) -> StopReason {
        match &self.result {
            Ok(reason) => *reason,
            Err(e) => panic!("bridge failed: {e}"),
        }
    }
}

/// Drive the bridge until it stops, with a safety cap on the number of ticks.
pub struct BridgeHarness {
    pub port: MockSerialPort,
    pub console: ScriptedConsole,
    pub waiter: ScriptedWaiter,
    pub options: BridgeOptions,
    pub matcher: DisconnectMatcher,
    pub stop: StopFlag,
    pub clock: Option<fn() -> DateTime<Utc>>,
}

impl BridgeHarness {
    pub fn new(port: MockSerialPort) -> Self {
        Self {
            port,
            console: ScriptedConsole::new(),
            waiter: ScriptedWaiter::new(),
            options: quiet_options(),
            matcher: DisconnectMatcher::disabled(),
            stop: StopFlag::new(),
            clock: None,
        }
    }

    pub fn with_options(mut self, options: BridgeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_trigger(mut self, trigger: &str) -> Self {
        self.matcher = DisconnectMatcher::from_escaped(trigger).expect("trigger fits");
        self
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = Some(clock);
        self
    }

    fn bridge(&self) -> Bridge {
        let bridge = Bridge::new(self.options.clone(), self.matcher.clone());
        match self.clock {
            Some(clock) => bridge.with_renderer(Renderer::new(self.options.render).with_clock(clock)),
            None => bridge,
        }
    }

    pub fn with_waiter(mut self, waiter: ScriptedWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    /// Run ticks until a stop reason, an error, or `max_ticks` ticks.
    pub fn run_for(mut self, max_ticks: usize) -> BridgeRun {
        let mut bridge = self.bridge();
        let observer = self.port.clone();
        let mut result = None;
        for _ in 0..max_ticks {
            match bridge.tick(&mut self.port, &mut self.console, &mut self.waiter, &self.stop) {
                Ok(None) => continue,
                Ok(Some(reason)) => {
                    result = Some(Ok(reason));
                    break;
                }
                Err(e) => {
                    result = Some(Err(e));
                    break;
                }
            }
        }
        BridgeRun {
            result: result.expect("bridge did not stop within the tick budget"),
            stats: bridge.stats(),
            output: self.console.output(),
            written: observer.written(),
            waiter: self.waiter,
        }
    }

    /// Run the full loop (including the final color reset).
    pub fn run(mut self) -> BridgeRun {
        let mut bridge = self.bridge();
        let observer = self.port.clone();
        let result = bridge.run(&mut self.port, &mut self.console, &mut self.waiter, &self.stop);
        BridgeRun {
            result,
            stats: bridge.stats(),
            output: self.console.output(),
            written: observer.written(),
            waiter: self.waiter,
        }
    }
}

/// Pseudo-terminal pair; the slave path stands in for a serial device.
#[cfg(target_os = "linux")]
pub struct FakeDevice {
    pub master: std::os::fd::OwnedFd,
    pub slave: std::os::fd::OwnedFd,
    pub path: String,
}

#[cfg(target_os = "linux")]
pub fn open_fake_device() -> FakeDevice {
    use std::os::fd::AsRawFd;

    let pty = nix::pty::openpty(None, None).expect("openpty");
    let path = std::fs::read_link(format!("/proc/self/fd/{}", pty.slave.as_raw_fd()))
        .expect("slave path")
        .to_string_lossy()
        .into_owned();
    FakeDevice {
        master: pty.master,
        slave: pty.slave,
        path,
    }
}
