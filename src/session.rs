//! Run-time state of one redirection session.
//!
//! A `BridgeSession` is created when the bridge starts, mutated only by the
//! bridge loop and discarded at exit. It carries the transfer counters, the
//! CRLF-aware line detector, the inactivity budget and the transmit pacing
//! countdown.

use std::time::Duration;

/// Cumulative transfer counters, reported on verbose exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub lines_received: u64,
}

/// How one received byte relates to line structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteClass {
    /// CR or LF. `counted` is false for the LF of a CRLF pair.
    Terminator { counted: bool },
    /// Any other byte. `line_start` is true for the first one after a
    /// terminator (or at session start).
    Data { line_start: bool },
}

/// Counts CR, LF and CRLF line terminators, CRLF once.
#[derive(Debug, Clone)]
pub struct LineDetector {
    was_cr: bool,
    at_line_start: bool,
}

impl Default for LineDetector {
    fn default() -> Self {
        Self {
            was_cr: false,
            at_line_start: true,
        }
    }
}

impl LineDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, byte: u8) -> ByteClass {
        match byte {
            b'\r' => {
                self.was_cr = true;
                self.at_line_start = true;
                ByteClass::Terminator { counted: true }
            }
            b'\n' => {
                let counted = !self.was_cr;
                self.was_cr = false;
                self.at_line_start = true;
                ByteClass::Terminator { counted }
            }
            _ => {
                self.was_cr = false;
                let line_start = std::mem::replace(&mut self.at_line_start, false);
                ByteClass::Data { line_start }
            }
        }
    }
}

/// Count the lines in `data` as a fresh detector would.
pub fn count_lines(data: &[u8]) -> u64 {
    let mut detector = LineDetector::new();
    data.iter()
        .filter(|b| matches!(detector.classify(**b), ByteClass::Terminator { counted: true }))
        .count() as u64
}

/// Mutable state of one bridge run.
#[derive(Debug, Clone)]
pub struct BridgeSession {
    stats: SessionStats,
    lines: LineDetector,
    timeout: Option<Duration>,
    remaining: Duration,
    send_delay: Duration,
    input_eof: bool,
}

impl BridgeSession {
    /// Start a session. `timeout` of `None` (or zero) disables the
    /// inactivity exit.
    pub fn new(timeout: Option<Duration>) -> Self {
        let timeout = timeout.filter(|t| !t.is_zero());
        Self {
            stats: SessionStats::default(),
            lines: LineDetector::new(),
            timeout,
            remaining: timeout.unwrap_or_default(),
            send_delay: Duration::ZERO,
            input_eof: false,
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    /// Charge one tick against the inactivity budget. Returns true once the
    /// budget is exhausted; never true when no timeout is configured.
    pub fn charge_tick(&mut self, tick: Duration) -> bool {
        if self.timeout.is_none() {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(tick);
        self.remaining.is_zero()
    }

    /// Any readiness event refills the budget.
    pub fn note_activity(&mut self) {
        if let Some(timeout) = self.timeout {
            self.remaining = timeout;
        }
    }

    /// While a send delay is pending, count it down by `tick` and return
    /// true: local input must not be offered this tick.
    pub fn pacing_pending(&mut self, tick: Duration) -> bool {
        if self.send_delay.is_zero() {
            return false;
        }
        self.send_delay = self.send_delay.saturating_sub(tick);
        true
    }

    /// Arm the per-character send delay after local input was serviced.
    pub fn start_send_delay(&mut self, delay: Duration) {
        self.send_delay = delay;
    }

    pub fn input_eof(&self) -> bool {
        self.input_eof
    }

    pub fn mark_input_eof(&mut self) {
        self.input_eof = true;
    }

    /// Account for one received byte and classify it.
    pub fn receive_byte(&mut self, byte: u8) -> ByteClass {
        self.stats.bytes_received += 1;
        let class = self.lines.classify(byte);
        if matches!(class, ByteClass::Terminator { counted: true }) {
            self.stats.lines_received += 1;
        }
        class
    }

    pub fn record_sent(&mut self, count: usize) {
        self.stats.bytes_sent += count as u64;
    }
}
