//! Exit funnel.
//!
//! Every way out of the program ends in [`ExitController::conclude`]: the
//! serial port is closed (and restored), the outcome is reported on the
//! diagnostic stream, the local terminal is restored and the local streams
//! are released. Cleanup runs at most once; later calls and `Drop` are no-ops.

pub mod signals;

pub use signals::{signal_description, StopFlag, HANDLED_SIGNALS};

use crate::bridge::{Color, Console};
use crate::error::AppError;
use crate::port::SerialPortAdapter;
use crate::session::SessionStats;
use std::fmt;
use std::io::{self, Write};
use std::time::Duration;
use tracing::{debug, info};

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok = 0,
    Argument = 1,
    Signal = 2,
    Fatal = 3,
    Io = 4,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Expected ways for a session to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Timeout(Duration),
    LineLimit(u64),
    Disconnect,
    Signal(i32),
}

impl StopReason {
    /// Interactive interrupt is a clean stop; other signals are not.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            StopReason::Signal(sig) if *sig != libc::SIGINT => ExitCode::Signal,
            _ => ExitCode::Ok,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Timeout(after) => write!(f, "Timed out after {:.1}s", after.as_secs_f64()),
            StopReason::LineLimit(_) => f.write_str("Specified number of lines received"),
            StopReason::Disconnect => f.write_str("Exit due to disconnect command"),
            StopReason::Signal(sig) => {
                write!(f, "Exit due to signal: {}", signal_description(*sig))
            }
        }
    }
}

/// Final result of a run.
#[derive(Debug)]
pub enum Outcome {
    Stopped(StopReason),
    Failed(AppError),
}

impl Outcome {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Outcome::Stopped(reason) => reason.exit_code(),
            Outcome::Failed(err) => err.exit_code(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Stopped(reason) => reason.fmt(f),
            Outcome::Failed(err) => err.fmt(f),
        }
    }
}

impl From<StopReason> for Outcome {
    fn from(reason: StopReason) -> Self {
        Outcome::Stopped(reason)
    }
}

impl From<AppError> for Outcome {
    fn from(err: AppError) -> Self {
        Outcome::Failed(err)
    }
}

/// Owns the port and console for the life of the process and releases them
/// exactly once.
pub struct ExitController<S: SerialPortAdapter, C: Console, W: Write = io::Stderr> {
    port: Option<S>,
    console: Option<C>,
    diag: W,
    verbose: bool,
    colors: bool,
    finished: bool,
}

impl<S: SerialPortAdapter, C: Console> ExitController<S, C, io::Stderr> {
    /// Controller reporting on the process's stderr.
    pub fn new(verbose: bool, colors: bool) -> Self {
        Self::with_diagnostics(io::stderr(), verbose, colors)
    }
}

impl<S: SerialPortAdapter, C: Console, W: Write> ExitController<S, C, W> {
    pub fn with_diagnostics(diag: W, verbose: bool, colors: bool) -> Self {
        Self {
            port: None,
            console: None,
            diag,
            verbose,
            colors,
            finished: false,
        }
    }

    pub fn attach_port(&mut self, port: S) -> &mut S {
        self.port.insert(port)
    }

    pub fn attach_console(&mut self, console: C) -> &mut C {
        self.console.insert(console)
    }

    /// Borrow the port and console together for the bridge loop.
    pub fn split_mut(&mut self) -> Option<(&mut S, &mut C)> {
        match (self.port.as_mut(), self.console.as_mut()) {
            (Some(port), Some(console)) => Some((port, console)),
            _ => None,
        }
    }

    pub fn diagnostics(&self) -> &W {
        &self.diag
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Clean up and report. Returns the exit code for `outcome`.
    pub fn conclude(&mut self, outcome: &Outcome, stats: Option<SessionStats>) -> ExitCode {
        let code = outcome.exit_code();
        if self.finished {
            debug!("cleanup already done");
            return code;
        }
        self.finished = true;
        info!(code = code.code(), outcome = %outcome, "exiting");

        if let Some(mut port) = self.port.take() {
            port.close();
        }
        if let Err(e) = self.report(code, outcome, stats) {
            debug!(error = %e, "exit report could not be written");
        }
        if let Some(mut console) = self.console.take() {
            console.restore();
        }
        code
    }

    /// Clean up, report and terminate the process.
    pub fn exit(mut self, outcome: Outcome, stats: Option<SessionStats>) -> ! {
        let code = self.conclude(&outcome, stats);
        std::process::exit(code.code())
    }

    fn report(
        &mut self,
        code: ExitCode,
        outcome: &Outcome,
        stats: Option<SessionStats>,
    ) -> io::Result<()> {
        if !self.verbose && code == ExitCode::Ok {
            return Ok(());
        }
        if self.colors {
            let color = if code == ExitCode::Ok {
                Color::Ok
            } else {
                Color::Error
            };
            self.diag.write_all(color.escape().as_bytes())?;
        }
        write!(self.diag, "\n[{outcome}]")?;
        if self.verbose {
            let stats = stats.unwrap_or_default();
            write!(
                self.diag,
                "[E{}]\n[TX:{}, RX:{}, RX:{} lines]",
                code.code(),
                stats.bytes_sent,
                stats.bytes_received,
                stats.lines_received
            )?;
        }
        writeln!(self.diag)?;
        if self.colors {
            self.diag.write_all(Color::Reset.escape().as_bytes())?;
        }
        self.diag.flush()
    }
}

impl<S: SerialPortAdapter, C: Console, W: Write> Drop for ExitController<S, C, W> {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            if let Some(mut port) = self.port.take() {
                port.close();
            }
            if let Some(mut console) = self.console.take() {
                console.restore();
            }
        }
    }
}
