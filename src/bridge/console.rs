//! Local side of the bridge: the input and output byte streams.
//!
//! `StdConsole` uses unbuffered duplicates of stdin/stdout (or files given on
//! the command line) so readiness reported by `poll` always matches what a
//! read will return. An interactive input terminal is switched to
//! non-canonical, no-echo mode until [`Console::restore`].

use super::BridgeError;
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// The local input/output pair driven by the bridge loop.
pub trait Console {
    /// Read available input. `Ok(0)` is end of stream.
    fn read_input(&mut self, buffer: &mut [u8]) -> io::Result<usize>;

    /// Write all of `data` to the local output.
    fn write_output(&mut self, data: &[u8]) -> io::Result<()>;

    fn flush_output(&mut self) -> io::Result<()>;

    /// True when input is an interactive terminal; end of stream is then
    /// never concluded from a zero-length read.
    fn input_is_interactive(&self) -> bool;

    fn input_fd(&self) -> Option<BorrowedFd<'_>>;

    fn output_fd(&self) -> Option<BorrowedFd<'_>>;

    /// Put the input terminal back the way it was found. Idempotent.
    fn restore(&mut self);
}

/// Console over the process streams or explicitly named files.
pub struct StdConsole {
    input: File,
    output: File,
    input_is_std: bool,
    output_is_std: bool,
    interactive: bool,
    saved: Option<Termios>,
}

impl StdConsole {
    /// Open the console. `None` selects stdin / stdout.
    pub fn open(input: Option<&Path>, output: Option<&Path>) -> Result<Self, BridgeError> {
        let (input, input_is_std) = match input {
            None => {
                debug!("local input is stdin");
                let fd = io::stdin()
                    .as_fd()
                    .try_clone_to_owned()
                    .map_err(|e| BridgeError::LocalOpen {
                        what: "input",
                        path: "<stdin>".into(),
                        source: e,
                    })?;
                (File::from(fd), true)
            }
            Some(path) => {
                let file = File::open(path).map_err(|e| BridgeError::LocalOpen {
                    what: "input",
                    path: path.display().to_string(),
                    source: e,
                })?;
                (file, false)
            }
        };

        let (output, output_is_std) = match output {
            None => {
                debug!("local output is stdout");
                let fd = io::stdout()
                    .as_fd()
                    .try_clone_to_owned()
                    .map_err(|e| BridgeError::LocalOpen {
                        what: "output",
                        path: "<stdout>".into(),
                        source: e,
                    })?;
                (File::from(fd), true)
            }
            Some(path) => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| BridgeError::LocalOpen {
                        what: "output",
                        path: path.display().to_string(),
                        source: e,
                    })?;
                (file, false)
            }
        };

        let mut console = Self {
            input,
            output,
            input_is_std,
            output_is_std,
            interactive: false,
            saved: None,
        };
        console.configure_input();
        Ok(console)
    }

    fn configure_input(&mut self) {
        if !self.input.is_terminal() {
            debug!("local input is no TTY");
            return;
        }
        self.interactive = true;
        let original = match termios::tcgetattr(self.input.as_fd()) {
            Ok(attr) => attr,
            Err(e) => {
                warn!(error = %e, "cannot read local terminal settings");
                return;
            }
        };
        let mut raw = original.clone();
        raw.local_flags.remove(LocalFlags::ECHO | LocalFlags::ICANON);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        match termios::tcsetattr(self.input.as_fd(), SetArg::TCSANOW, &raw) {
            Ok(()) => {
                debug!("local input is TTY");
                self.saved = Some(original);
            }
            Err(e) => warn!(error = %e, "cannot configure local terminal"),
        }
    }

    /// Whether the streams are the process's standard ones.
    pub fn uses_std_streams(&self) -> (bool, bool) {
        (self.input_is_std, self.output_is_std)
    }
}

impl Console for StdConsole {
    fn read_input(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.input.read(buffer)
    }

    fn write_output(&mut self, data: &[u8]) -> io::Result<()> {
        self.output.write_all(data)
    }

    fn flush_output(&mut self) -> io::Result<()> {
        self.output.flush()
    }

    fn input_is_interactive(&self) -> bool {
        self.interactive
    }

    fn input_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.input.as_fd())
    }

    fn output_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.output.as_fd())
    }

    fn restore(&mut self) {
        if let Some(original) = self.saved.take() {
            if let Err(e) = termios::tcsetattr(self.input.as_fd(), SetArg::TCSANOW, &original) {
                warn!(error = %e, "restoring local terminal failed");
            }
        }
    }
}

impl Drop for StdConsole {
    fn drop(&mut self) {
        self.restore();
    }
}

impl std::fmt::Debug for StdConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdConsole")
            .field("input_is_std", &self.input_is_std)
            .field("output_is_std", &self.output_is_std)
            .field("interactive", &self.interactive)
            .finish()
    }
}

#[derive(Debug, Default)]
struct ScriptedState {
    input: VecDeque<Vec<u8>>,
    input_closed: bool,
    output: Vec<u8>,
    fail_next_write: bool,
    restore_count: usize,
    restored: bool,
}

/// In-memory console for driving the bridge without a terminal.
///
/// Input is delivered one queued chunk per read; once the queue is empty and
/// [`ScriptedConsole::close_input`] was called, reads return end of stream.
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConsole {
    state: Arc<Mutex<ScriptedState>>,
    interactive: bool,
}

impl ScriptedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// A console that behaves like an interactive terminal.
    pub fn interactive() -> Self {
        Self {
            interactive: true,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScriptedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_input(&self, data: &[u8]) {
        self.lock().input.push_back(data.to_vec());
    }

    pub fn close_input(&self) {
        self.lock().input_closed = true;
    }

    /// Whether a read would return data or end of stream right now.
    pub fn input_ready(&self) -> bool {
        let state = self.lock();
        !state.input.is_empty() || state.input_closed
    }

    pub fn pending_input(&self) -> usize {
        self.lock().input.iter().map(Vec::len).sum()
    }

    pub fn output(&self) -> Vec<u8> {
        self.lock().output.clone()
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output()).into_owned()
    }

    pub fn fail_next_write(&self) {
        self.lock().fail_next_write = true;
    }

    /// Number of restores that actually changed something.
    pub fn restore_count(&self) -> usize {
        self.lock().restore_count
    }
}

impl Console for ScriptedConsole {
    fn read_input(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        let Some(mut chunk) = state.input.pop_front() else {
            return if state.input_closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        };
        let n = chunk.len().min(buffer.len());
        buffer[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            state.input.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn write_output(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected write failure"));
        }
        state.output.extend_from_slice(data);
        Ok(())
    }

    fn flush_output(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn input_is_interactive(&self) -> bool {
        self.interactive
    }

    fn input_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }

    fn output_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }

    fn restore(&mut self) {
        let mut state = self.lock();
        if !state.restored {
            state.restored = true;
            state.restore_count += 1;
        }
    }
}
