//! Readiness multiplexing across the serial device and the local streams.

use super::console::{Console, ScriptedConsole};
use super::BridgeError;
use crate::port::tty_port::{error_flags, poll_timeout_from_micros};
use crate::port::{EventMask, SerialPortAdapter, TtyPort};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::fmt;
use std::os::fd::BorrowedFd;
use std::time::Duration;

/// The streams that can report an error condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    LocalInput,
    LocalOutput,
    Serial,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::LocalInput => "local in",
            Channel::LocalOutput => "local out",
            Channel::Serial => "port",
        })
    }
}

/// What the bridge wants to hear about on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitRequest {
    /// Offer local input for reading (false while pacing).
    pub want_input: bool,
    /// Local input reached end of stream and is no longer watched at all.
    pub input_closed: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub serial_readable: bool,
    pub input_readable: bool,
    pub error: Option<Channel>,
}

impl Readiness {
    /// True when any event fired.
    pub fn any(&self) -> bool {
        self.serial_readable || self.input_readable || self.error.is_some()
    }
}

/// One bounded wait per tick.
pub trait Waiter<S, C> {
    fn wait(
        &mut self,
        serial: &mut S,
        console: &mut C,
        request: WaitRequest,
    ) -> Result<Readiness, BridgeError>;
}

/// Descriptor access for the poll-based waiter.
pub trait PollSource {
    fn poll_fd(&self) -> Option<BorrowedFd<'_>>;
}

impl PollSource for TtyPort {
    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        TtyPort::poll_fd(self)
    }
}

/// Waits with `poll(2)` on the serial device and both local streams.
#[derive(Debug, Default)]
pub struct PollWaiter;

impl PollWaiter {
    pub fn new() -> Self {
        Self
    }
}

fn timeout_of(duration: Duration) -> PollTimeout {
    poll_timeout_from_micros(i64::try_from(duration.as_micros()).unwrap_or(i64::MAX))
}

impl<S, C> Waiter<S, C> for PollWaiter
where
    S: SerialPortAdapter + PollSource,
    C: Console,
{
    fn wait(
        &mut self,
        serial: &mut S,
        console: &mut C,
        request: WaitRequest,
    ) -> Result<Readiness, BridgeError> {
        let serial_fd = serial.poll_fd().ok_or(BridgeError::Channel(Channel::Serial))?;

        let mut fds = Vec::with_capacity(3);
        fds.push(PollFd::new(serial_fd, PollFlags::POLLIN));
        let output_index = console.output_fd().map(|fd| {
            fds.push(PollFd::new(fd, PollFlags::empty()));
            fds.len() - 1
        });
        let input_index = if request.input_closed {
            None
        } else {
            console.input_fd().map(|fd| {
                let events = if request.want_input {
                    PollFlags::POLLIN
                } else {
                    PollFlags::empty()
                };
                fds.push(PollFd::new(fd, events));
                fds.len() - 1
            })
        };

        match poll(&mut fds, timeout_of(request.timeout)) {
            Ok(0) => return Ok(Readiness::default()),
            Ok(_) => {}
            Err(Errno::EINTR) => {
                tracing::debug!("wait interrupted by signal");
                return Ok(Readiness::default());
            }
            Err(e) => return Err(BridgeError::Wait(e.into())),
        }

        let revents = |index: usize| fds[index].revents().unwrap_or(PollFlags::empty());
        let mut ready = Readiness::default();

        let serial_events = revents(0);
        ready.serial_readable = serial_events.contains(PollFlags::POLLIN);
        if serial_events.intersects(error_flags()) {
            ready.error = Some(Channel::Serial);
        }

        if let Some(index) = output_index {
            if revents(index).intersects(error_flags()) {
                ready.error.get_or_insert(Channel::LocalOutput);
            }
        }

        if let Some(index) = input_index {
            let events = revents(index);
            if events.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
                ready.error.get_or_insert(Channel::LocalInput);
            } else if request.want_input
                && events.intersects(PollFlags::POLLIN | PollFlags::POLLHUP)
            {
                // A hung-up writer end reads as end of stream.
                ready.input_readable = true;
            }
        }

        Ok(ready)
    }
}

/// Deterministic waiter for tests: never sleeps, reports the serial side
/// through [`SerialPortAdapter::wait_for_events`] and the console through
/// its queued input. Records every request it receives.
#[derive(Debug, Default)]
pub struct ScriptedWaiter {
    requests: Vec<WaitRequest>,
    fail_at: Option<(usize, Channel)>,
    wait_error_at: Option<usize>,
}

impl ScriptedWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report an error condition on `channel` on the `n`th wait (0-based).
    pub fn fail_at(mut self, n: usize, channel: Channel) -> Self {
        self.fail_at = Some((n, channel));
        self
    }

    /// Make the `n`th wait itself fail.
    pub fn wait_error_at(mut self, n: usize) -> Self {
        self.wait_error_at = Some(n);
        self
    }

    pub fn requests(&self) -> &[WaitRequest] {
        &self.requests
    }

    pub fn wait_count(&self) -> usize {
        self.requests.len()
    }
}

impl<S: SerialPortAdapter> Waiter<S, ScriptedConsole> for ScriptedWaiter {
    fn wait(
        &mut self,
        serial: &mut S,
        console: &mut ScriptedConsole,
        request: WaitRequest,
    ) -> Result<Readiness, BridgeError> {
        let n = self.requests.len();
        self.requests.push(request);

        if self.wait_error_at == Some(n) {
            return Err(BridgeError::Wait(std::io::Error::from_raw_os_error(
                libc::EBADF,
            )));
        }

        let mask = serial.wait_for_events(EventMask::READABLE | EventMask::ERROR)?;
        let mut ready = Readiness {
            serial_readable: mask.contains(EventMask::READABLE),
            input_readable: request.want_input && !request.input_closed && console.input_ready(),
            error: mask.contains(EventMask::ERROR).then_some(Channel::Serial),
        };
        if let Some((at, channel)) = self.fail_at {
            if at == n {
                ready.error = Some(channel);
            }
        }
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MockSerialPort;

    fn request(want_input: bool) -> WaitRequest {
        WaitRequest {
            want_input,
            input_closed: false,
            timeout: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_timeout_rounds_up() {
        assert_eq!(timeout_of(Duration::from_micros(1)), PollTimeout::from(1u16));
        assert_eq!(timeout_of(Duration::from_micros(1500)), PollTimeout::from(2u16));
        assert_eq!(timeout_of(Duration::ZERO), PollTimeout::ZERO);
    }

    #[test]
    fn test_scripted_waiter_reports_sources() {
        let mut port = MockSerialPort::new("MOCK0");
        let mut console = ScriptedConsole::new();
        let mut waiter = ScriptedWaiter::new();

        let ready = waiter.wait(&mut port, &mut console, request(true)).unwrap();
        assert!(!ready.any());

        port.enqueue_read(b"x");
        console.push_input(b"y");
        let ready = waiter.wait(&mut port, &mut console, request(true)).unwrap();
        assert!(ready.serial_readable);
        assert!(ready.input_readable);

        let ready = waiter.wait(&mut port, &mut console, request(false)).unwrap();
        assert!(!ready.input_readable);
        assert_eq!(waiter.wait_count(), 3);
    }

    #[test]
    fn test_scripted_waiter_injects_errors() {
        let mut port = MockSerialPort::new("MOCK0");
        let mut console = ScriptedConsole::new();
        let mut waiter = ScriptedWaiter::new()
            .fail_at(0, Channel::LocalOutput)
            .wait_error_at(1);
        let ready = waiter.wait(&mut port, &mut console, request(true)).unwrap();
        assert_eq!(ready.error, Some(Channel::LocalOutput));
        assert!(matches!(
            waiter.wait(&mut port, &mut console, request(true)),
            Err(BridgeError::Wait(_))
        ));
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::LocalInput.to_string(), "local in");
        assert_eq!(Channel::Serial.to_string(), "port");
    }
}
