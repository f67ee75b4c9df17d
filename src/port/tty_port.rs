//! Terminal-device serial port implementation.
//!
//! Opens a character device, captures its line discipline and modem line
//! state, applies a raw configuration and restores the captured state on
//! close. Reads and writes are non-blocking; the configured timeout only
//! governs [`SerialPortAdapter::wait_for_events`].

use super::error::PortError;
use super::traits::{
    validate_baud_rate, DataBits, EventMask, ModemLineRequest, Parity, PortConfiguration,
    SerialPortAdapter, StopBits,
};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, InputFlags, LocalFlags, OutputFlags, SetArg,
    SpecialCharacterIndices, Termios,
};
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use tracing::{debug, warn};

/// State captured and applied while the device is open.
struct OpenPort {
    /// Holds the exclusive advisory lock until dropped.
    file: Flock<File>,
    attr: Termios,
    attr_original: Termios,
    /// `None` when the device has no modem control lines (e.g. a pseudo-terminal).
    modem_lines: Option<ModemLines>,
}

#[derive(Debug, Clone, Copy)]
struct ModemLines {
    applied: libc::c_int,
    original: libc::c_int,
}

/// Either closed (no handle, nothing captured) or open with full state.
#[derive(Default)]
enum PortState {
    #[default]
    Closed,
    Open(OpenPort),
}

/// Serial port backed by a Unix terminal device.
pub struct TtyPort {
    config: PortConfiguration,
    state: PortState,
}

impl TtyPort {
    /// Create a closed port bound to `config`.
    pub fn new(config: PortConfiguration) -> Self {
        Self {
            config,
            state: PortState::Closed,
        }
    }

    /// Open a serial port with the given configuration.
    ///
    /// # Example
    /// ```no_run
    /// use serial_bridge::port::{PortConfiguration, TtyPort};
    ///
    /// let mut config = PortConfiguration::for_device("/dev/ttyUSB0");
    /// config.baud_rate = 115200;
    /// let port = TtyPort::open(config)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(config: PortConfiguration) -> Result<Self, PortError> {
        let mut port = Self::new(config);
        port.connect()?;
        Ok(port)
    }

    /// Open the device and apply the configuration. An already open port is
    /// closed (and restored) first.
    pub fn connect(&mut self) -> Result<(), PortError> {
        self.close();
        let baud = baud_rate_constant(validate_baud_rate(self.config.baud_rate)?)?;
        let device = self.config.device.clone();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&device)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::PermissionDenied {
                    PortError::open_failed(
                        &device,
                        format!("{e} (NOTE: Are you in group 'dialout'?)"),
                    )
                } else {
                    PortError::open_failed(&device, e.to_string())
                }
            })?;

        let file = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, e)| {
            PortError::open_failed(
                &device,
                format!("Port is already in use (didn't get exclusive lock): {e}"),
            )
        })?;

        if !file.is_terminal() {
            return Err(PortError::NotATty(device));
        }

        let attr_original = termios::tcgetattr(file.as_fd()).map_err(|e| {
            PortError::AttributeReadFailed {
                device: device.clone(),
                source: e.into(),
            }
        })?;

        let original_lines = match get_modem_lines(file.as_fd()) {
            Ok(bits) => Some(bits),
            Err(e) if is_unsupported(&e) && !self.requests_modem_lines() => {
                debug!(device = %device, "device has no modem control lines");
                None
            }
            Err(e) => {
                return Err(PortError::ModemLinesFailed {
                    device,
                    source: e,
                })
            }
        };

        let attr = line_discipline(&attr_original, &self.config, baud).map_err(|e| {
            PortError::AttributeWriteFailed {
                device: device.clone(),
                source: e.into(),
            }
        })?;

        let set_arg = if self.config.flush_on_open {
            SetArg::TCSAFLUSH
        } else {
            SetArg::TCSANOW
        };
        termios::tcsetattr(file.as_fd(), set_arg, &attr).map_err(|e| {
            PortError::AttributeWriteFailed {
                device: device.clone(),
                source: e.into(),
            }
        })?;

        let modem_lines = match original_lines {
            Some(original) => {
                let applied = apply_line_request(
                    apply_line_request(original, libc::TIOCM_DTR, self.config.dtr),
                    libc::TIOCM_RTS,
                    self.config.rts,
                );
                if applied != original {
                    if let Err(e) = set_modem_lines(file.as_fd(), applied) {
                        // Leave the device as it was found.
                        let _ = termios::tcsetattr(file.as_fd(), SetArg::TCSANOW, &attr_original);
                        return Err(PortError::ModemLinesFailed { device, source: e });
                    }
                }
                Some(ModemLines { applied, original })
            }
            None => None,
        };

        if self.config.flush_on_open {
            if let Err(e) = termios::tcflush(file.as_fd(), FlushArg::TCIOFLUSH) {
                debug!(device = %device, error = %e, "flush after open failed");
            }
        }

        debug!(
            device = %device,
            baud = self.config.baud_rate,
            framing = %format!(
                "{}{}{}",
                self.config.parity.letter(),
                self.config.data_bits.bits(),
                self.config.stop_bits.bits()
            ),
            "port opened"
        );

        self.state = PortState::Open(OpenPort {
            file,
            attr,
            attr_original,
            modem_lines,
        });
        Ok(())
    }

    /// The configuration this port was created with.
    pub fn config(&self) -> &PortConfiguration {
        &self.config
    }

    /// Line discipline captured when the port was opened.
    pub fn original_attributes(&self) -> Option<&Termios> {
        match &self.state {
            PortState::Open(open) => Some(&open.attr_original),
            PortState::Closed => None,
        }
    }

    /// Line discipline applied by this port.
    pub fn applied_attributes(&self) -> Option<&Termios> {
        match &self.state {
            PortState::Open(open) => Some(&open.attr),
            PortState::Closed => None,
        }
    }

    /// Descriptor to multiplex on, if open.
    pub fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        match &self.state {
            PortState::Open(open) => Some(open.file.as_fd()),
            PortState::Closed => None,
        }
    }

    /// Clear To Send input line.
    pub fn cts(&self) -> Result<bool, PortError> {
        self.modem_line(libc::TIOCM_CTS)
    }

    /// Data Set Ready input line.
    pub fn dsr(&self) -> Result<bool, PortError> {
        self.modem_line(libc::TIOCM_DSR)
    }

    /// Data Terminal Ready output line.
    pub fn dtr(&self) -> Result<bool, PortError> {
        self.modem_line(libc::TIOCM_DTR)
    }

    /// Request To Send output line.
    pub fn rts(&self) -> Result<bool, PortError> {
        self.modem_line(libc::TIOCM_RTS)
    }

    pub fn set_dtr(&mut self, level: bool) -> Result<(), PortError> {
        self.set_modem_line(libc::TIOCM_DTR, level)
    }

    pub fn set_rts(&mut self, level: bool) -> Result<(), PortError> {
        self.set_modem_line(libc::TIOCM_RTS, level)
    }

    /// Multi-line description of settings and captured state for debug logs.
    pub fn dump(&self) -> String {
        let c = &self.config;
        let mut out = format!(
            "serial_port = {{\n  file       = {}\n  baudrate   = {}\n  parity     = {}\n  databits   = {}\n  stopbits   = {}\n  local      = {}\n  flush      = {}\n  set_dtr    = {:?}\n  set_rts    = {:?}\n  timeout_us = {}\n",
            c.device,
            c.baud_rate,
            c.parity.letter(),
            c.data_bits.bits(),
            c.stop_bits.bits(),
            c.ignore_modem_lines,
            c.flush_on_open,
            c.dtr,
            c.rts,
            c.timeout_us,
        );
        match &self.state {
            PortState::Closed => out.push_str("  state      = closed\n"),
            PortState::Open(open) => {
                out.push_str(&format!("  handle     = {}\n", open.file.as_raw_fd()));
                if let Some(lines) = open.modem_lines {
                    out.push_str(&format!(
                        "  mdlns      = {:08x}h\n  mdlns_orig = {:08x}h\n",
                        lines.applied, lines.original
                    ));
                }
                out.push_str(&describe_attributes("attr", &open.attr));
                out.push_str(&describe_attributes("attr_orig", &open.attr_original));
            }
        }
        out.push('}');
        out
    }

    fn requests_modem_lines(&self) -> bool {
        self.config.dtr != ModemLineRequest::Unchanged
            || self.config.rts != ModemLineRequest::Unchanged
    }

    fn modem_line(&self, line: libc::c_int) -> Result<bool, PortError> {
        let open = open_ref(&self.state, &self.config.device)?;
        let bits = get_modem_lines(open.file.as_fd()).map_err(|e| PortError::ModemLinesFailed {
            device: self.config.device.clone(),
            source: e,
        })?;
        Ok(bits & line != 0)
    }

    fn set_modem_line(&mut self, line: libc::c_int, level: bool) -> Result<(), PortError> {
        let device = &self.config.device;
        let open = open_mut(&mut self.state, device)?;
        let fd = open.file.as_fd();
        let result = get_modem_lines(fd).and_then(|bits| {
            let bits = if level { bits | line } else { bits & !line };
            set_modem_lines(fd, bits).map(|_| bits)
        });
        let bits = result.map_err(|e| PortError::ModemLinesFailed {
            device: device.clone(),
            source: e,
        })?;
        if let Some(lines) = open.modem_lines.as_mut() {
            lines.applied = bits;
        }
        Ok(())
    }
}

impl SerialPortAdapter for TtyPort {
    fn name(&self) -> &str {
        &self.config.device
    }

    fn is_open(&self) -> bool {
        matches!(self.state, PortState::Open(_))
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let device = &self.config.device;
        let open = open_mut(&mut self.state, device)?;
        match open.file.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if would_block(&e) => Ok(0),
            Err(e) => Err(PortError::ReadFailed {
                device: device.clone(),
                source: e,
            }),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let device = &self.config.device;
        let open = open_mut(&mut self.state, device)?;
        match open.file.write(data) {
            Ok(n) => Ok(n),
            Err(e) if would_block(&e) => Ok(0),
            Err(e) => Err(PortError::WriteFailed {
                device: device.clone(),
                source: e,
            }),
        }
    }

    fn wait_for_events(&mut self, interest: EventMask) -> Result<EventMask, PortError> {
        let device = &self.config.device;
        let timeout = poll_timeout_from_micros(self.config.timeout_us);
        let open = open_ref(&self.state, device)?;

        let mut flags = PollFlags::empty();
        if interest.contains(EventMask::READABLE) {
            flags |= PollFlags::POLLIN;
        }
        if interest.contains(EventMask::WRITABLE) {
            flags |= PollFlags::POLLOUT;
        }
        let mut fds = [PollFd::new(open.file.as_fd(), flags)];

        match poll(&mut fds, timeout) {
            Ok(0) => Ok(EventMask::empty()),
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                let mut mask = EventMask::empty();
                if revents.contains(PollFlags::POLLIN) {
                    mask.insert(EventMask::READABLE);
                }
                if revents.contains(PollFlags::POLLOUT) {
                    mask.insert(EventMask::WRITABLE);
                }
                if interest.contains(EventMask::ERROR) && revents.intersects(error_flags()) {
                    mask.insert(EventMask::ERROR);
                }
                Ok(mask)
            }
            Err(Errno::EINTR) => Ok(EventMask::empty()),
            Err(e) => Err(PortError::WaitFailed {
                device: device.clone(),
                source: e.into(),
            }),
        }
    }

    fn clear_buffers(&mut self, drain_output: bool) -> Result<(), PortError> {
        let device = &self.config.device;
        let open = open_ref(&self.state, device)?;
        let fd = open.file.as_fd();
        let to_error = |e: Errno| PortError::WriteFailed {
            device: device.clone(),
            source: e.into(),
        };
        termios::tcflush(fd, FlushArg::TCIFLUSH).map_err(to_error)?;
        if drain_output {
            termios::tcdrain(fd).map_err(to_error)?;
        }
        termios::tcflush(fd, FlushArg::TCIOFLUSH).map_err(to_error)
    }

    fn close(&mut self) {
        let PortState::Open(open) = std::mem::take(&mut self.state) else {
            return;
        };
        let device = &self.config.device;
        let fd = open.file.as_fd();
        if let Err(e) = termios::tcflush(fd, FlushArg::TCIOFLUSH) {
            warn!(device = %device, error = %e, "flush on close failed");
        }
        if let Err(e) = termios::tcsetattr(fd, SetArg::TCSANOW, &open.attr_original) {
            warn!(device = %device, error = %e, "restoring terminal attributes failed");
        }
        if let Some(lines) = open.modem_lines {
            if lines.applied != lines.original {
                if let Err(e) = set_modem_lines(fd, lines.original) {
                    warn!(device = %device, error = %e, "restoring modem lines failed");
                }
            }
        }
        debug!(device = %device, "port closed");
    }

    fn bytes_to_read(&self) -> Option<usize> {
        let open = open_ref(&self.state, &self.config.device).ok()?;
        let mut pending: libc::c_int = 0;
        // SAFETY: the descriptor stays open for the call and `pending` outlives it.
        unsafe { ioctl::fionread(open.file.as_raw_fd(), &mut pending) }.ok()?;
        Some(pending.max(0) as usize)
    }
}

impl Drop for TtyPort {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TtyPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtyPort")
            .field("device", &self.config.device)
            .field("baud_rate", &self.config.baud_rate)
            .field("open", &self.is_open())
            .finish()
    }
}

fn open_ref<'a>(state: &'a PortState, device: &str) -> Result<&'a OpenPort, PortError> {
    match state {
        PortState::Open(open) => Ok(open),
        PortState::Closed => Err(PortError::NotOpen(device.to_string())),
    }
}

fn open_mut<'a>(state: &'a mut PortState, device: &str) -> Result<&'a mut OpenPort, PortError> {
    match state {
        PortState::Open(open) => Ok(open),
        PortState::Closed => Err(PortError::NotOpen(device.to_string())),
    }
}

fn would_block(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Poll flags that always mean the descriptor is unusable.
pub(crate) fn error_flags() -> PollFlags {
    PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL
}

/// Convert a microsecond timeout to a poll timeout, rounding up to whole
/// milliseconds. Negative means block indefinitely.
pub(crate) fn poll_timeout_from_micros(timeout_us: i64) -> PollTimeout {
    if timeout_us < 0 {
        return PollTimeout::NONE;
    }
    let millis = (timeout_us as u64).div_ceil(1000);
    PollTimeout::from(u16::try_from(millis).unwrap_or(u16::MAX))
}

/// Build the raw line discipline for `config` on top of the captured settings.
fn line_discipline(
    original: &Termios,
    config: &PortConfiguration,
    baud: BaudRate,
) -> Result<Termios, Errno> {
    let mut attr = original.clone();
    termios::cfmakeraw(&mut attr);

    attr.input_flags.remove(
        InputFlags::IGNBRK
            | InputFlags::BRKINT
            | InputFlags::ICRNL
            | InputFlags::INLCR
            | InputFlags::PARMRK
            | InputFlags::IXON
            | InputFlags::ISTRIP
            | InputFlags::IGNPAR
            | InputFlags::INPCK,
    );
    attr.input_flags.insert(match config.parity {
        Parity::None => InputFlags::IGNPAR,
        Parity::Odd | Parity::Even => InputFlags::INPCK,
    });

    attr.output_flags.remove(OutputFlags::OPOST);
    attr.local_flags.remove(
        LocalFlags::ECHO | LocalFlags::ECHONL | LocalFlags::ICANON | LocalFlags::IEXTEN | LocalFlags::ISIG,
    );

    attr.control_flags.remove(
        ControlFlags::CRTSCTS
            | ControlFlags::CSTOPB
            | ControlFlags::HUPCL
            | ControlFlags::CLOCAL
            | ControlFlags::PARENB
            | ControlFlags::PARODD
            | ControlFlags::CSIZE,
    );
    attr.control_flags.insert(ControlFlags::CREAD);
    attr.control_flags.insert(match config.data_bits {
        DataBits::Five => ControlFlags::CS5,
        DataBits::Six => ControlFlags::CS6,
        DataBits::Seven => ControlFlags::CS7,
        DataBits::Eight => ControlFlags::CS8,
    });
    if config.stop_bits == StopBits::Two {
        attr.control_flags.insert(ControlFlags::CSTOPB);
    }
    if config.ignore_modem_lines {
        attr.control_flags.insert(ControlFlags::CLOCAL);
    }
    match config.parity {
        Parity::None => {}
        Parity::Even => attr.control_flags.insert(ControlFlags::PARENB),
        Parity::Odd => attr
            .control_flags
            .insert(ControlFlags::PARENB | ControlFlags::PARODD),
    }

    attr.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    attr.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    termios::cfsetspeed(&mut attr, baud)?;
    Ok(attr)
}

fn describe_attributes(label: &str, attr: &Termios) -> String {
    format!(
        "  {label} = {{\n    c_iflag  = {:08x}h\n    c_oflag  = {:08x}h\n    c_cflag  = {:08x}h\n    c_lflag  = {:08x}h\n    c_ispeed = {:?}\n    c_ospeed = {:?}\n  }}\n",
        attr.input_flags.bits(),
        attr.output_flags.bits(),
        attr.control_flags.bits(),
        attr.local_flags.bits(),
        termios::cfgetispeed(attr),
        termios::cfgetospeed(attr),
    )
}

fn apply_line_request(bits: libc::c_int, line: libc::c_int, request: ModemLineRequest) -> libc::c_int {
    match request {
        ModemLineRequest::Unchanged => bits,
        ModemLineRequest::Assert => bits | line,
        ModemLineRequest::Deassert => bits & !line,
    }
}

fn is_unsupported(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENOTTY) | Some(libc::EINVAL))
}

fn get_modem_lines(fd: BorrowedFd<'_>) -> io::Result<libc::c_int> {
    let mut bits: libc::c_int = 0;
    // SAFETY: the descriptor is borrowed for the call and `bits` outlives it.
    unsafe { ioctl::tiocmget(fd.as_raw_fd(), &mut bits) }?;
    Ok(bits)
}

fn set_modem_lines(fd: BorrowedFd<'_>, bits: libc::c_int) -> io::Result<()> {
    // SAFETY: as above, `bits` is only read.
    unsafe { ioctl::tiocmset(fd.as_raw_fd(), &bits) }?;
    Ok(())
}

mod ioctl {
    nix::ioctl_read_bad!(tiocmget, libc::TIOCMGET, libc::c_int);
    nix::ioctl_write_ptr_bad!(tiocmset, libc::TIOCMSET, libc::c_int);
    nix::ioctl_read_bad!(fionread, libc::FIONREAD, libc::c_int);
}

/// Map a validated rate to its termios speed constant.
fn baud_rate_constant(rate: u32) -> Result<BaudRate, PortError> {
    let baud = match rate {
        50 => BaudRate::B50,
        75 => BaudRate::B75,
        110 => BaudRate::B110,
        134 => BaudRate::B134,
        150 => BaudRate::B150,
        200 => BaudRate::B200,
        300 => BaudRate::B300,
        600 => BaudRate::B600,
        1200 => BaudRate::B1200,
        1800 => BaudRate::B1800,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        7200 => BaudRate::B7200,
        9600 => BaudRate::B9600,
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        14400 => BaudRate::B14400,
        19200 => BaudRate::B19200,
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        28800 => BaudRate::B28800,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        76800 => BaudRate::B76800,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        460800 => BaudRate::B460800,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        921600 => BaudRate::B921600,
        other => return Err(validate_baud_rate(other).err().unwrap_or(
            PortError::UnsupportedBaudRate {
                requested: other,
                suggestion: None,
            },
        )),
    };
    Ok(baud)
}
