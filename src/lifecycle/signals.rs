//! Termination signal intent flag.
//!
//! Handlers only record which signal arrived. The bridge loop polls the flag
//! at every tick boundary and funnels the stop through the exit controller.
//! A second signal while the first is still pending terminates the process
//! at once with the signal exit code.

use super::ExitCode;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGPIPE, SIGQUIT, SIGTERM};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Signals that stop the bridge.
pub const HANDLED_SIGNALS: [i32; 5] = [SIGINT, SIGTERM, SIGHUP, SIGQUIT, SIGPIPE];

/// Shared "stop requested" state, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    raised: Arc<AtomicBool>,
    signal: Arc<AtomicUsize>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handlers for [`HANDLED_SIGNALS`].
    pub fn install(&self) -> io::Result<()> {
        for sig in HANDLED_SIGNALS {
            // Registered first so it sees the flag as it was before this signal.
            signal_hook::flag::register_conditional_shutdown(
                sig,
                ExitCode::Signal.code(),
                Arc::clone(&self.raised),
            )?;
            signal_hook::flag::register_usize(sig, Arc::clone(&self.signal), sig as usize)?;
            signal_hook::flag::register(sig, Arc::clone(&self.raised))?;
        }
        debug!(signals = ?HANDLED_SIGNALS, "signal handlers installed");
        Ok(())
    }

    /// Record a stop request as if `signal` had been delivered.
    pub fn request(&self, signal: i32) {
        self.signal.store(signal as usize, Ordering::SeqCst);
        self.raised.store(true, Ordering::SeqCst);
    }

    /// The recorded signal, if a stop was requested.
    pub fn pending(&self) -> Option<i32> {
        self.raised
            .load(Ordering::SeqCst)
            .then(|| self.signal.load(Ordering::SeqCst) as i32)
    }
}

/// Human readable name used in the exit report.
pub fn signal_description(signal: i32) -> &'static str {
    match signal {
        SIGINT => "CTRL-C",
        SIGTERM => "kill signal",
        SIGHUP => "hangup signal (SIGHUP)",
        SIGQUIT => "quit signal (SIGQUIT)",
        SIGPIPE => "broken pipe",
        _ => "(unknown signal)",
    }
}
