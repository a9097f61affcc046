//! Signal handling for graceful daemon shutdown.
//!
//! SIGTERM and SIGINT request shutdown; SIGHUP requests a reload. The libc
//! handlers only store into static atomics (async-signal-safe); the main
//! loop drains them into [`SignalState`] whenever it checks for requests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
static RELOAD_FLAG: AtomicBool = AtomicBool::new(false);

/// Signal types that the daemon handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM or SIGINT.
    Terminate,
    /// SIGHUP.
    Hangup,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM/SIGINT"),
            SignalKind::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// Requests shared between the signal path, the command threads, and the
/// main loop.
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    reload_requested: AtomicBool,
    signal_count: AtomicU32,
}

impl SignalState {
    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Check if reload has been requested (and clear the flag).
    #[inline]
    pub fn take_reload_request(&self) -> bool {
        self.reload_requested.swap(false, Ordering::AcqRel)
    }

    /// Request shutdown (can be called from any thread).
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
    }

    /// Request reload (can be called from any thread).
    pub fn request_reload(&self) {
        self.reload_requested.store(true, Ordering::Release);
    }

    fn record_signal(&self, kind: SignalKind) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
        info!(signal = %kind, "Signal received");
    }

    /// Total number of signals received.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }
}

/// Cloneable handle over the shared signal state.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Create a handler and install the process signal handlers.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a handler cannot be installed.
    pub fn new() -> std::io::Result<Self> {
        #[cfg(unix)]
        install_unix_handlers()?;

        Ok(Self::detached())
    }

    /// Handler that only supports manual requests.
    pub fn detached() -> Self {
        Self {
            state: Arc::new(SignalState::default()),
        }
    }

    /// Move pending process signals into the shared state.
    fn drain(&self) {
        if SHUTDOWN_FLAG.swap(false, Ordering::AcqRel) {
            self.state.record_signal(SignalKind::Terminate);
            self.state.request_shutdown();
        }
        if RELOAD_FLAG.swap(false, Ordering::AcqRel) {
            self.state.record_signal(SignalKind::Hangup);
            self.state.request_reload();
        }
    }

    /// Check if shutdown has been requested.
    pub fn shutdown_requested(&self) -> bool {
        self.drain();
        self.state.shutdown_requested()
    }

    /// Check if reload has been requested (clears the flag).
    pub fn take_reload_request(&self) -> bool {
        self.drain();
        self.state.take_reload_request()
    }

    /// Manually request shutdown.
    pub fn request_shutdown(&self) {
        debug!("Manual shutdown requested");
        self.state.request_shutdown();
    }

    /// Get the signal state for inspection.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn install_unix_handlers() -> std::io::Result<()> {
    use std::os::raw::c_int;

    extern "C" fn on_terminate(_: c_int) {
        SHUTDOWN_FLAG.store(true, Ordering::Release);
    }

    extern "C" fn on_hangup(_: c_int) {
        RELOAD_FLAG.store(true, Ordering::Release);
    }

    let handlers: [(c_int, extern "C" fn(c_int)); 3] = [
        (libc::SIGTERM, on_terminate),
        (libc::SIGINT, on_terminate),
        (libc::SIGHUP, on_hangup),
    ];

    for (signal, handler) in handlers {
        // SAFETY: the handlers only touch static atomics.
        let previous = unsafe { libc::signal(signal, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }

    debug!("Unix signal handlers registered");
    Ok(())
}
