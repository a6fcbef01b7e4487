//! Signal-triggered diagnostic capture.
//!
//! [`install`] arms a watcher thread named `diagnostic-capture` that sleeps
//! until the process receives SIGABRT or SIGTERM. It then:
//!
//! 1. seals the console gate so no report line is printed after the dump
//!    starts,
//! 2. writes every thread's stack into a bounded [`DumpBuffer`],
//! 3. prints a header, the dump, the watcher's own stack and a footer
//!    straight to file descriptor 2,
//! 4. exits with [`DIAGNOSTIC_EXIT_CODE`] without running destructors or
//!    flushing sinks.
//!
//! The signal handler itself only writes the signal number into a pipe. A
//! thread that raised the signal on itself (a native `abort()` in a sink,
//! for example) parks inside the handler until the watcher exits the
//! process. The watcher is never joined or cancelled.
//!
//! A second signal during a capture is not serialised and may interleave its
//! output with the first.

pub mod dump;
pub mod threads;

use std::fmt;

use crate::config::CaptureConfig;
use crate::context::ConsoleGate;
use crate::error::CaptureError;

pub use dump::DumpBuffer;

/// Exit status after a diagnostic capture. No other path exits with it.
pub const DIAGNOSTIC_EXIT_CODE: i32 = 255;

/// Name of the watcher thread, as it appears in dumps.
pub const WATCHER_THREAD_NAME: &str = "diagnostic-capture";

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Signals that trigger a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureSignal {
    Abort,
    Terminate,
}

impl CaptureSignal {
    pub const ALL: [CaptureSignal; 2] = [CaptureSignal::Abort, CaptureSignal::Terminate];

    pub fn name(self) -> &'static str {
        match self {
            Self::Abort => "SIGABRT",
            Self::Terminate => "SIGTERM",
        }
    }

    pub fn number(self) -> i32 {
        match self {
            Self::Abort => libc::SIGABRT,
            Self::Terminate => libc::SIGTERM,
        }
    }

    pub fn from_number(signo: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.number() == signo)
    }
}

impl fmt::Display for CaptureSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Proof that the capture is armed. Dropping it does not disarm anything.
#[derive(Debug)]
pub struct DiagnosticCapture {
    config: CaptureConfig,
    watcher: std::thread::Thread,
}

impl DiagnosticCapture {
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn signals(&self) -> &'static [CaptureSignal] {
        &CaptureSignal::ALL
    }

    /// The watcher thread.
    pub fn watcher(&self) -> &std::thread::Thread {
        &self.watcher
    }
}

/// Arm the capture. Call once, before any workload starts.
///
/// On success SIGABRT and SIGTERM are intercepted for the rest of the
/// process lifetime, and both are blocked on the calling thread so that
/// threads it spawns later leave process-directed signals to the watcher.
/// A second call fails with [`CaptureError::AlreadyInstalled`], even if the
/// first one failed part-way.
pub fn install(
    config: &CaptureConfig,
    console: ConsoleGate,
) -> Result<DiagnosticCapture, CaptureError> {
    imp::install(config, console)
}

#[cfg(unix)]
mod imp {
    use std::io::{self, Write};
    use std::os::unix::thread::JoinHandleExt;
    use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

    use super::{
        CaptureSignal, DIAGNOSTIC_EXIT_CODE, DiagnosticCapture, WATCHER_THREAD_NAME, threads,
    };
    use crate::capture::dump::DumpBuffer;
    use crate::config::CaptureConfig;
    use crate::context::ConsoleGate;
    use crate::error::CaptureError;

    static INSTALLED: AtomicBool = AtomicBool::new(false);
    /// Write end of the wake pipe, or -1 before install.
    static WAKE_FD: AtomicI32 = AtomicI32::new(-1);
    /// `pthread_t` of the watcher.
    static WATCHER: AtomicUsize = AtomicUsize::new(0);

    pub(super) fn install(
        config: &CaptureConfig,
        console: ConsoleGate,
    ) -> Result<DiagnosticCapture, CaptureError> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyInstalled);
        }

        let (read_fd, write_fd) = wake_pipe().map_err(CaptureError::Pipe)?;
        WAKE_FD.store(write_fd, Ordering::SeqCst);

        threads::install_sampler().map_err(|source| CaptureError::Register {
            signal: "SIGURG",
            source,
        })?;

        let watcher_config = config.clone();
        let handle = std::thread::Builder::new()
            .name(WATCHER_THREAD_NAME.to_string())
            .spawn(move || watch(read_fd, &watcher_config, &console))
            .map_err(CaptureError::Spawn)?;
        WATCHER.store(handle.as_pthread_t() as usize, Ordering::SeqCst);
        let watcher = handle.thread().clone();
        // Detached: the watcher lives until the process exits.
        drop(handle);

        for signal in CaptureSignal::ALL {
            register(signal).map_err(|source| CaptureError::Register {
                signal: signal.name(),
                source,
            })?;
        }
        set_fatal_mask(libc::SIG_BLOCK).map_err(|source| CaptureError::Register {
            signal: "SIGABRT/SIGTERM mask",
            source,
        })?;

        log::info!(
            "diagnostic capture armed for SIGABRT and SIGTERM (dump capacity {} bytes)",
            config.dump_capacity
        );
        Ok(DiagnosticCapture {
            config: config.clone(),
            watcher,
        })
    }

    fn wake_pipe() -> io::Result<(i32, i32)> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: `fds` is a valid two-element buffer for pipe(2).
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        for fd in fds {
            // SAFETY: fd was just returned by pipe(2).
            unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
        }
        Ok((fds[0], fds[1]))
    }

    fn register(signal: CaptureSignal) -> io::Result<()> {
        // SAFETY: a zeroed sigaction is a valid "no flags, empty mask" value;
        // on_fatal_signal is an extern "C" fn taking the signal number.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_fatal_signal as *const () as libc::sighandler_t;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signal.number(), &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Block or unblock SIGABRT and SIGTERM on the calling thread.
    fn set_fatal_mask(how: libc::c_int) -> io::Result<()> {
        // SAFETY: the set is initialised by sigemptyset before use.
        let rc = unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            for signal in CaptureSignal::ALL {
                libc::sigaddset(&mut set, signal.number());
            }
            libc::pthread_sigmask(how, &set, std::ptr::null_mut())
        };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(())
    }

    extern "C" fn on_fatal_signal(signo: libc::c_int) {
        let fd = WAKE_FD.load(Ordering::SeqCst);
        if fd >= 0 {
            let byte = signo as u8;
            // SAFETY: write(2) is async-signal-safe; the buffer is one local byte.
            unsafe { libc::write(fd, (&byte as *const u8).cast(), 1) };
        }

        // SAFETY: pthread_self has no preconditions.
        let me = unsafe { libc::pthread_self() } as usize;
        if me == WATCHER.load(Ordering::SeqCst) {
            return;
        }
        // Returning would let a self-raised abort() fall through to the
        // default action before the dump is written.
        loop {
            // SAFETY: pause(2) only suspends this thread until a signal arrives.
            unsafe { libc::pause() };
        }
    }

    fn watch(read_fd: i32, config: &CaptureConfig, console: &ConsoleGate) {
        if let Err(e) = set_fatal_mask(libc::SIG_UNBLOCK) {
            log::error!("diagnostic watcher could not unblock fatal signals: {e}");
        }

        let mut byte = 0u8;
        loop {
            // SAFETY: reading one byte into a local from a pipe we own.
            let n = unsafe { libc::read(read_fd, (&mut byte as *mut u8).cast(), 1) };
            if n == 1 {
                break;
            }
            let err = io::Error::last_os_error();
            if n < 0 && err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            log::error!("diagnostic watcher lost its wake pipe: {err}");
            return;
        }

        match CaptureSignal::from_number(i32::from(byte)) {
            Some(signal) => capture_and_exit(signal, config, console),
            None => capture_and_exit(CaptureSignal::Terminate, config, console),
        }
    }

    fn capture_and_exit(signal: CaptureSignal, config: &CaptureConfig, console: &ConsoleGate) -> ! {
        let sealed = console.seal(config.response_timeout);

        let mut dump = DumpBuffer::new(config.dump_capacity);
        // Writes into a DumpBuffer never fail.
        let _ = threads::write_all_threads(&mut dump, config.response_timeout);

        let mut err = RawStderr;
        let _ = writeln!(err, "\n=== sinkbench diagnostic capture: received {signal} ===");
        if !sealed {
            let _ = writeln!(
                err,
                "(console still busy after {:?}; output may interleave)",
                config.response_timeout
            );
        }
        let _ = writeln!(err, "--- all threads ---");
        let _ = err.write_all(dump.as_str().as_bytes());
        if dump.is_truncated() {
            let _ = writeln!(err, "\n[dump truncated at {} bytes]", dump.capacity());
        }
        let _ = writeln!(err, "--- current thread: {WATCHER_THREAD_NAME} ---");
        let _ = writeln!(err, "{:?}", backtrace::Backtrace::new());
        let _ = writeln!(
            err,
            "=== end of diagnostic capture, exiting with status {DIAGNOSTIC_EXIT_CODE} ==="
        );

        // SAFETY: _exit(2) terminates immediately; nothing runs after it.
        unsafe { libc::_exit(DIAGNOSTIC_EXIT_CODE) }
    }

    /// Unbuffered, lock-free writer on file descriptor 2.
    ///
    /// `std::io::stderr()` takes a reentrant lock another thread may hold
    /// forever once the process is being torn down.
    pub(super) struct RawStderr;

    impl Write for RawStderr {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            loop {
                // SAFETY: buf is a valid slice for its length.
                let n = unsafe { libc::write(libc::STDERR_FILENO, buf.as_ptr().cast(), buf.len()) };
                if n >= 0 {
                    return Ok(n as usize);
                }
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::DiagnosticCapture;
    use crate::config::CaptureConfig;
    use crate::context::ConsoleGate;
    use crate::error::CaptureError;

    pub(super) fn install(
        _config: &CaptureConfig,
        _console: ConsoleGate,
    ) -> Result<DiagnosticCapture, CaptureError> {
        Err(CaptureError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_numbers_round_trip() {
        for signal in CaptureSignal::ALL {
            assert_eq!(CaptureSignal::from_number(signal.number()), Some(signal));
        }
        assert_eq!(CaptureSignal::from_number(libc::SIGINT), None);
    }

    #[test]
    fn test_signal_display() {
        assert_eq!(CaptureSignal::Abort.to_string(), "SIGABRT");
        assert_eq!(CaptureSignal::Terminate.to_string(), "SIGTERM");
    }

    #[test]
    fn test_exit_code_is_minus_one_on_unix() {
        assert_eq!(DIAGNOSTIC_EXIT_CODE, (-1i32) as u8 as i32);
    }

    #[cfg(unix)]
    #[test]
    fn test_raw_stderr_accepts_writes() {
        use std::io::Write;
        let mut err = imp::RawStderr;
        assert_eq!(err.write(b"").unwrap(), 0);
        err.flush().unwrap();
    }

    // Arms the capture for the whole test binary; no test here sends the
    // fatal signals, so it stays dormant.
    #[cfg(unix)]
    #[test]
    fn test_second_install_is_rejected() {
        let config = CaptureConfig::default();
        let first = install(&config, ConsoleGate::new());
        let first = first.expect("first install should succeed");
        assert_eq!(first.watcher().name(), Some(WATCHER_THREAD_NAME));
        assert_eq!(first.signals(), &CaptureSignal::ALL);

        let second = install(&config, ConsoleGate::new());
        assert!(matches!(second, Err(CaptureError::AlreadyInstalled)));
    }
}
