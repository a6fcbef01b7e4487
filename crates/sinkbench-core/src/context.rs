//! Process-wide harness state, owned instead of global.
//!
//! A [`HarnessContext`] carries the validated configuration, the console
//! gate shared with the diagnostic watcher, the graceful-stop flag and the
//! capture handle once armed.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

use crate::capture::{self, DiagnosticCapture};
use crate::config::HarnessConfig;
use crate::driver::{BatchDriver, BatchReport, RunSummary};
use crate::error::{CaptureError, ConfigError};
use crate::sink::EventSink;

// ---------------------------------------------------------------------------
// Console gate
// ---------------------------------------------------------------------------

/// Serialises operator output on stdout.
///
/// Report lines go through [`emit`](Self::emit). The diagnostic watcher
/// [`seal`](Self::seal)s the gate before dumping; after that every `emit`
/// blocks for the short remainder of the process.
#[derive(Debug, Clone, Default)]
pub struct ConsoleGate(Arc<Mutex<()>>);

impl ConsoleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print `lines` to stdout as one uninterrupted block.
    ///
    /// Write errors (a closed pipe, say) are ignored.
    pub fn emit<I, L>(&self, lines: I)
    where
        I: IntoIterator<Item = L>,
        L: AsRef<str>,
    {
        let _held = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = std::io::stdout().lock();
        for line in lines {
            let _ = writeln!(out, "{}", line.as_ref());
        }
        let _ = out.flush();
    }

    /// Take the gate and never give it back.
    ///
    /// Waits up to `timeout` for an in-progress `emit` to finish. Returns
    /// `false` if the gate was still held when the wait ran out.
    pub fn seal(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.0.try_lock() {
                Ok(guard) => {
                    std::mem::forget(guard);
                    return true;
                }
                Err(TryLockError::Poisoned(poisoned)) => {
                    std::mem::forget(poisoned.into_inner());
                    return true;
                }
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    /// Whether someone holds the gate right now.
    pub fn is_held(&self) -> bool {
        matches!(self.0.try_lock(), Err(TryLockError::WouldBlock))
    }
}

// ---------------------------------------------------------------------------
// Harness context
// ---------------------------------------------------------------------------

/// Everything one harness run needs, passed explicitly.
#[derive(Debug)]
pub struct HarnessContext {
    config: HarnessConfig,
    console: ConsoleGate,
    stop: Arc<AtomicBool>,
    capture: Option<DiagnosticCapture>,
}

impl HarnessContext {
    /// Validate `config` and build a context around it.
    pub fn new(config: HarnessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            console: ConsoleGate::new(),
            stop: Arc::new(AtomicBool::new(false)),
            capture: None,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn console(&self) -> &ConsoleGate {
        &self.console
    }

    /// Arm the diagnostic capture with this context's console gate.
    pub fn install_capture(&mut self) -> Result<&DiagnosticCapture, CaptureError> {
        let handle = capture::install(&self.config.capture, self.console.clone())?;
        Ok(self.capture.insert(handle))
    }

    pub fn capture(&self) -> Option<&DiagnosticCapture> {
        self.capture.as_ref()
    }

    /// Shared handle to the graceful-stop flag, for a signal handler.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Drive `sink` until stopped, printing each report through the gate.
    ///
    /// The sink must already be initialised; shutting it down is left to
    /// the caller.
    pub fn run<S: EventSink + ?Sized>(&self, sink: &mut S) -> RunSummary {
        let mut driver = BatchDriver::new(self.config.driver.clone());
        self.run_with(&mut driver, sink)
    }

    /// [`run`](Self::run) with a caller-built driver (custom clock, say).
    pub fn run_with<C, S>(&self, driver: &mut BatchDriver<C>, sink: &mut S) -> RunSummary
    where
        C: crate::clock::Clock,
        S: EventSink + ?Sized,
    {
        log::info!(
            "driving {} sink: {} events per batch, {:?} pause",
            sink.name(),
            self.config.driver.batch_size,
            self.config.driver.pause
        );
        driver.run(sink, &self.stop, |report: &BatchReport| {
            self.console
                .emit([report.throughput_line(), report.memory_line()]);
        })
    }
}
