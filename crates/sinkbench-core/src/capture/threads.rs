//! Per-thread stack collection for the crash dump.
//!
//! On Linux every thread of the process is listed from `/proc/self/task`.
//! Each one is then asked, with a dedicated signal sent by `tgkill`, to walk
//! its own stack into a single preallocated slot that the watcher reads back.
//! The handler neither allocates nor locks. A thread that does not answer in
//! time (blocked in an uninterruptible call, or stuck unwinding) is listed
//! with its name and scheduler state only.
//!
//! Other platforms list no threads; the dump then carries only the watcher's
//! own stack.

use std::fmt::{self, Write};
use std::time::Duration;

use super::dump::{DumpBuffer, write_frames};

/// One thread of this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEntry {
    pub tid: i32,
    pub name: String,
    /// Scheduler state letter from `/proc` (`R`, `S`, `D`, ...).
    pub state: char,
}

impl ThreadEntry {
    fn state_label(&self) -> &'static str {
        match self.state {
            'R' => "running",
            'S' => "sleeping",
            'D' => "uninterruptible",
            'T' | 't' => "stopped",
            'Z' => "zombie",
            'I' => "idle",
            _ => "unknown",
        }
    }
}

/// Write every thread's header and stack into `out`.
///
/// The calling thread is listed but not sampled; its stack is printed
/// separately by the caller.
pub fn write_all_threads(out: &mut DumpBuffer, response_timeout: Duration) -> fmt::Result {
    let threads = list();
    if threads.is_empty() {
        writeln!(out, "(per-thread stacks are not available on this platform)")?;
        return Ok(());
    }

    let me = current_tid();
    writeln!(out, "{} threads", threads.len())?;
    for thread in &threads {
        if out.is_full() {
            break;
        }
        writeln!(
            out,
            "\nthread {} \"{}\" [{}]:",
            thread.tid,
            thread.name,
            thread.state_label()
        )?;
        if thread.tid == me {
            writeln!(out, "  (diagnostic watcher, stack follows the dump)")?;
            continue;
        }
        match sample(thread.tid, response_timeout) {
            Some(frames) if !frames.is_empty() => write_frames(out, &frames)?,
            _ => writeln!(
                out,
                "  <no stack: thread did not answer within {} ms>",
                response_timeout.as_millis()
            )?,
        }
    }
    Ok(())
}

#[cfg(target_os = "linux")]
pub use linux::{current_tid, install_sampler, list, sample};

#[cfg(not(target_os = "linux"))]
pub use fallback::{current_tid, install_sampler, list, sample};

#[cfg(target_os = "linux")]
mod linux {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use super::ThreadEntry;

    /// Signal used to ask a thread for its stack.
    const SAMPLE_SIGNAL: libc::c_int = libc::SIGURG;
    const MAX_FRAMES: usize = 64;

    /// Handoff between the sampling handler and the watcher. One sample at a time.
    ///
    /// Every request gets a new generation. An answer counts only if it
    /// carries the generation the watcher is waiting for.
    pub(super) struct SampleSlot {
        target: AtomicI32,
        pub(super) request: AtomicU64,
        pub(super) answered: AtomicU64,
        /// Held by the one handler currently writing `frames`.
        busy: AtomicBool,
        len: AtomicUsize,
        frames: [AtomicUsize; MAX_FRAMES],
    }

    pub(super) static SLOT: SampleSlot = SampleSlot {
        target: AtomicI32::new(0),
        request: AtomicU64::new(0),
        answered: AtomicU64::new(0),
        busy: AtomicBool::new(false),
        len: AtomicUsize::new(0),
        frames: [const { AtomicUsize::new(0) }; MAX_FRAMES],
    };

    /// Serialises callers of [`sample`]; the slot holds one request at a time.
    static SAMPLER: Mutex<()> = Mutex::new(());

    pub fn current_tid() -> i32 {
        // SAFETY: gettid has no preconditions and cannot fail.
        unsafe { libc::syscall(libc::SYS_gettid) as i32 }
    }

    /// Register the stack-sampling handler.
    pub fn install_sampler() -> std::io::Result<()> {
        // SAFETY: a zeroed sigaction is a valid "no flags, empty mask" value;
        // on_sample is an extern "C" fn with the signature sigaction expects.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_sample as *const () as libc::sighandler_t;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(SAMPLE_SIGNAL, &action, std::ptr::null_mut()) != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok(())
    }

    extern "C" fn on_sample(_: libc::c_int) {
        if SLOT.target.load(Ordering::Acquire) != current_tid() {
            return;
        }
        let generation = SLOT.request.load(Ordering::Acquire);
        if SLOT.busy.swap(true, Ordering::Acquire) {
            return;
        }
        let mut n = 0usize;
        // SAFETY: `busy` gives this handler sole use of `frames`. Unwinding
        // from a handler is best effort; if it wedges, the watcher times out
        // and moves on.
        unsafe {
            backtrace::trace_unsynchronized(|frame| {
                SLOT.frames[n].store(frame.ip() as usize, Ordering::Relaxed);
                n += 1;
                n < MAX_FRAMES
            });
        }
        publish(generation, n);
        SLOT.busy.store(false, Ordering::Release);
    }

    /// Offer `len` recorded frames as the answer to request `generation`.
    ///
    /// Dropped if the watcher has already moved on to a later request.
    pub(super) fn publish(generation: u64, len: usize) -> bool {
        if SLOT.request.load(Ordering::Acquire) != generation {
            return false;
        }
        SLOT.len.store(len, Ordering::Relaxed);
        SLOT.answered.store(generation, Ordering::Release);
        true
    }

    /// Ask thread `tid` for its return addresses, waiting up to `timeout`.
    pub fn sample(tid: i32, timeout: Duration) -> Option<Vec<usize>> {
        let _turn = SAMPLER.lock().unwrap_or_else(|e| e.into_inner());
        let generation = SLOT.request.fetch_add(1, Ordering::SeqCst) + 1;
        SLOT.target.store(tid, Ordering::SeqCst);

        // SAFETY: tgkill only delivers a signal; an unknown tid yields ESRCH.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_tgkill,
                libc::getpid(),
                tid,
                SAMPLE_SIGNAL,
            )
        };
        if rc != 0 {
            SLOT.target.store(0, Ordering::SeqCst);
            return None;
        }

        let deadline = Instant::now() + timeout;
        while SLOT.answered.load(Ordering::Acquire) != generation {
            if Instant::now() >= deadline {
                SLOT.target.store(0, Ordering::SeqCst);
                return None;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        SLOT.target.store(0, Ordering::SeqCst);
        let len = SLOT.len.load(Ordering::Relaxed).min(MAX_FRAMES);
        let frames = SLOT.frames[..len]
            .iter()
            .map(|f| f.load(Ordering::Relaxed))
            .collect();
        Some(frames)
    }

    /// Threads of this process, ordered by tid.
    pub fn list() -> Vec<ThreadEntry> {
        let Ok(entries) = std::fs::read_dir("/proc/self/task") else {
            return Vec::new();
        };
        let mut threads: Vec<ThreadEntry> = entries
            .flatten()
            .filter_map(|entry| {
                let tid: i32 = entry.file_name().to_str()?.parse().ok()?;
                let dir = entry.path();
                let name = std::fs::read_to_string(dir.join("comm"))
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();
                let state = std::fs::read_to_string(dir.join("stat"))
                    .ok()
                    .and_then(|stat| parse_state(&stat))
                    .unwrap_or('?');
                Some(ThreadEntry { tid, name, state })
            })
            .collect();
        threads.sort_by_key(|t| t.tid);
        threads
    }

    /// State letter from a `/proc/<pid>/task/<tid>/stat` line.
    ///
    /// The name field may itself contain `)`, so split on the last one.
    pub(super) fn parse_state(stat: &str) -> Option<char> {
        let (_, rest) = stat.rsplit_once(')')?;
        rest.trim_start().chars().next()
    }
}

#[cfg(not(target_os = "linux"))]
mod fallback {
    use std::time::Duration;

    use super::ThreadEntry;

    pub fn current_tid() -> i32 {
        0
    }

    pub fn install_sampler() -> std::io::Result<()> {
        Ok(())
    }

    pub fn sample(_tid: i32, _timeout: Duration) -> Option<Vec<usize>> {
        None
    }

    pub fn list() -> Vec<ThreadEntry> {
        Vec::new()
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::{Mutex, mpsc};

    /// Tests here share the one sampling slot.
    static SLOT_TESTS: Mutex<()> = Mutex::new(());

    fn slot_turn() -> std::sync::MutexGuard<'static, ()> {
        SLOT_TESTS.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(linux::parse_state("123 (main) S 1 2 3"), Some('S'));
        assert_eq!(linux::parse_state("124 (odd) name) R 1"), Some('R'));
        assert_eq!(linux::parse_state("garbage"), None);
    }

    #[test]
    fn test_list_includes_current_thread() {
        let me = current_tid();
        let threads = list();
        assert!(threads.iter().any(|t| t.tid == me), "{threads:?}");
    }

    #[test]
    fn test_list_reports_thread_names() {
        let (tx, rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("named-sampled".to_string())
            .spawn(move || {
                tx.send(current_tid()).unwrap();
                let _ = done_rx.recv();
            })
            .unwrap();
        let tid = rx.recv().unwrap();
        let found = list().into_iter().find(|t| t.tid == tid).unwrap();
        assert_eq!(found.name, "named-sampled");
        done_tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_sample_blocked_thread() {
        let _turn = slot_turn();
        install_sampler().unwrap();
        let (tx, rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let handle = std::thread::spawn(move || {
            tx.send(current_tid()).unwrap();
            let _ = done_rx.recv();
        });
        let tid = rx.recv().unwrap();

        let frames = sample(tid, Duration::from_secs(2)).expect("thread should answer");
        assert!(!frames.is_empty());

        done_tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_sample_unknown_thread() {
        let _turn = slot_turn();
        install_sampler().unwrap();
        assert_eq!(sample(i32::MAX, Duration::from_millis(50)), None);
    }

    #[test]
    fn test_write_all_threads_lists_headers() {
        let _turn = slot_turn();
        install_sampler().unwrap();
        let mut out = DumpBuffer::new(1 << 20);
        write_all_threads(&mut out, Duration::from_millis(500)).unwrap();
        assert!(out.as_str().contains("threads"));
        assert!(out.as_str().contains("diagnostic watcher"));
    }

    #[test]
    fn test_late_answer_is_not_attributed_to_next_request() {
        let _turn = slot_turn();
        install_sampler().unwrap();

        // A thread that never answers: the sampling signal stays blocked.
        let (tx, rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let silent = std::thread::spawn(move || {
            // SAFETY: the set is initialised by sigemptyset before use.
            unsafe {
                let mut set: libc::sigset_t = std::mem::zeroed();
                libc::sigemptyset(&mut set);
                libc::sigaddset(&mut set, libc::SIGURG);
                libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
            }
            tx.send(current_tid()).unwrap();
            let _ = done_rx.recv();
        });
        let tid = rx.recv().unwrap();

        let earlier = linux::SLOT.request.load(Ordering::SeqCst);
        let pending = std::thread::spawn(move || sample(tid, Duration::from_millis(300)));
        while linux::SLOT.request.load(Ordering::SeqCst) == earlier {
            std::thread::yield_now();
        }

        // The previous request's handler finishes late.
        assert!(!linux::publish(earlier, 3));
        linux::SLOT.answered.store(earlier, Ordering::SeqCst);

        assert_eq!(pending.join().unwrap(), None);
        done_tx.send(()).unwrap();
        silent.join().unwrap();
    }
}
