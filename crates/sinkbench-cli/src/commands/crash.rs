//! `sinkbench crash`: prove the diagnostic path end to end.
//!
//! Arms the capture, parks a few named workers so the dump has something to
//! show, then raises the chosen signal. The process never returns from here.

use std::time::Duration;

use sinkbench_core::{HarnessConfig, HarnessContext};

use crate::CrashSignal;

pub fn run(signal: CrashSignal, threads: usize) {
    let mut ctx = match HarnessContext::new(HarnessConfig::default()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    super::install_capture_or_exit(&mut ctx);

    for index in 0..threads {
        let spawned = std::thread::Builder::new()
            // Linux keeps only 15 bytes of a thread name.
            .name(format!("bench-worker-{index}"))
            .spawn(|| {
                loop {
                    std::thread::park();
                }
            });
        if let Err(e) = spawned {
            eprintln!("Error: failed to start worker {index}: {e}");
            std::process::exit(1);
        }
    }
    // Let the workers reach park() so their stacks are meaningful.
    std::thread::sleep(Duration::from_millis(50));

    match signal {
        CrashSignal::Abort => {
            let raiser = std::thread::Builder::new()
                .name("bench-aborter".to_string())
                .spawn(|| {
                    // SAFETY: abort(3) has no preconditions.
                    unsafe { libc::abort() }
                });
            if let Err(e) = raiser {
                eprintln!("Error: failed to start aborting thread: {e}");
                std::process::exit(1);
            }
        }
        CrashSignal::Terminate => {
            // SAFETY: kill(2) on our own pid with a signal we handle.
            unsafe { libc::kill(libc::getpid(), libc::SIGTERM) };
        }
    }

    // The watcher exits the process; this thread just waits for it.
    loop {
        std::thread::park();
    }
}
