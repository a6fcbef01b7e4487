//! Integration tests for the sinkbench binary: exit codes, report lines and crash dumps.

use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

fn sinkbench() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sinkbench"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ---------------------------------------------------------------------------
// Bounded runs and startup failures
// ---------------------------------------------------------------------------

#[test]
fn bounded_run_prints_reports_and_summary() {
    let output = sinkbench()
        .args(["run", "--token", "tenant-key", "--batch-size", "100"])
        .args(["--pause-ms", "0", "--batches", "2"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("0: Logged 100 events in "), "{out}");
    assert!(out.contains("1: Logged 100 events in "), "{out}");
    assert!(!out.contains("2: Logged"), "{out}");
    let memory_lines = out.lines().filter(|l| l.starts_with("Alloc = ")).count();
    assert_eq!(memory_lines, 2, "{out}");
    assert!(out.contains("\tTotalAlloc = "), "{out}");
    assert!(out.contains("Run summary"));
    assert!(out.contains("Events:   200"));
}

#[test]
fn jsonl_run_writes_every_event() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("events.jsonl");
    let output = sinkbench()
        .args(["run", "--token", "acme-123", "--batch-size", "5"])
        .args(["--pause-ms", "0", "--batches", "3", "--sink", "jsonl"])
        .arg("--output")
        .arg(&path)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 15);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["ikey"], "o:acme");
    assert_eq!(first["data"]["name"], "SinkBench.StressEvent");
}

#[test]
fn zero_batch_size_is_a_startup_error() {
    let output = sinkbench()
        .args(["run", "--token", "t-1", "--batch-size", "0"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Error: batch size"));
    assert!(!stdout(&output).contains("Logged"));
}

#[test]
fn rejected_token_stops_before_any_batch() {
    let dir = tempfile::tempdir().unwrap();
    let output = sinkbench()
        .args(["run", "--token=-no-tenant", "--sink", "jsonl", "--batches", "1"])
        .arg("--output")
        .arg(dir.path().join("events.jsonl"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("failed to start"));
    assert!(!stdout(&output).contains("Logged"));
}

#[test]
fn missing_token_is_a_usage_error() {
    let output = sinkbench().arg("run").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn snapshot_as_json() {
    let output = sinkbench().args(["probe", "--json"]).output().unwrap();
    assert!(output.status.success());
    let snapshot: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(snapshot["gc_cycles"], 0);
    assert!(snapshot["total_alloc_bytes"].as_u64().unwrap() > 0);
}

// ---------------------------------------------------------------------------
// Diagnostic capture
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
#[test]
fn sigterm_mid_run_dumps_and_exits_255() {
    let mut child = sinkbench()
        .args(["run", "--token", "tenant-key", "--batch-size", "2000", "--pause-ms", "20"])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    // Drain stderr while the child writes; the dump can outgrow a pipe buffer.
    let mut pipe = child.stderr.take().unwrap();
    let reader = std::thread::spawn(move || {
        let mut text = String::new();
        let _ = pipe.read_to_string(&mut text);
        text
    });

    std::thread::sleep(Duration::from_millis(300));
    // SAFETY: signalling a child we spawned.
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    assert_eq!(rc, 0);

    let sent = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        assert!(sent.elapsed() < Duration::from_secs(2), "no exit within 2 s");
        std::thread::sleep(Duration::from_millis(10));
    };
    let err = reader.join().unwrap();

    assert_eq!(status.code(), Some(255));
    assert!(err.contains("received SIGTERM"), "{err}");
    assert!(err.contains("--- all threads ---"), "{err}");
    assert!(err.contains("thread "), "{err}");
    assert!(err.contains("--- current thread: diagnostic-capture ---"), "{err}");
    assert!(err.contains("exiting with status 255"), "{err}");
}

#[cfg(target_os = "linux")]
#[test]
fn no_report_line_follows_the_dump_header() {
    // One pipe for both streams, so the order of report lines and dump holds.
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(r#"exec "$0" run --token tenant-key --batch-size 50 --pause-ms 0 2>&1"#)
        .arg(env!("CARGO_BIN_EXE_sinkbench"))
        .env("RUST_LOG", "warn")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let mut pipe = child.stdout.take().unwrap();
    let reader = std::thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = pipe.read_to_end(&mut bytes);
        String::from_utf8_lossy(&bytes).into_owned()
    });

    std::thread::sleep(Duration::from_millis(300));
    // SAFETY: signalling a child we spawned; `exec` kept its pid.
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    assert_eq!(rc, 0);

    let status = child.wait().unwrap();
    let merged = reader.join().unwrap();
    assert_eq!(status.code(), Some(255));

    let header = merged
        .find("diagnostic capture: received SIGTERM")
        .expect("dump header missing");
    let (before, after) = merged.split_at(header);
    assert!(before.contains(": Logged "), "no batch completed before the signal");
    for line in after.lines() {
        assert!(!line.contains(": Logged "), "report after dump: {line}");
        assert!(!line.starts_with("Alloc = "), "report after dump: {line}");
    }
    assert!(after.contains("#0"), "no frames in dump");
}

#[cfg(target_os = "linux")]
#[test]
fn crash_abort_from_worker() {
    let output = sinkbench()
        .args(["crash", "--signal", "abort", "--threads", "2"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(255));
    let err = stderr(&output);
    assert!(err.contains("received SIGABRT"), "{err}");
    assert!(err.contains("\"bench-worker-0\""), "{err}");
    assert!(err.contains("\"bench-worker-1\""), "{err}");
    assert!(err.contains("\"bench-aborter\""), "{err}");
}

#[cfg(target_os = "linux")]
#[test]
fn crash_terminate() {
    let output = sinkbench()
        .args(["crash", "--signal", "terminate", "--threads", "1"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(255));
    let err = stderr(&output);
    assert!(err.contains("received SIGTERM"), "{err}");
    assert!(err.contains("\"bench-worker-0\""), "{err}");
}
