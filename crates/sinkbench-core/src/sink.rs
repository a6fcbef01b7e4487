//! Sink lifecycle and stand-in sinks.
//!
//! The real transport is an external collaborator. The harness only needs
//! its lifecycle: `init` with a token, `log` one event at a time, `shutdown`
//! to flush. Anything the sink does internally (batching, retries, threads)
//! is invisible to the driver, which treats `log` as a synchronous call.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use uuid::Uuid;

use crate::config::SinkConfig;
use crate::error::SinkError;
use crate::record::EventRecord;

/// Telemetry transport consumed by the driver.
pub trait EventSink {
    /// Short identifier for logs and banners.
    fn name(&self) -> &'static str;

    /// Prepare the sink. `token` is opaque to the harness.
    fn init(&mut self, token: &str) -> Result<(), SinkError>;

    /// Accept one event. The record is borrowed for this call only.
    fn log(&mut self, record: &EventRecord) -> Result<(), SinkError>;

    /// Push buffered events downstream. Default: nothing buffered.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Flush and release the sink.
    fn shutdown(&mut self) -> Result<(), SinkError>;
}

/// Build the sink selected by `config`.
pub fn make_sink(config: &SinkConfig) -> Box<dyn EventSink> {
    match config {
        SinkConfig::Null => Box::new(NullSink::new()),
        SinkConfig::JsonLines { path } => Box::new(JsonLinesSink::new(path)),
    }
}

/// Lifecycle position shared by the stand-in sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Closed,
}

impl Phase {
    fn ensure_running(self) -> Result<(), SinkError> {
        match self {
            Self::Created => Err(SinkError::NotInitialized),
            Self::Running => Ok(()),
            Self::Closed => Err(SinkError::ShutDown),
        }
    }
}

// ---------------------------------------------------------------------------
// Null sink
// ---------------------------------------------------------------------------

/// Accepts and drops every event. Measures pure harness overhead.
#[derive(Debug)]
pub struct NullSink {
    phase: Phase,
    accepted: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            phase: Phase::Created,
            accepted: 0,
        }
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for NullSink {
    fn name(&self) -> &'static str {
        "null"
    }

    fn init(&mut self, _token: &str) -> Result<(), SinkError> {
        self.phase = Phase::Running;
        Ok(())
    }

    fn log(&mut self, _record: &EventRecord) -> Result<(), SinkError> {
        self.phase.ensure_running()?;
        self.accepted += 1;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), SinkError> {
        self.phase = Phase::Closed;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Memory sink
// ---------------------------------------------------------------------------

/// Keeps a copy of every accepted record, in arrival order.
///
/// Calls listed in [`failing_calls`](Self::failing_calls) (1-based) are
/// rejected instead. Rejected calls are still counted as attempts.
#[derive(Debug)]
pub struct MemorySink {
    phase: Phase,
    token: Option<String>,
    records: Vec<EventRecord>,
    calls: u64,
    fail_on: BTreeSet<u64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            phase: Phase::Created,
            token: None,
            records: Vec::new(),
            calls: 0,
            fail_on: BTreeSet::new(),
        }
    }

    /// A sink that is already initialized.
    pub fn running() -> Self {
        let mut sink = Self::new();
        sink.phase = Phase::Running;
        sink
    }

    /// Reject the given `log` calls, counted from 1.
    pub fn failing_calls(mut self, calls: impl IntoIterator<Item = u64>) -> Self {
        self.fail_on.extend(calls);
        self
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// `log` calls attempted, accepted or not.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_shut_down(&self) -> bool {
        self.phase == Phase::Closed
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn init(&mut self, token: &str) -> Result<(), SinkError> {
        self.token = Some(token.to_string());
        self.phase = Phase::Running;
        Ok(())
    }

    fn log(&mut self, record: &EventRecord) -> Result<(), SinkError> {
        self.calls += 1;
        if self.fail_on.contains(&self.calls) {
            return Err(SinkError::Rejected(format!("scripted failure on call {}", self.calls)));
        }
        self.phase.ensure_running()?;
        self.records.push(record.clone());
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), SinkError> {
        self.phase = Phase::Closed;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON-lines sink
// ---------------------------------------------------------------------------

/// One line of JSON-lines output.
#[derive(Serialize)]
struct Envelope<'a> {
    ikey: &'a str,
    run: &'a str,
    time: u64,
    data: &'a EventRecord,
}

/// Open-file state of a running [`JsonLinesSink`].
#[derive(Debug)]
struct Output {
    writer: BufWriter<File>,
    ikey: String,
    run_id: String,
}

/// Appends one JSON object per event to a file.
///
/// Writes go through a buffered writer; `flush` and `shutdown` push them to
/// the file. The instrumentation key is `o:` followed by the tenant part of
/// the token (everything before the first `-`).
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    phase: Phase,
    output: Option<Output>,
    written: u64,
}

impl JsonLinesSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            phase: Phase::Created,
            output: None,
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Run identifier assigned at `init`.
    pub fn run_id(&self) -> Option<&str> {
        self.output.as_ref().map(|o| o.run_id.as_str())
    }
}

/// Derive the instrumentation key from a tenant token.
pub fn instrumentation_key(token: &str) -> Result<String, SinkError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(SinkError::InvalidToken("token is empty".to_string()));
    }
    let tenant = token.split('-').next().unwrap_or_default();
    if tenant.is_empty() {
        return Err(SinkError::InvalidToken(
            "token has no tenant part before the first '-'".to_string(),
        ));
    }
    Ok(format!("o:{tenant}"))
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl EventSink for JsonLinesSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn init(&mut self, token: &str) -> Result<(), SinkError> {
        let ikey = instrumentation_key(token)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let run_id = Uuid::new_v4().to_string();
        log::info!(
            "jsonl sink writing to {} (ikey {ikey}, run {run_id})",
            self.path.display()
        );
        self.output = Some(Output {
            writer: BufWriter::new(file),
            ikey,
            run_id,
        });
        self.phase = Phase::Running;
        Ok(())
    }

    fn log(&mut self, record: &EventRecord) -> Result<(), SinkError> {
        self.phase.ensure_running()?;
        let Some(output) = self.output.as_mut() else {
            return Err(SinkError::NotInitialized);
        };
        let envelope = Envelope {
            ikey: &output.ikey,
            run: &output.run_id,
            time: unix_ms_now(),
            data: record,
        };
        serde_json::to_writer(&mut output.writer, &envelope)?;
        output.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(output) = self.output.as_mut() {
            output.writer.flush()?;
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), SinkError> {
        if self.phase == Phase::Closed {
            return Ok(());
        }
        self.flush()?;
        self.output = None;
        self.phase = Phase::Closed;
        Ok(())
    }
}
