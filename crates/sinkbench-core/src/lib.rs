//! # sinkbench-core
//!
//! **Drive a telemetry sink at full rate, and find out why it died.**
//!
//! `sinkbench-core` generates structured events in fixed-size batches, hands
//! them to an [`EventSink`], and reports throughput and memory pressure after
//! every batch. Alongside the workload it arms a diagnostic capture: when the
//! process receives SIGABRT or SIGTERM (a native dependency calling `abort()`,
//! an orchestrator killing the pod) every thread's stack is written to stderr
//! and the process exits with [`DIAGNOSTIC_EXIT_CODE`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use sinkbench_core::{EventSink, HarnessConfig, HarnessContext, NullSink};
//!
//! let config = HarnessConfig {
//!     token: "tenant-0123".to_string(),
//!     ..Default::default()
//! };
//! let mut ctx = HarnessContext::new(config).unwrap();
//! ctx.install_capture().unwrap();
//!
//! let mut sink = NullSink::new();
//! sink.init(&ctx.config().token).unwrap();
//! let summary = ctx.run(&mut sink);
//! sink.shutdown().unwrap();
//! println!("{} batches", summary.batches);
//! ```
//!
//! ## Architecture
//!
//! Producer → Sink, once per event; Memory Probe once per batch; Capture
//! watcher off to the side, idle until a fatal signal arrives.
//!
//! Binaries that want live allocation figures install [`TrackingAllocator`]
//! as their global allocator.

pub mod capture;
pub mod clock;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod memory;
pub mod record;
pub mod sink;

pub use capture::{CaptureSignal, DIAGNOSTIC_EXIT_CODE, DiagnosticCapture, DumpBuffer};
pub use clock::{Clock, Elapsed, SystemClock};
pub use config::{CaptureConfig, DriverConfig, HarnessConfig, SinkConfig};
pub use context::{ConsoleGate, HarnessContext};
pub use driver::{BatchDriver, BatchReport, RunSummary, SequenceCounter};
pub use error::{CaptureError, ConfigError, SinkError};
pub use memory::{MemorySnapshot, TrackingAllocator};
pub use record::{EventLease, EventProducer, EventRecord};
pub use sink::{EventSink, JsonLinesSink, MemorySink, NullSink, make_sink};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
