//! `sinkbench run`: drive a sink in batches until stopped.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use sinkbench_core::{
    CaptureConfig, DriverConfig, HarnessConfig, HarnessContext, SinkConfig, make_sink,
};

use crate::SinkKind;

const DEFAULT_OUTPUT: &str = "sinkbench-events.jsonl";

pub struct RunCommandConfig<'a> {
    pub token: String,
    pub batch_size: usize,
    pub pause_ms: u64,
    pub batches: Option<u64>,
    pub sink: SinkKind,
    pub output_path: Option<&'a str>,
    pub event_name: String,
    pub dump_capacity: usize,
}

/// Run the run command.
pub fn run(cmd: RunCommandConfig<'_>) {
    let sink = match cmd.sink {
        SinkKind::Null => SinkConfig::Null,
        SinkKind::Jsonl => SinkConfig::JsonLines {
            path: PathBuf::from(cmd.output_path.unwrap_or(DEFAULT_OUTPUT)),
        },
    };
    let config = HarnessConfig {
        token: cmd.token,
        driver: DriverConfig {
            batch_size: cmd.batch_size,
            pause: Duration::from_millis(cmd.pause_ms),
            max_batches: cmd.batches,
            event_name: cmd.event_name,
        },
        capture: CaptureConfig {
            dump_capacity: cmd.dump_capacity,
            ..CaptureConfig::default()
        },
        sink,
    };

    let mut ctx = match HarnessContext::new(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // Before the sink exists and before any other thread is spawned.
    super::install_capture_or_exit(&mut ctx);

    let mut sink = make_sink(&ctx.config().sink);
    if let Err(e) = sink.init(&ctx.config().token) {
        eprintln!("Error: {} sink failed to start: {e}", sink.name());
        std::process::exit(1);
    }

    let stop = ctx.stop_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    }) {
        eprintln!("Error setting Ctrl+C handler: {e}");
        std::process::exit(1);
    }

    let summary = ctx.run(sink.as_mut());

    if let Err(e) = sink.shutdown() {
        eprintln!("Error: {} sink failed to shut down: {e}", sink.name());
        std::process::exit(1);
    }

    let mut lines = vec![
        String::new(),
        "Run summary".to_string(),
        format!("  Batches:  {}", summary.batches),
        format!("  Events:   {}", summary.events_attempted),
        format!("  Failed:   {}", summary.events_failed),
        format!("  Measured: {} ms", summary.measured_ms),
    ];
    if let Some(rate) = summary.events_per_sec() {
        lines.push(format!("  Rate:     {rate:.0} events/s"));
    }
    ctx.console().emit(lines);
}
