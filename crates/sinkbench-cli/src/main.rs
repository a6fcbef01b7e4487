//! CLI for sinkbench: drive a telemetry sink at full rate and dump every thread when it dies.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use sinkbench_core::TrackingAllocator;

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator;

#[derive(Parser)]
#[command(name = "sinkbench")]
#[command(about = "sinkbench: drive a telemetry sink at full rate and dump every thread when it dies")]
#[command(version = sinkbench_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emit events in batches until stopped, printing throughput and memory per batch.
    /// Ctrl+C finishes the current batch, shuts the sink down and prints a summary.
    /// SIGTERM or SIGABRT dumps every thread's stack and exits with status 255.
    Run {
        /// Token handed to the sink's init
        #[arg(long)]
        token: String,

        /// Events per batch
        #[arg(long, default_value = "10000")]
        batch_size: usize,

        /// Pause between batches in milliseconds
        #[arg(long, default_value = "1000")]
        pause_ms: u64,

        /// Stop after this many batches (default: run until stopped)
        #[arg(long)]
        batches: Option<u64>,

        /// Sink to drive
        #[arg(long, value_enum, default_value_t = SinkKind::Null)]
        sink: SinkKind,

        /// Output file for the jsonl sink (default: ./sinkbench-events.jsonl)
        #[arg(long)]
        output: Option<String>,

        /// Value of the name field on every event
        #[arg(long, default_value = sinkbench_core::config::DEFAULT_EVENT_NAME)]
        event_name: String,

        /// Bytes kept from the all-threads stack dump
        #[arg(long, default_value_t = sinkbench_core::config::DEFAULT_DUMP_CAPACITY)]
        dump_capacity: usize,
    },

    /// Print one memory snapshot
    Probe {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Arm the diagnostic capture, start idle workers, then raise a fatal signal
    Crash {
        /// Signal to raise: abort (from a worker thread) or terminate (to the process)
        #[arg(long, value_enum, default_value_t = CrashSignal::Terminate)]
        signal: CrashSignal,

        /// Idle worker threads to start first
        #[arg(long, default_value = "2")]
        threads: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    Null,
    Jsonl,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CrashSignal {
    Abort,
    Terminate,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            token,
            batch_size,
            pause_ms,
            batches,
            sink,
            output,
            event_name,
            dump_capacity,
        } => commands::run::run(commands::run::RunCommandConfig {
            token,
            batch_size,
            pause_ms,
            batches,
            sink,
            output_path: output.as_deref(),
            event_name,
            dump_capacity,
        }),
        Commands::Probe { json } => commands::probe::run(json),
        Commands::Crash { signal, threads } => commands::crash::run(signal, threads),
    }
}
