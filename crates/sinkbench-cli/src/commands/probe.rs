//! `sinkbench probe`: print one memory snapshot.

use sinkbench_core::memory;

pub fn run(json: bool) {
    let snapshot = memory::sample();

    if json {
        match serde_json::to_string_pretty(&snapshot) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    println!("Memory snapshot");
    println!("  Live allocated:  {} KiB", snapshot.alloc_kib());
    println!("  Total allocated: {} KiB", snapshot.total_alloc_kib());
    println!("  Reserved:        {} KiB", snapshot.sys_kib());
    println!("  GC cycles:       {}", snapshot.gc_cycles);
    println!();
    println!("{snapshot}");
}
