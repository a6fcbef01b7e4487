pub mod crash;
pub mod probe;
pub mod run;

use sinkbench_core::HarnessContext;

/// Arm the diagnostic capture or exit with status 1.
///
/// Runs before the sink is created or any batch starts.
pub fn install_capture_or_exit(ctx: &mut HarnessContext) {
    match ctx.install_capture() {
        Ok(capture) => log::info!(
            "capture armed: watcher {:?}, {} byte dump",
            capture.watcher().name(),
            capture.config().dump_capacity
        ),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
