//! Harness configuration.
//!
//! Every knob has a default matching the reference workload: batches of
//! 10,000 events, a one-second pause between batches, and a 1 MiB bound on
//! the crash dump.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Events per batch unless overridden.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;
/// Pause between batches unless overridden.
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(1);
/// Default event name stamped on every record.
pub const DEFAULT_EVENT_NAME: &str = "SinkBench.StressEvent";
/// Upper bound on the multi-thread stack dump.
pub const DEFAULT_DUMP_CAPACITY: usize = 1 << 20;
/// How long the watcher waits for one thread to report its stack.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Batch driver settings.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Events emitted per batch.
    pub batch_size: usize,
    /// Cooperative pause after each batch. `Duration::ZERO` skips it.
    pub pause: Duration,
    /// Stop after this many batches. `None` runs until stopped.
    pub max_batches: Option<u64>,
    /// Value of the `name` field on every record.
    pub event_name: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            pause: DEFAULT_PAUSE,
            max_batches: None,
            event_name: DEFAULT_EVENT_NAME.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Diagnostic capture settings.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Bytes kept from the multi-thread dump; the rest is dropped.
    pub dump_capacity: usize,
    /// Per-thread wait for a stack sample, and the wait for the console gate.
    pub response_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            dump_capacity: DEFAULT_DUMP_CAPACITY,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Which stand-in sink the harness drives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SinkConfig {
    /// Discard every event.
    #[default]
    Null,
    /// Append one JSON object per event to a file.
    JsonLines { path: PathBuf },
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Complete configuration for one harness process.
#[derive(Debug, Clone, Default)]
pub struct HarnessConfig {
    /// Opaque credential handed to the sink's `init`.
    pub token: String,
    pub driver: DriverConfig,
    pub capture: CaptureConfig,
    pub sink: SinkConfig,
}

impl HarnessConfig {
    /// Reject settings the driver or capture cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.driver.batch_size == 0 {
            return Err(ConfigError::EmptyBatch);
        }
        if self.driver.event_name.is_empty() {
            return Err(ConfigError::EmptyEventName);
        }
        if self.capture.dump_capacity == 0 {
            return Err(ConfigError::EmptyDumpBuffer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_workload() {
        let config = HarnessConfig::default();
        assert_eq!(config.driver.batch_size, 10_000);
        assert_eq!(config.driver.pause, Duration::from_secs(1));
        assert_eq!(config.driver.max_batches, None);
        assert_eq!(config.capture.dump_capacity, 1024 * 1024);
        assert_eq!(config.sink, SinkConfig::Null);
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert_eq!(HarnessConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = HarnessConfig::default();
        config.driver.batch_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::EmptyBatch));
    }

    #[test]
    fn test_validate_rejects_zero_dump_capacity() {
        let mut config = HarnessConfig::default();
        config.capture.dump_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::EmptyDumpBuffer));
    }

    #[test]
    fn test_validate_rejects_empty_event_name() {
        let mut config = HarnessConfig::default();
        config.driver.event_name.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptyEventName));
    }
}
