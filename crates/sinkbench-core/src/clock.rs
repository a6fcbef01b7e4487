//! Batch timing.
//!
//! Batches are timed with a millisecond wall clock. A wall clock can step
//! backwards or be unreadable; both degrade the reported number and never
//! stop the driver.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond clock used to time batches.
pub trait Clock {
    /// Milliseconds since the Unix epoch, or `None` if the clock is unreadable.
    fn now_ms(&self) -> Option<i64>;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Option<i64> {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
        i64::try_from(since_epoch.as_millis()).ok()
    }
}

/// Elapsed time of one batch as reported to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elapsed {
    /// `end - start` in milliseconds.
    Measured(u64),
    /// The clock went backwards by `skew_ms`; reported as 0.
    Clamped { skew_ms: u64 },
    /// Start or end could not be read.
    Unavailable,
}

impl Elapsed {
    /// Compute elapsed time from two readings.
    pub fn between(start: Option<i64>, end: Option<i64>) -> Self {
        match (start, end) {
            (Some(start), Some(end)) if end >= start => Self::Measured((end - start) as u64),
            (Some(start), Some(end)) => Self::Clamped {
                skew_ms: start.abs_diff(end),
            },
            _ => Self::Unavailable,
        }
    }

    /// Reported milliseconds; never negative. `None` when unavailable.
    pub fn millis(&self) -> Option<u64> {
        match self {
            Self::Measured(ms) => Some(*ms),
            Self::Clamped { .. } => Some(0),
            Self::Unavailable => None,
        }
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measured(ms) => write!(f, "{ms} ms"),
            Self::Clamped { skew_ms } => write!(f, "0 ms (clock stepped back {skew_ms} ms)"),
            Self::Unavailable => write!(f, "? ms (clock unavailable)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_reads() {
        let now = SystemClock.now_ms().unwrap();
        // 2020-01-01 in ms.
        assert!(now > 1_577_836_800_000);
    }

    #[test]
    fn test_between_measured() {
        assert_eq!(Elapsed::between(Some(100), Some(350)), Elapsed::Measured(250));
        assert_eq!(Elapsed::between(Some(5), Some(5)), Elapsed::Measured(0));
    }

    #[test]
    fn test_between_clamps_backwards_clock() {
        let elapsed = Elapsed::between(Some(1_000), Some(940));
        assert_eq!(elapsed, Elapsed::Clamped { skew_ms: 60 });
        assert_eq!(elapsed.millis(), Some(0));
    }

    #[test]
    fn test_between_unavailable() {
        assert_eq!(Elapsed::between(None, Some(1)), Elapsed::Unavailable);
        assert_eq!(Elapsed::between(Some(1), None), Elapsed::Unavailable);
        assert_eq!(Elapsed::Unavailable.millis(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Elapsed::Measured(12).to_string(), "12 ms");
        assert_eq!(
            Elapsed::Clamped { skew_ms: 3 }.to_string(),
            "0 ms (clock stepped back 3 ms)"
        );
        assert_eq!(Elapsed::Unavailable.to_string(), "? ms (clock unavailable)");
    }
}
