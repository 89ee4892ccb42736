use std::time::{SystemTime, UNIX_EPOCH};

/// A source of wall-clock time in milliseconds since the Unix epoch.
///
/// The generators keep time behind this trait so tests can inject fixed or
/// stepping clocks, and so embedders can substitute their own time source.
/// The default [`SystemClock`] reads the system wall clock directly: the
/// clock-regression handling in the minter only makes sense for a clock
/// that can actually move backwards (NTP steps, VM suspend/resume).
pub trait TimeSource {
    /// Current wall-clock time in milliseconds since 1970-01-01 UTC.
    fn current_millis(&self) -> i64;

    /// Current wall-clock time in whole seconds since 1970-01-01 UTC.
    fn current_second(&self) -> i64 {
        self.current_millis() / 1000
    }
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as i64)
    }
}
