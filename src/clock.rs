//! Monotonic "now" in UTC (C1), injectable so tests never depend on wall
//! clock time.

use chrono::{DateTime, Utc};

/// A source of the current UTC instant.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// The real clock, backed by `chrono::Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_always_returns_same_instant() {
        let t = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let clock = FixedClock(t);
        assert_eq!(clock.now_utc(), t);
        assert_eq!(clock.now_utc(), t);
    }
}
