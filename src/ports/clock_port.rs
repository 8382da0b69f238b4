//! Time source port.

use chrono::NaiveDateTime;

/// Supplies the venue-local wall-clock time.
pub trait ClockPort: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}
