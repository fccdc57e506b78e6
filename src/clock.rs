//! Process-wide time helpers.
//!
//! `uptime_ms` is the monotonic millisecond counter the accumulators and
//! schedulers share; `unix_now` is the wall clock the log timestamps come
//! from. The two are deliberately separate: elapsed time must never jump
//! when the wall clock is stepped by time sync.

use std::sync::OnceLock;
use std::time::Instant;

/// Wall-clock timestamps below this are treated as "clock not yet
/// synchronized"; the writer retries instead of logging garbage stamps.
pub const CLOCK_SANE_EPOCH: u32 = 1_000_000_000;

static BOOT: OnceLock<Instant> = OnceLock::new();

/// Milliseconds of monotonic time since the process first asked.
pub fn uptime_ms() -> u64 {
    BOOT.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// Current Unix time in seconds.
pub fn unix_now() -> u32 {
    chrono::Utc::now().timestamp().clamp(0, i64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_is_monotonic() {
        let a = uptime_ms();
        let b = uptime_ms();
        assert!(b >= a);
    }

    #[test]
    fn wall_clock_is_sane_on_a_real_host() {
        assert!(unix_now() > CLOCK_SANE_EPOCH);
    }
}
