use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Whole seconds left until `deadline`, rounded up; zero once it has passed
pub fn seconds_until(deadline: Instant, now: Instant) -> u32 {
    let remaining = deadline.saturating_duration_since(now);
    if remaining.is_zero() {
        return 0;
    }
    let millis = remaining.as_millis();
    let seconds = (millis + 999) / 1000;
    seconds.min(u32::MAX as u128) as u32
}

// Deadline `seconds` from `now`
pub fn deadline_after(now: Instant, seconds: u32) -> Instant {
    now + Duration::from_secs(u64::from(seconds))
}

// Timer period of at least one millisecond
pub fn timer_period(period: Duration) -> Duration {
    period.max(Duration::from_millis(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_until_rounds_up() {
        let now = Instant::now();
        assert_eq!(seconds_until(now + Duration::from_millis(1), now), 1);
        assert_eq!(seconds_until(now + Duration::from_millis(1000), now), 1);
        assert_eq!(seconds_until(now + Duration::from_millis(1001), now), 2);
        assert_eq!(seconds_until(now + Duration::from_millis(2500), now), 3);
    }

    #[test]
    fn test_seconds_until_past_deadline() {
        let now = Instant::now();
        assert_eq!(seconds_until(now, now), 0);
        assert_eq!(seconds_until(now, now + Duration::from_secs(3)), 0);
    }

    #[test]
    fn test_deadline_after() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, 5) - now, Duration::from_secs(5));
        assert_eq!(deadline_after(now, 0), now);
    }

    #[test]
    fn test_timer_period_never_zero() {
        assert_eq!(timer_period(Duration::ZERO), Duration::from_millis(1));
        assert_eq!(timer_period(Duration::from_millis(500)), Duration::from_millis(500));
    }

    #[test]
    fn test_timestamp_is_monotonic_enough() {
        let first = get_timestamp();
        std::thread::sleep(Duration::from_millis(2));
        assert!(get_timestamp() > first);
    }
}
