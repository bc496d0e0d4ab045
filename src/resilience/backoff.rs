//! Exponential backoff with jitter.

use std::time::Duration;

/// Delay before retry number `attempt` (starting at 1): `base` doubled per
/// attempt, capped at `max`, plus up to 10% jitter.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.saturating_pow((attempt - 1).min(31));
    let capped = base.saturating_mul(factor).min(max);

    let jitter_range = capped.as_millis() as u64 / 10;
    let jitter = if jitter_range > 0 {
        fastrand::u64(0..jitter_range)
    } else {
        0
    };

    capped + Duration::from_millis(jitter)
}
