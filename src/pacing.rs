//! Human-like pacing between automation steps.
//!
//! WhatsApp Web reacts badly to machine-gun interaction, so every step of a
//! dispatch is separated by a bounded random delay. The ranges themselves
//! are fixed per call site; only the sampled value varies.

use rand::Rng;
use std::time::Duration;

/// Uniformly distributed integer in the inclusive range `[min, max]`.
///
/// `min > max` is treated as a degenerate range and returns `min`.
pub fn jitter_range(min: u64, max: u64) -> u64 {
    if min >= max {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}

/// Sleep for a random whole number of seconds in `[min, max]`.
pub async fn sleep_secs_between(min: u64, max: u64) {
    tokio::time::sleep(Duration::from_secs(jitter_range(min, max))).await;
}

/// Sleep for a random number of milliseconds in `[min, max]`.
pub async fn sleep_ms_between(min: u64, max: u64) {
    tokio::time::sleep(Duration::from_millis(jitter_range(min, max))).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_range() {
        for _ in 0..1000 {
            let v = jitter_range(5, 15);
            assert!((5..=15).contains(&v), "{v} out of range");
        }
    }

    #[test]
    fn jitter_covers_both_ends() {
        let mut low = false;
        let mut high = false;
        for _ in 0..10_000 {
            match jitter_range(1, 3) {
                1 => low = true,
                3 => high = true,
                _ => {}
            }
        }
        assert!(low && high, "range endpoints never sampled");
    }

    #[test]
    fn degenerate_range_returns_min() {
        assert_eq!(jitter_range(7, 7), 7);
        assert_eq!(jitter_range(9, 2), 9);
    }
}
