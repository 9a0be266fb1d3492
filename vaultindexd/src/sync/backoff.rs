use std::time::Duration;

use rand::Rng;

/// Exponential delay schedule with a hard cap and optional full jitter.
/// Attempt 0 waits `base`, attempt 1 waits `2 * base`, and so on.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    /// The queue retry schedule: 1s, 2s, 4s, deterministic.
    pub fn retry_schedule() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(4), false)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let capped = base_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(max_ms);
        let delay_ms = if self.jitter {
            rng.gen_range(0..=capped)
        } else {
            capped
        };
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn retry_schedule_is_one_two_four_seconds() {
        let backoff = Backoff::retry_schedule();
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        // Capped past the final attempt.
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
    }

    #[test]
    fn jitter_stays_under_the_cap() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(800), true);
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..8 {
            assert!(backoff.delay_with_rng(attempt, &mut rng) <= Duration::from_millis(800));
        }
    }
}
