//! Reconnection backoff policy.
//!
//! ```text
//! Attempt    Delay (initial=1s, x2, max=5s)
//! ─────────────────────────────────────────
//!    1           1s
//!    2           2s
//!    3           4s
//!    4           5s   (capped)
//!    5           5s
//!   >5       terminal Disconnected
//! ```
//!
//! Jitter (±`jitter` fraction) is applied on top of the capped delay and the
//! result is capped again.

use std::fmt;
use std::time::Duration;

use rand::Rng;

use donorlink_core::defaults;

/// Bounded exponential backoff for connection establishment.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Reconnection attempts before giving up.
    pub max_attempts: u32,
    /// Growth factor between attempts (≥ 1.0).
    pub multiplier: f64,
    /// Jitter fraction in `[0.0, 1.0]`.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(defaults::RECONNECT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(defaults::RECONNECT_MAX_DELAY_MS),
            max_attempts: defaults::RECONNECT_MAX_ATTEMPTS,
            multiplier: defaults::RECONNECT_MULTIPLIER,
            jitter: defaults::RECONNECT_JITTER,
        }
    }
}

impl fmt::Display for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReconnectPolicy(initial={}ms, max={}ms, x{:.1}, jitter={:.0}%, max_attempts={})",
            self.initial_delay.as_millis(),
            self.max_delay.as_millis(),
            self.multiplier,
            self.jitter * 100.0,
            self.max_attempts
        )
    }
}

impl ReconnectPolicy {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            defaults::RECONNECT_MULTIPLIER
        };
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Deterministic delays (tests, reproducible logs).
    pub fn without_jitter(self) -> Self {
        self.with_jitter(0.0)
    }

    /// Whether reconnection attempt number `attempt` (1-based) is allowed.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }

    /// Capped exponential delay before attempt `attempt` (1-based), no jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let max_secs = self.max_delay.as_secs_f64();
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if !secs.is_finite() || secs >= max_secs {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Delay before attempt `attempt`, with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let secs = (base.as_secs_f64() * factor).clamp(0.0, self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::default()
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_max_attempts(5)
            .with_multiplier(2.0)
            .without_jitter()
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let p = policy();
        assert_eq!(p.base_delay(1), Duration::from_secs(1));
        assert_eq!(p.base_delay(2), Duration::from_secs(2));
        assert_eq!(p.base_delay(3), Duration::from_secs(4));
        assert_eq!(p.base_delay(4), Duration::from_secs(5));
        assert_eq!(p.base_delay(50), Duration::from_secs(5));
    }

    #[test]
    fn test_can_retry_bounds() {
        let p = policy();
        assert!(!p.can_retry(0));
        assert!(p.can_retry(1));
        assert!(p.can_retry(5));
        assert!(!p.can_retry(6));
        assert!(!policy().with_max_attempts(0).can_retry(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let p = policy().with_jitter(0.5);
        for attempt in 1..=6 {
            let base = p.base_delay(attempt).as_secs_f64();
            for _ in 0..50 {
                let d = p.delay_for(attempt).as_secs_f64();
                assert!(d >= base * 0.5 - 1e-9, "attempt {attempt}: {d} < {base}*0.5");
                assert!(d <= 5.0 + 1e-9, "attempt {attempt}: {d} above cap");
            }
        }
    }

    #[test]
    fn test_without_jitter_is_deterministic() {
        let p = policy();
        assert_eq!(p.delay_for(3), p.delay_for(3));
    }

    #[test]
    fn test_builders_sanitize() {
        let p = policy().with_multiplier(0.5).with_jitter(7.0);
        assert_eq!(p.multiplier, 1.0);
        assert_eq!(p.jitter, 1.0);
        let p = policy().with_multiplier(f64::NAN).with_jitter(f64::NAN);
        assert_eq!(p.multiplier, defaults::RECONNECT_MULTIPLIER);
        assert_eq!(p.jitter, 0.0);
    }

    #[test]
    fn test_display() {
        let s = policy().to_string();
        assert!(s.contains("initial=1000ms"));
        assert!(s.contains("max_attempts=5"));
    }
}
