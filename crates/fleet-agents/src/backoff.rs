use std::time::Duration;

use fleet_core::config::SupervisorSettings;

/// Restart policy for crashed workers.
///
/// The delay before restart `n` (0-based) is `first × factor^n`, clamped to
/// `max`. After `max_restarts` consecutive crashes the worker stays
/// `Crashed` until restarted by hand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartPolicy {
    pub first: Duration,
    pub max: Duration,
    pub factor: f64,
    pub max_restarts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from(&SupervisorSettings::default())
    }
}

impl From<&SupervisorSettings> for RestartPolicy {
    fn from(s: &SupervisorSettings) -> Self {
        Self {
            first: Duration::from_millis(s.restart_backoff_ms),
            max: Duration::from_millis(s.restart_backoff_max_ms),
            factor: s.restart_backoff_factor,
            max_restarts: s.max_restarts,
        }
    }
}

impl RestartPolicy {
    /// Delay before restart number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let max_ms = self.max.as_millis() as f64;
        let exp = attempt.min(i32::MAX as u32) as i32;
        let ms = self.first.as_millis() as f64 * self.factor.powi(exp);

        if !ms.is_finite() || ms < 0.0 || ms > max_ms {
            self.max
        } else {
            Duration::from_millis(ms.round() as u64)
        }
    }

    /// Whether another automatic restart is allowed after `restarts` so far.
    pub fn allows(&self, restarts: u32) -> bool {
        restarts < self.max_restarts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(first_ms: u64, max_ms: u64, factor: f64) -> RestartPolicy {
        RestartPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            max_restarts: 3,
        }
    }

    #[test]
    fn test_exponential_growth() {
        let p = policy(100, 30_000, 2.0);
        assert_eq!(p.delay(0), Duration::from_millis(100));
        assert_eq!(p.delay(1), Duration::from_millis(200));
        assert_eq!(p.delay(2), Duration::from_millis(400));
        assert_eq!(p.delay(4), Duration::from_millis(1600));
    }

    #[test]
    fn test_clamped_to_max() {
        let p = policy(100, 1_000, 2.0);
        assert_eq!(p.delay(10), Duration::from_secs(1));
        assert_eq!(p.delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_constant_factor() {
        let p = policy(500, 30_000, 1.0);
        for attempt in 0..10 {
            assert_eq!(p.delay(attempt), Duration::from_millis(500));
        }
    }

    #[test]
    fn test_ceiling() {
        let p = policy(100, 1_000, 2.0);
        assert!(p.allows(0));
        assert!(p.allows(2));
        assert!(!p.allows(3));
    }

    #[test]
    fn test_from_settings_defaults() {
        let p = RestartPolicy::default();
        assert_eq!(p.first, Duration::from_millis(500));
        assert_eq!(p.max, Duration::from_secs(30));
        assert_eq!(p.max_restarts, 5);
    }
}
