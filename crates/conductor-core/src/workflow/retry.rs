//! Bounded exponential backoff.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::schema::RetryOverride;

/// Retry policy for step attempts.
///
/// The delay before retry `n` (0-based) is
/// `min(max_delay, base_delay * multiplier^n)`, then scaled by a uniform
/// factor in `[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per step, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction in `[0, 1]`
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// Policy with fixed millisecond delays and no jitter, handy in tests.
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms: delay_ms,
            multiplier: 1.0,
            max_delay_ms: delay_ms,
            jitter: 0.0,
        }
    }

    /// Step-level fields win over the engine policy.
    pub fn with_override(&self, over: Option<&RetryOverride>) -> Self {
        let Some(over) = over else {
            return self.clone();
        };
        Self {
            max_attempts: over.max_attempts.unwrap_or(self.max_attempts),
            base_delay_ms: over.base_delay_ms.unwrap_or(self.base_delay_ms),
            multiplier: over.multiplier.unwrap_or(self.multiplier),
            max_delay_ms: over.max_delay_ms.unwrap_or(self.max_delay_ms),
            jitter: over.jitter.unwrap_or(self.jitter),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Capped delay before retry `retry_index`, without jitter.
    pub fn base_delay(&self, retry_index: u32) -> Duration {
        let exp = self.multiplier.max(1.0).powi(retry_index.min(i32::MAX as u32) as i32);
        let raw = self.base_delay_ms as f64 * exp;
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay before retry `retry_index` with jitter applied.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let base = self.base_delay(retry_index);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_is_capped() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.base_delay(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay(5), Duration::from_secs(32));
        assert_eq!(policy.base_delay(6), Duration::from_secs(60));
        assert_eq!(policy.base_delay(40), Duration::from_secs(60));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::default();
        for i in 0..4 {
            let base = policy.base_delay(i).as_secs_f64();
            for _ in 0..50 {
                let d = policy.delay_for(i).as_secs_f64();
                assert!(d >= base * 0.8 - 1e-9 && d <= base * 1.2 + 1e-9, "{} vs {}", d, base);
            }
        }
    }

    #[test]
    fn test_step_override() {
        let policy = RetryPolicy::default();
        let over = RetryOverride {
            max_attempts: Some(5),
            jitter: Some(0.0),
            ..Default::default()
        };
        let merged = policy.with_override(Some(&over));
        assert_eq!(merged.max_attempts, 5);
        assert_eq!(merged.jitter, 0.0);
        assert_eq!(merged.base_delay_ms, 1_000);
        assert_eq!(policy.with_override(None), policy);
    }
}
