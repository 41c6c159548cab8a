//! Reconnect policy with jittered exponential back-off.

use std::time::Duration;

use rand::Rng;

use wb_domain::config::ReconnectConfig;

/// Controls how the controller reconnects after a recoverable close.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay between attempts (cap, before jitter).
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up.
    pub max_retries: u32,
    /// Relative jitter in `[0, 1)`.
    pub jitter: f64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectBackoff {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            max_retries: cfg.max_retries,
            jitter: cfg.jitter.clamp(0.0, 0.99),
        }
    }
}

impl ReconnectBackoff {
    /// Un-jittered delay before retry number `retry` (1-indexed):
    /// `min(base · 2^(retry-1), max)`.
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * 2f64.powi(exp);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Delay before retry number `retry`, spread by ±`jitter`.
    pub fn delay_for_retry<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal_delay(retry).as_millis() as f64;
        let factor = if self.jitter > 0.0 {
            rng.gen_range(1.0 - self.jitter..=1.0 + self.jitter)
        } else {
            1.0
        };
        Duration::from_millis((nominal * factor) as u64)
    }

    /// Whether `retry` is past the allowed number of retries.
    pub fn should_give_up(&self, retry: u32) -> bool {
        retry > self.max_retries
    }
}
