//! Per-requester throttling of pairing-credential issuance.
//!
//! [`RateLimiter`] keeps a short history of issuance timestamps per
//! requester and checks it against [`QrRateLimitConfig`].  It is owned by
//! the session controller task, so `check_at` and `record_at` run inside
//! the same critical section and no two requests for one requester can both
//! pass the check before either records.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use wb_domain::config::QrRateLimitConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Retention window for the hourly ceiling.
fn window() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// A live credential exists system-wide.
    CredentialActive,
    HourlyLimitExceeded,
    TooFrequent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denial {
    pub reason: DenialReason,
    pub retry_after_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(Denial),
}

/// Read-only view of one requester's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequesterStats {
    pub requester: String,
    /// Issuances since the process started.
    pub total_issued: u64,
    pub issued_last_hour: usize,
    /// Whether this requester's own history would allow an issuance now.
    /// A live credential held by anyone still blocks the actual request.
    pub can_issue_now: bool,
    pub last_issued_at: Option<DateTime<Utc>>,
    pub retry_after_secs: Option<u64>,
}

#[derive(Default)]
struct History {
    stamps: VecDeque<DateTime<Utc>>,
    total: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RateLimiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RateLimiter {
    config: QrRateLimitConfig,
    history: HashMap<String, History>,
}

impl RateLimiter {
    pub fn new(config: QrRateLimitConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
        }
    }

    /// Decide whether `requester` may be issued a credential at `now`.
    ///
    /// `active_credential_remaining` is the live credential's remaining
    /// lifetime in seconds, or `None` when the slot is empty.  Denials are
    /// reported in priority order: active credential, hourly ceiling, then
    /// minimum spacing.
    pub fn check_at(
        &self,
        requester: &str,
        active_credential_remaining: Option<u64>,
        now: DateTime<Utc>,
    ) -> Decision {
        if let Some(remaining) = active_credential_remaining {
            return Decision::Denied(Denial {
                reason: DenialReason::CredentialActive,
                retry_after_secs: remaining,
            });
        }
        self.check_requester(requester, now)
    }

    fn check_requester(&self, requester: &str, now: DateTime<Utc>) -> Decision {
        let Some(history) = self.history.get(requester) else {
            return Decision::Allowed;
        };

        let mut in_window = history.stamps.iter().filter(|t| now - **t < window());
        let oldest_counted = in_window.next().copied();
        let counted = oldest_counted.map_or(0, |_| 1 + in_window.count());

        if counted >= self.config.max_per_hour as usize {
            if let Some(oldest) = oldest_counted {
                return Decision::Denied(Denial {
                    reason: DenialReason::HourlyLimitExceeded,
                    retry_after_secs: ceil_secs(oldest + window() - now).max(1),
                });
            }
        }

        if let Some(last) = history.stamps.back() {
            let spacing = Duration::seconds(self.config.min_interval_secs as i64);
            let elapsed = now - *last;
            if elapsed < spacing {
                return Decision::Denied(Denial {
                    reason: DenialReason::TooFrequent,
                    retry_after_secs: ceil_secs(spacing - elapsed),
                });
            }
        }

        Decision::Allowed
    }

    /// Record a successful issuance for `requester` at `now`.
    pub fn record_at(&mut self, requester: &str, now: DateTime<Utc>) {
        let cap = self.config.history_cap.max(1);
        let history = self.history.entry(requester.to_owned()).or_default();
        history.stamps.push_back(now);
        history.total += 1;
        while let Some(front) = history.stamps.front() {
            if now - *front >= window() || history.stamps.len() > cap {
                history.stamps.pop_front();
            } else {
                break;
            }
        }
        tracing::debug!(
            requester,
            retained = history.stamps.len(),
            total = history.total,
            "QR issuance recorded"
        );
    }

    pub fn stats_at(&self, requester: &str, now: DateTime<Utc>) -> RequesterStats {
        let history = self.history.get(requester);
        let decision = self.check_requester(requester, now);
        RequesterStats {
            requester: requester.to_owned(),
            total_issued: history.map_or(0, |h| h.total),
            issued_last_hour: history.map_or(0, |h| {
                h.stamps.iter().filter(|t| now - **t < window()).count()
            }),
            can_issue_now: decision == Decision::Allowed,
            last_issued_at: history.and_then(|h| h.stamps.back().copied()),
            retry_after_secs: match decision {
                Decision::Allowed => None,
                Decision::Denied(d) => Some(d.retry_after_secs),
            },
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let ms = d.num_milliseconds();
    if ms <= 0 {
        0
    } else {
        ((ms + 999) / 1000) as u64
    }
}
