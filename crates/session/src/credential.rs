//! The single pairing-credential slot.
//!
//! Expiry is computed from wall-clock time on read; nothing is written when
//! a credential lapses except clearing the slot.  Every method takes `now`
//! explicitly so the owner decides which clock is authoritative.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// A pairing QR as handed out to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Displayable image (`data:image/svg+xml;base64,...`).
    pub image: String,
    /// The raw challenge string the image encodes.
    pub raw: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub issued_for: String,
}

impl Credential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whole seconds left, rounded up; `0` once expired.
    pub fn time_remaining_at(&self, now: DateTime<Utc>) -> u64 {
        let ms = (self.expires_at - now).num_milliseconds();
        if ms <= 0 {
            0
        } else {
            ((ms + 999) / 1000) as u64
        }
    }

    pub fn view_at(&self, now: DateTime<Utc>) -> CredentialView {
        CredentialView {
            image: self.image.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            time_remaining: self.time_remaining_at(now),
            issued_for: self.issued_for.clone(),
        }
    }
}

/// Serializable snapshot of a credential at a given instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialView {
    pub image: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub time_remaining: u64,
    pub issued_for: String,
}

/// What the slot holds right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Empty,
    Active { time_remaining: u64 },
    /// The last credential lapsed without being replaced or invalidated.
    Expired { expired_at: DateTime<Utc> },
}

pub struct CredentialStore {
    lifetime: Duration,
    slot: Option<Credential>,
    last_expired: Option<DateTime<Utc>>,
}

impl CredentialStore {
    pub fn new(lifetime: std::time::Duration) -> Self {
        Self {
            lifetime: Duration::from_std(lifetime).unwrap_or_else(|_| Duration::seconds(60)),
            slot: None,
            last_expired: None,
        }
    }

    /// Store a new credential, superseding any previous one.
    pub fn put_at(
        &mut self,
        image: String,
        raw: String,
        issued_for: &str,
        now: DateTime<Utc>,
    ) -> &Credential {
        self.last_expired = None;
        self.slot.insert(Credential {
            image,
            raw,
            created_at: now,
            expires_at: now + self.lifetime,
            issued_for: issued_for.to_owned(),
        })
    }

    /// The live credential, clearing the slot if it has lapsed.
    pub fn get_at(&mut self, now: DateTime<Utc>) -> Option<&Credential> {
        self.expire_at(now);
        self.slot.as_ref()
    }

    /// Clear the slot if its credential has lapsed.  Returns `true` when
    /// this call is what cleared it.
    pub fn expire_at(&mut self, now: DateTime<Utc>) -> bool {
        match &self.slot {
            Some(c) if c.is_expired_at(now) => {
                tracing::debug!(issued_for = %c.issued_for, "pairing QR expired");
                self.last_expired = Some(c.expires_at);
                self.slot = None;
                true
            }
            _ => false,
        }
    }

    /// Clear the slot unconditionally.  Returns whether it held anything.
    pub fn invalidate(&mut self, reason: &str) -> bool {
        self.last_expired = None;
        match self.slot.take() {
            Some(c) => {
                tracing::debug!(reason, issued_for = %c.issued_for, "pairing QR invalidated");
                true
            }
            None => false,
        }
    }

    pub fn time_remaining_at(&mut self, now: DateTime<Utc>) -> u64 {
        self.get_at(now).map_or(0, |c| c.time_remaining_at(now))
    }

    pub fn status_at(&mut self, now: DateTime<Utc>) -> SlotStatus {
        if let Some(c) = self.get_at(now) {
            return SlotStatus::Active {
                time_remaining: c.time_remaining_at(now),
            };
        }
        match self.last_expired {
            Some(expired_at) => SlotStatus::Expired { expired_at },
            None => SlotStatus::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn store() -> CredentialStore {
        CredentialStore::new(std::time::Duration::from_secs(60))
    }

    #[test]
    fn remaining_counts_down_then_expires() {
        let mut s = store();
        s.put_at("img".into(), "raw".into(), "u1", t0());

        let mut last = u64::MAX;
        for secs in [0, 1, 30, 59] {
            let left = s.time_remaining_at(t0() + Duration::seconds(secs));
            assert!(left < last, "remaining must strictly decrease");
            last = left;
        }
        assert_eq!(s.time_remaining_at(t0()), 60);

        let at_expiry = t0() + Duration::seconds(60);
        assert!(s.get_at(at_expiry).is_none());
        assert_eq!(
            s.status_at(at_expiry),
            SlotStatus::Expired {
                expired_at: at_expiry
            }
        );
    }

    #[test]
    fn remaining_rounds_up() {
        let mut s = store();
        s.put_at("img".into(), "raw".into(), "u1", t0());
        let now = t0() + Duration::milliseconds(59_001);
        assert_eq!(s.time_remaining_at(now), 1);
    }

    #[test]
    fn put_supersedes_previous() {
        let mut s = store();
        s.put_at("a".into(), "ra".into(), "u1", t0());
        s.put_at("b".into(), "rb".into(), "u2", t0() + Duration::seconds(10));
        let c = s.get_at(t0() + Duration::seconds(65)).unwrap();
        assert_eq!(c.image, "b");
        assert_eq!(c.issued_for, "u2");
    }

    #[test]
    fn invalidate_is_idempotent() {
        let mut s = store();
        s.put_at("a".into(), "ra".into(), "u1", t0());
        assert!(s.invalidate("connected"));
        assert!(!s.invalidate("connected"));
        assert_eq!(s.status_at(t0()), SlotStatus::Empty);
    }
}
