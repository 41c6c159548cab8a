//! In-memory ring buffer of recently sent messages.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use wb_session::SentMessage;

/// How many entries the gateway keeps.
pub const SENT_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct SentLogEntry {
    pub message_id: String,
    pub destination: String,
    pub template: String,
    pub sent_at: DateTime<Utc>,
}

impl From<&SentMessage> for SentLogEntry {
    fn from(m: &SentMessage) -> Self {
        Self {
            message_id: m.message_id.clone(),
            destination: m.destination.clone(),
            template: m.kind.clone(),
            sent_at: m.sent_at,
        }
    }
}

pub struct SentLog {
    capacity: usize,
    entries: Mutex<VecDeque<SentLogEntry>>,
}

impl SentLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn record(&self, message: &SentMessage) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(SentLogEntry::from(message));
    }

    /// Newest first, at most `limit` entries.
    pub fn recent(&self, limit: usize) -> Vec<SentLogEntry> {
        self.entries.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for SentLog {
    fn default() -> Self {
        Self::new(SENT_LOG_CAPACITY)
    }
}
