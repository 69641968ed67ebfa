//! Dead-letter queue for messages that failed non-retryably.
//!
//! A dead-lettered message is parked, not lost: the entry keeps the full
//! message so an operator can resolve it (reprocessed out of band) or
//! discard it. Entries are never removed, only moved through
//! `Pending -> Resolved | Discarded`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use aurum_audit::EventCategory;

use super::message::ChannelMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    Pending,
    Resolved,
    Discarded,
}

/// One parked message.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub message: ChannelMessage,
    pub channel: EventCategory,
    pub reason: String,
    /// Delivery attempt that finally failed.
    pub attempt: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    pub status: DeadLetterStatus,
    pub notes: Option<String>,
}

/// Aggregate view over the queue, for dashboards and tests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeadLetterStats {
    pub total: u64,
    pub pending: u64,
    pub by_channel: BTreeMap<EventCategory, u64>,
    pub by_event_type: BTreeMap<String, u64>,
}

/// Where consumers park messages they cannot process.
///
/// Push is infallible by contract: losing the park operation would turn a
/// non-retryable failure into a silent drop, so implementations log and
/// absorb their own storage problems.
pub trait DeadLetterSink: Send + Sync {
    fn push(&self, message: ChannelMessage, reason: &str, attempt: u32);
}

impl<D> DeadLetterSink for Arc<D>
where
    D: DeadLetterSink + ?Sized,
{
    fn push(&self, message: ChannelMessage, reason: &str, attempt: u32) {
        (**self).push(message, reason, attempt)
    }
}

/// In-memory queue, insertion-ordered.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending entries, oldest first.
    pub fn list_pending(&self) -> Vec<DeadLetterEntry> {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.status == DeadLetterStatus::Pending)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count_pending(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.status == DeadLetterStatus::Pending)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Mark a pending entry handled out of band. Returns false for unknown
    /// or already-closed ids.
    pub fn mark_resolved(&self, id: Uuid, notes: impl Into<String>) -> bool {
        self.close(id, DeadLetterStatus::Resolved, Some(notes.into()))
    }

    pub fn mark_discarded(&self, id: Uuid) -> bool {
        self.close(id, DeadLetterStatus::Discarded, None)
    }

    pub fn stats(&self) -> DeadLetterStats {
        let Ok(entries) = self.entries.lock() else {
            return DeadLetterStats::default();
        };

        let mut stats = DeadLetterStats {
            total: entries.len() as u64,
            ..DeadLetterStats::default()
        };
        for entry in entries.iter() {
            if entry.status == DeadLetterStatus::Pending {
                stats.pending += 1;
            }
            *stats.by_channel.entry(entry.channel).or_insert(0) += 1;
            *stats
                .by_event_type
                .entry(entry.message.envelope.event_type().to_string())
                .or_insert(0) += 1;
        }
        stats
    }

    fn close(&self, id: Uuid, status: DeadLetterStatus, notes: Option<String>) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        match entries
            .iter_mut()
            .find(|e| e.id == id && e.status == DeadLetterStatus::Pending)
        {
            Some(entry) => {
                entry.status = status;
                entry.notes = notes;
                true
            }
            None => false,
        }
    }
}

impl DeadLetterSink for InMemoryDeadLetterQueue {
    fn push(&self, message: ChannelMessage, reason: &str, attempt: u32) {
        let now = Utc::now();
        warn!(
            event_id = %message.envelope.event_id(),
            channel = %message.category,
            reason,
            attempt,
            "message dead-lettered"
        );

        let Ok(mut entries) = self.entries.lock() else {
            return;
        };

        // The same message can be parked again when the broker redelivers
        // after a lost ack; fold it into the existing pending entry.
        let existing = entries.iter_mut().find(|e| {
            e.status == DeadLetterStatus::Pending
                && e.channel == message.category
                && e.message.envelope.event_id() == message.envelope.event_id()
        });
        match existing {
            Some(entry) => {
                entry.attempt = entry.attempt.max(attempt);
                entry.last_failed_at = now;
                entry.reason = reason.to_string();
            }
            None => {
                let channel = message.category;
                entries.push(DeadLetterEntry {
                    id: Uuid::now_v7(),
                    message,
                    channel,
                    reason: reason.to_string(),
                    attempt,
                    first_failed_at: now,
                    last_failed_at: now,
                    status: DeadLetterStatus::Pending,
                    notes: None,
                });
            }
        }
    }
}
