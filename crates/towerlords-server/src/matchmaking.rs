//! Matchmaking (C8, spec §4.8): a FIFO queue keyed by user. `start` enqueues
//! the caller and, once two entries are present, atomically pops both and
//! hands the pair back to the caller to create a match. Entries survive a
//! connection loss for `QUEUE_TTL_MS`; `purge_expired` evicts anything older.

use std::collections::VecDeque;
use std::sync::Mutex;

use thiserror::Error;

use towerlords_protocol::ids::UserId;

const MAX_QUEUE_LEN: usize = 1024;

struct QueueEntry {
    user_id: UserId,
    deck_id: Option<String>,
    enqueued_at_ms: i64,
}

#[derive(Debug, Error)]
pub enum MatchmakingError {
    #[error("already queued")]
    AlreadyQueued,
    #[error("matchmaking queue is full")]
    QueueFull,
}

pub struct MatchedPair {
    pub a: (UserId, Option<String>),
    pub b: (UserId, Option<String>),
}

pub struct MatchmakingQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueues `user_id`; returns a matched pair the instant a second
    /// entry becomes available (spec §4.8: "when two entries exist the pair
    /// is popped atomically").
    pub fn start(
        &self,
        user_id: UserId,
        deck_id: Option<String>,
        now_ms: i64,
    ) -> Result<Option<MatchedPair>, MatchmakingError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|e| e.user_id == user_id) {
            return Err(MatchmakingError::AlreadyQueued);
        }
        if entries.len() >= MAX_QUEUE_LEN {
            return Err(MatchmakingError::QueueFull);
        }

        entries.push_back(QueueEntry {
            user_id,
            deck_id,
            enqueued_at_ms: now_ms,
        });

        if entries.len() >= 2 {
            let first = entries.pop_front().unwrap();
            let second = entries.pop_front().unwrap();
            Ok(Some(MatchedPair {
                a: (first.user_id, first.deck_id),
                b: (second.user_id, second.deck_id),
            }))
        } else {
            Ok(None)
        }
    }

    pub fn cancel(&self, user_id: UserId) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| e.user_id != user_id);
        entries.len() != before
    }

    /// Evicts entries older than `ttl_ms`, returning the evicted users so
    /// the caller can notify them (spec §4.8 "keyed to survive connection
    /// loss for `QUEUE_TTL_MS`").
    pub fn purge_expired(&self, now_ms: i64, ttl_ms: i64) -> Vec<UserId> {
        let mut entries = self.entries.lock().unwrap();
        let mut expired = Vec::new();
        entries.retain(|e| {
            if now_ms - e.enqueued_at_ms > ttl_ms {
                expired.push(e.user_id);
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MatchmakingQueue {
    fn default() -> Self {
        Self::new()
    }
}
