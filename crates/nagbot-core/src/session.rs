//! Short-lived per-chat conversation state.
//!
//! A session records that the next free-text reply from a chat answers a
//! specific pending prompt (`/set`, `/add` or `/delete`). At most one session
//! exists per chat; stale sessions are swept on every write and additionally
//! treated as absent on read, so an old reply can never be taken at face
//! value after the TTL.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{ChatId, SessionKind};

#[derive(Clone, Copy, Debug)]
struct PendingSession {
    kind: SessionKind,
    created_at: Instant,
}

pub struct SessionStore {
    ttl: Duration,
    sessions: DashMap<i64, PendingSession>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: DashMap::new(),
        }
    }

    /// Insert a session for `chat_id`, replacing any existing one, and sweep
    /// every entry (any chat) whose age exceeds the TTL.
    ///
    /// The sweep is an O(n) scan per write; fine at bot scale.
    pub fn put(&self, chat_id: ChatId, kind: SessionKind) {
        let ttl = self.ttl;
        self.sessions
            .retain(|_, session| session.created_at.elapsed() <= ttl);
        self.sessions.insert(
            chat_id.0,
            PendingSession {
                kind,
                created_at: Instant::now(),
            },
        );
        debug!(chat_id = chat_id.0, ?kind, "session opened");
    }

    /// Look up the pending session for `chat_id`. An entry past its TTL is
    /// treated as absent (and evicted) even before the next sweep.
    pub fn get(&self, chat_id: ChatId) -> Option<SessionKind> {
        let expired = match self.sessions.get(&chat_id.0) {
            Some(session) if session.created_at.elapsed() > self.ttl => true,
            Some(session) => return Some(session.kind),
            None => return None,
        };
        if expired {
            self.sessions.remove(&chat_id.0);
        }
        None
    }

    pub fn remove(&self, chat_id: ChatId) {
        self.sessions.remove(&chat_id.0);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
