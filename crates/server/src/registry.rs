//! In-memory session registry
//!
//! Owns the two session-level invariants: at most one non-terminal turn
//! per session, and a monotonic turn sequence number. Both are enforced
//! under the session's map entry lock so concurrent submissions cannot
//! race past the check.

use dashmap::DashMap;
use thiserror::Error;

use eca_core::{ProviderConfig, SessionId, SessionRecord, Turn, TurnId, TurnInput};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session {session_id} already has turn {turn_id} in flight")]
    TurnInProgress {
        session_id: SessionId,
        turn_id: TurnId,
    },

    #[error("session capacity reached ({0})")]
    Full(usize),
}

pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionRecord>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
        }
    }

    pub fn create_session(
        &self,
        user_id: impl Into<String>,
        providers: ProviderConfig,
    ) -> Result<SessionRecord, RegistryError> {
        if self.sessions.len() >= self.max_sessions {
            return Err(RegistryError::Full(self.max_sessions));
        }
        let record = SessionRecord::new(user_id, providers);
        self.sessions.insert(record.id, record.clone());
        Ok(record)
    }

    pub fn get(&self, session_id: SessionId) -> Option<SessionRecord> {
        self.sessions.get(&session_id).map(|r| r.clone())
    }

    /// Reserve the next turn for the session. Fails with `TurnInProgress`
    /// while a previous turn is still non-terminal.
    pub fn begin_turn(
        &self,
        session_id: SessionId,
        input: TurnInput,
    ) -> Result<Turn, RegistryError> {
        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or(RegistryError::NotFound(session_id))?;

        if let Some(turn_id) = entry.active_turn {
            return Err(RegistryError::TurnInProgress {
                session_id,
                turn_id,
            });
        }

        entry.last_seq += 1;
        let turn = Turn::new(session_id, entry.last_seq, input);
        entry.active_turn = Some(turn.id);
        Ok(turn)
    }

    /// Release the active-turn slot once the turn reaches a terminal state.
    pub fn finish_turn(&self, session_id: SessionId, turn_id: TurnId) {
        if let Some(mut entry) = self.sessions.get_mut(&session_id) {
            if entry.active_turn == Some(turn_id) {
                entry.active_turn = None;
            }
        }
    }

    pub fn remove_session(&self, session_id: SessionId) -> Option<SessionRecord> {
        self.sessions.remove(&session_id).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn providers() -> ProviderConfig {
        ProviderConfig {
            model: "gpt-4o-mini".to_string(),
            voice_id: "v".to_string(),
            avatar_id: "a".to_string(),
        }
    }

    #[test]
    fn second_turn_rejected_while_first_active() {
        let registry = SessionRegistry::new(10);
        let session = registry.create_session("u1", providers()).unwrap();

        let first = registry.begin_turn(session.id, TurnInput::text("one")).unwrap();
        let second = registry.begin_turn(session.id, TurnInput::text("two"));
        assert!(matches!(second, Err(RegistryError::TurnInProgress { .. })));

        registry.finish_turn(session.id, first.id);
        assert!(registry.begin_turn(session.id, TurnInput::text("two")).is_ok());
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let registry = SessionRegistry::new(10);
        let session = registry.create_session("u1", providers()).unwrap();

        for expected in 1..=5u64 {
            let turn = registry
                .begin_turn(session.id, TurnInput::text("hi"))
                .unwrap();
            assert_eq!(turn.seq, expected);
            registry.finish_turn(session.id, turn.id);
        }
    }

    #[test]
    fn capacity_limit_enforced() {
        let registry = SessionRegistry::new(2);
        registry.create_session("a", providers()).unwrap();
        registry.create_session("b", providers()).unwrap();
        assert_eq!(
            registry.create_session("c", providers()),
            Err(RegistryError::Full(2))
        );
    }

    #[test]
    fn removed_session_frees_a_capacity_slot() {
        let registry = SessionRegistry::new(1);
        let session = registry.create_session("a", providers()).unwrap();
        assert_eq!(
            registry.create_session("b", providers()),
            Err(RegistryError::Full(1))
        );

        assert!(registry.remove_session(session.id).is_some());
        assert!(registry.get(session.id).is_none());
        assert!(registry.create_session("b", providers()).is_ok());
    }

    #[test]
    fn remove_unknown_session_returns_none() {
        let registry = SessionRegistry::new(1);
        assert!(registry.remove_session(SessionId::new()).is_none());
    }

    #[test]
    fn finish_ignores_stale_turn_ids() {
        let registry = SessionRegistry::new(10);
        let session = registry.create_session("u1", providers()).unwrap();
        let turn = registry.begin_turn(session.id, TurnInput::text("hi")).unwrap();

        registry.finish_turn(session.id, TurnId::new());
        assert_eq!(registry.get(session.id).unwrap().active_turn, Some(turn.id));
    }

    #[tokio::test]
    async fn concurrent_submissions_admit_exactly_one() {
        let registry = Arc::new(SessionRegistry::new(10));
        let session = registry.create_session("u1", providers()).unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let session_id = session.id;
            handles.push(tokio::spawn(async move {
                registry.begin_turn(session_id, TurnInput::text("hi")).is_ok()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
