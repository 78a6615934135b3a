//! In-memory state store
//!
//! Same compare-and-swap semantics as the ScyllaDB backend, enforced under
//! one lock. Used by all tests and by development deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use eca_core::{Message, SessionId, StateError, StateStore, Turn, TurnId, TurnStatus};

#[derive(Default)]
pub struct InMemoryStateStore {
    turns: RwLock<HashMap<TurnId, Turn>>,
    messages: RwLock<HashMap<SessionId, Vec<Message>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_turn(&self, turn: &Turn) -> Result<(), StateError> {
        let mut turns = self.turns.write();
        if turns.contains_key(&turn.id) {
            return Err(StateError::AlreadyExists(turn.id.to_string()));
        }
        turns.insert(turn.id, turn.clone());
        Ok(())
    }

    async fn update_turn(&self, expected: TurnStatus, turn: &Turn) -> Result<(), StateError> {
        let mut turns = self.turns.write();
        let stored = turns
            .get_mut(&turn.id)
            .ok_or_else(|| StateError::TurnNotFound(turn.id.to_string()))?;

        if stored.status != expected {
            return Err(StateError::StatusConflict {
                turn_id: turn.id.to_string(),
                expected: expected.to_string(),
                actual: stored.status.to_string(),
            });
        }

        *stored = turn.clone();
        Ok(())
    }

    async fn get_turn(&self, turn_id: TurnId) -> Result<Option<Turn>, StateError> {
        Ok(self.turns.read().get(&turn_id).cloned())
    }

    async fn append_message(&self, message: &Message) -> Result<(), StateError> {
        self.messages
            .write()
            .entry(message.session_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn list_history(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<Message>, StateError> {
        let messages = self.messages.read();
        let Some(all) = messages.get(&session_id) else {
            return Ok(Vec::new());
        };

        let mut ordered = all.clone();
        // User utterance precedes the agent reply within one turn
        ordered.sort_by_key(|m| (m.seq, m.role == eca_core::MessageRole::Agent));
        let skip = ordered.len().saturating_sub(limit);
        Ok(ordered.into_iter().skip(skip).collect())
    }

    async fn health(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eca_core::{MessageRole, TurnInput};

    fn turn() -> Turn {
        Turn::new(SessionId::new(), 1, TurnInput::text("hi"))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryStateStore::new();
        let t = turn();
        store.create_turn(&t).await.unwrap();
        assert_eq!(store.get_turn(t.id).await.unwrap(), Some(t));
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = InMemoryStateStore::new();
        let t = turn();
        store.create_turn(&t).await.unwrap();
        assert!(matches!(
            store.create_turn(&t).await,
            Err(StateError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_cas_update_applies() {
        let store = InMemoryStateStore::new();
        let mut t = turn();
        store.create_turn(&t).await.unwrap();

        t.status = TurnStatus::Perceiving;
        store.update_turn(TurnStatus::Created, &t).await.unwrap();
        assert_eq!(
            store.get_turn(t.id).await.unwrap().unwrap().status,
            TurnStatus::Perceiving
        );
    }

    #[tokio::test]
    async fn test_stale_cas_rejected_without_mutation() {
        let store = InMemoryStateStore::new();
        let mut t = turn();
        store.create_turn(&t).await.unwrap();

        t.status = TurnStatus::Perceiving;
        store.update_turn(TurnStatus::Created, &t).await.unwrap();

        // A second controller still holding the Created snapshot loses
        let mut stale = t.clone();
        stale.status = TurnStatus::Failed;
        let err = store.update_turn(TurnStatus::Created, &stale).await;
        assert!(matches!(err, Err(StateError::StatusConflict { .. })));

        // The stored turn is unchanged
        assert_eq!(
            store.get_turn(t.id).await.unwrap().unwrap().status,
            TurnStatus::Perceiving
        );
    }

    #[tokio::test]
    async fn test_history_order_and_limit() {
        let store = InMemoryStateStore::new();
        let session = SessionId::new();

        for seq in 1..=3u64 {
            let turn_id = TurnId::new();
            store
                .append_message(&Message::new(
                    session,
                    turn_id,
                    seq,
                    MessageRole::User,
                    format!("q{}", seq),
                ))
                .await
                .unwrap();
            store
                .append_message(&Message::new(
                    session,
                    turn_id,
                    seq,
                    MessageRole::Agent,
                    format!("a{}", seq),
                ))
                .await
                .unwrap();
        }

        let history = store.list_history(session, 4).await.unwrap();
        assert_eq!(history.len(), 4);
        // Most recent entries, oldest first, user before agent within a turn
        assert_eq!(history[0].text, "q2");
        assert_eq!(history[1].text, "a2");
        assert_eq!(history[2].text, "q3");
        assert_eq!(history[3].text, "a3");
    }

    #[tokio::test]
    async fn test_history_empty_session() {
        let store = InMemoryStateStore::new();
        assert!(store
            .list_history(SessionId::new(), 10)
            .await
            .unwrap()
            .is_empty());
    }
}
