//! ScyllaDB-backed state store
//!
//! Conditional writes carry the compare-and-swap: `INSERT ... IF NOT EXISTS`
//! for turn creation and `UPDATE ... IF status = ?` for turn updates. The
//! `[applied]` column of the LWT result tells us whether we won the race.

use async_trait::async_trait;
use chrono::Utc;

use eca_core::{Message, MessageRole, SessionId, StateError, StateStore, Turn, TurnId, TurnStatus};

use crate::client::ScyllaClient;

#[derive(Clone)]
pub struct ScyllaStateStore {
    client: ScyllaClient,
}

impl ScyllaStateStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    fn encode_turn(turn: &Turn) -> Result<String, StateError> {
        serde_json::to_string(turn).map_err(|e| StateError::Serialization(e.to_string()))
    }

    fn decode_turn(body: &str) -> Result<Turn, StateError> {
        serde_json::from_str(body).map_err(|e| StateError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl StateStore for ScyllaStateStore {
    async fn create_turn(&self, turn: &Turn) -> Result<(), StateError> {
        let query = format!(
            "INSERT INTO {}.turns (turn_id, session_id, seq, status, body_json, updated_at)
             VALUES (?, ?, ?, ?, ?, ?) IF NOT EXISTS",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(
                query,
                (
                    turn.id.0,
                    turn.session_id.0,
                    turn.seq as i64,
                    turn.status.as_str(),
                    Self::encode_turn(turn)?,
                    Utc::now().timestamp_millis(),
                ),
            )
            .await
            .map_err(|e| StateError::Unavailable(e.to_string()))?;

        let applied = result
            .rows
            .and_then(|rows| rows.into_iter().next())
            .map(|row| {
                row.columns
                    .first()
                    .and_then(|c| c.as_ref())
                    .and_then(|v| v.as_boolean())
                    .unwrap_or(false)
            })
            .unwrap_or(false);

        if !applied {
            return Err(StateError::AlreadyExists(turn.id.to_string()));
        }

        Ok(())
    }

    async fn update_turn(&self, expected: TurnStatus, turn: &Turn) -> Result<(), StateError> {
        let query = format!(
            "UPDATE {}.turns SET status = ?, body_json = ?, updated_at = ?
             WHERE turn_id = ? IF status = ?",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(
                query,
                (
                    turn.status.as_str(),
                    Self::encode_turn(turn)?,
                    Utc::now().timestamp_millis(),
                    turn.id.0,
                    expected.as_str(),
                ),
            )
            .await
            .map_err(|e| StateError::Unavailable(e.to_string()))?;

        // LWT result row: ([applied] boolean, status text)
        let row = result
            .rows
            .and_then(|rows| rows.into_iter().next())
            .ok_or_else(|| StateError::Unavailable("empty LWT result".to_string()))?;

        let applied = row
            .columns
            .first()
            .and_then(|c| c.as_ref())
            .and_then(|v| v.as_boolean())
            .unwrap_or(false);

        if !applied {
            let actual = row
                .columns
                .get(1)
                .and_then(|c| c.as_ref())
                .and_then(|v| v.as_text())
                .cloned()
                .unwrap_or_else(|| "missing".to_string());
            return Err(StateError::StatusConflict {
                turn_id: turn.id.to_string(),
                expected: expected.to_string(),
                actual,
            });
        }

        Ok(())
    }

    async fn get_turn(&self, turn_id: TurnId) -> Result<Option<Turn>, StateError> {
        let query = format!(
            "SELECT body_json FROM {}.turns WHERE turn_id = ?",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (turn_id.0,))
            .await
            .map_err(|e| StateError::Unavailable(e.to_string()))?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (body,): (String,) = row
                    .into_typed()
                    .map_err(|e| StateError::Serialization(e.to_string()))?;
                return Ok(Some(Self::decode_turn(&body)?));
            }
        }

        Ok(None)
    }

    async fn append_message(&self, message: &Message) -> Result<(), StateError> {
        let query = format!(
            "INSERT INTO {}.messages (session_id, seq, role, turn_id, text, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    message.session_id.0,
                    message.seq as i64,
                    message.role.as_str(),
                    message.turn_id.0,
                    message.text.as_str(),
                    message.created_at.timestamp_millis(),
                ),
            )
            .await
            .map_err(|e| StateError::Unavailable(e.to_string()))?;

        Ok(())
    }

    async fn list_history(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<Message>, StateError> {
        // Clustering order is oldest-first; take the tail for the most
        // recent entries by reading everything for the partition. Sessions
        // are short-lived enough that the partition stays small.
        let query = format!(
            "SELECT seq, role, turn_id, text, created_at
             FROM {}.messages WHERE session_id = ?",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (session_id.0,))
            .await
            .map_err(|e| StateError::Unavailable(e.to_string()))?;

        let mut messages = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (seq, role, turn_id, text, created_at): (
                    i64,
                    String,
                    uuid::Uuid,
                    String,
                    i64,
                ) = row
                    .into_typed()
                    .map_err(|e| StateError::Serialization(e.to_string()))?;

                let role = MessageRole::parse(&role).ok_or_else(|| {
                    StateError::Serialization(format!("unknown message role: {}", role))
                })?;

                messages.push(Message {
                    session_id,
                    turn_id: TurnId(turn_id),
                    seq: seq as u64,
                    role,
                    text,
                    created_at: chrono::DateTime::from_timestamp_millis(created_at)
                        .unwrap_or_else(Utc::now),
                });
            }
        }

        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn health(&self) -> bool {
        let query = format!(
            "SELECT turn_id FROM {}.turns LIMIT 1",
            self.client.keyspace()
        );
        match self.client.session().query_unpaged(query, &[]).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "state store health check failed");
                false
            }
        }
    }
}
