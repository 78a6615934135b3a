//! Transcript messages
//!
//! Messages are derived from completed turns and immutable once written.
//! Ordering key is (session id, seq); a turn contributes the user utterance
//! and the agent reply under the same sequence number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::turn::{SessionId, TurnId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

/// One persisted transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub session_id: SessionId,
    pub turn_id: TurnId,
    pub seq: u64,
    pub role: MessageRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        session_id: SessionId,
        turn_id: TurnId,
        seq: u64,
        role: MessageRole,
        text: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            turn_id,
            seq,
            role,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}
