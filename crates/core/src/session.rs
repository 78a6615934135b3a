//! Sessions and per-session provider configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::turn::{SessionId, TurnId};

/// Capability provider identities resolved once at session creation.
///
/// Read-only during a turn; the voice and embodiment adapters receive these
/// through the turn context instead of looking up shared mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Language model identifier for the generation engine
    pub model: String,
    /// Voice identity for the voice engine
    pub voice_id: String,
    /// Avatar identity for the embodiment engine
    pub avatar_id: String,
}

/// Durable record of one authenticated user's ongoing interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub user_id: String,
    pub providers: ProviderConfig,
    /// At most one non-terminal turn at any time
    pub active_turn: Option<TurnId>,
    /// Sequence number of the most recently created turn
    pub last_seq: u64,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(user_id: impl Into<String>, providers: ProviderConfig) -> Self {
        Self {
            id: SessionId::new(),
            user_id: user_id.into(),
            providers,
            active_turn: None,
            last_seq: 0,
            created_at: Utc::now(),
        }
    }
}
