//! Per-session delivery fan-out
//!
//! One broadcast channel per session with an attached client. Events are
//! at-least-once to live subscribers and carry the turn sequence number so
//! a client can discard duplicates; nothing is buffered for absent clients
//! because the state store remains the source of truth and a reconnecting
//! client re-synchronizes from history.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use eca_core::{ArtifactReference, SessionId, Stage, TurnId};

const CHANNEL_CAPACITY: usize = 64;

/// Progress marker for one stage of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Started,
    Completed,
    /// The stage failed and its fallback was applied
    Fallback,
    /// The stage was skipped because its result already existed
    Skipped,
}

/// Event pushed to the session's live client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    StageProgress {
        turn_id: TurnId,
        seq: u64,
        stage: Stage,
        status: StageStatus,
    },
    TurnResult {
        turn_id: TurnId,
        seq: u64,
        transcript: String,
        speech: Option<ArtifactReference>,
        video: Option<ArtifactReference>,
        degraded: bool,
        failed: bool,
    },
}

/// Fan-out hub keyed by session.
#[derive(Default)]
pub struct DeliveryHub {
    channels: DashMap<SessionId, broadcast::Sender<DeliveryEvent>>,
}

impl DeliveryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a client; creates the session channel on first subscribe.
    pub fn subscribe(&self, session_id: SessionId) -> broadcast::Receiver<DeliveryEvent> {
        self.channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish to the session's subscribers, if any are attached.
    pub fn publish(&self, session_id: SessionId, event: DeliveryEvent) {
        if let Some(sender) = self.channels.get(&session_id) {
            // Err means no receiver is attached; the event is dropped by
            // contract since the state store holds the durable record.
            let _ = sender.send(event);
        }
    }

    /// Drop the channel once the session is gone.
    pub fn remove(&self, session_id: SessionId) {
        self.channels.remove(&session_id);
    }

    pub fn attached_sessions(&self) -> usize {
        self.channels.len()
    }
}
