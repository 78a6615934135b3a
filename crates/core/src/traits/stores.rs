//! Store traits: artifact blob gateway and conversation state

use std::time::Duration;

use async_trait::async_trait;

use crate::artifact::{ArtifactKind, ArtifactReference};
use crate::error::{ArtifactError, StateError};
use crate::message::Message;
use crate::turn::{SessionId, Turn, TurnId, TurnStatus};

/// Uniform put/get/presign interface over a content-addressed blob store.
///
/// Content stored under `put` is retrievable under the returned reference for
/// at least the owning turn's lifetime. Keys are derived from the content, so
/// storing identical bytes twice is harmless; references are still scoped to
/// the submitting turn.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(
        &self,
        bytes: &[u8],
        kind: ArtifactKind,
        turn_id: TurnId,
    ) -> Result<ArtifactReference, ArtifactError>;

    async fn get(&self, reference: &ArtifactReference) -> Result<Vec<u8>, ArtifactError>;

    /// Mint a time-bounded read-only URL for the artifact. Never exposes
    /// write access.
    fn presign(
        &self,
        reference: &ArtifactReference,
        ttl: Duration,
    ) -> Result<String, ArtifactError>;

    /// Store reachability probe. An unavailable store is fatal for any
    /// in-flight turn.
    async fn health(&self) -> bool;
}

/// Durable record of sessions, turns and messages.
///
/// `update_turn` is compare-and-swap on turn status: an update presenting a
/// stale expected status is rejected with `StateError::StatusConflict` and
/// must not alter the stored turn. This is what prevents two controller
/// instances from double-driving the same turn after a crash/restart.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn create_turn(&self, turn: &Turn) -> Result<(), StateError>;

    async fn update_turn(&self, expected: TurnStatus, turn: &Turn) -> Result<(), StateError>;

    async fn get_turn(&self, turn_id: TurnId) -> Result<Option<Turn>, StateError>;

    async fn append_message(&self, message: &Message) -> Result<(), StateError>;

    /// Most recent transcript entries for the session, oldest first,
    /// bounded by `limit`.
    async fn list_history(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<Message>, StateError>;

    async fn health(&self) -> bool;
}
