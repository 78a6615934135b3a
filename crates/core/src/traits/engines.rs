//! Capability engine traits
//!
//! One trait per pipeline stage. All four share the same contract shape:
//! take artifact references and/or structured context, return a typed result
//! or a classified `StageError`. Timeouts, retry budgets and (for
//! embodiment) job polling are owned by the implementations.

use async_trait::async_trait;

use crate::artifact::ArtifactReference;
use crate::error::StageError;
use crate::message::Message;
use crate::turn::{PerceptionSummary, ReplyText, SessionId, TurnId};

/// Input to the perception engine: the user's media artifact.
#[derive(Debug, Clone)]
pub struct PerceptionRequest {
    pub session_id: SessionId,
    pub turn_id: TurnId,
    pub input: ArtifactReference,
}

/// Input to the generation engine: perceived state plus history.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub session_id: SessionId,
    pub turn_id: TurnId,
    pub model: String,
    pub perception: PerceptionSummary,
    pub history: Vec<Message>,
}

/// Input to the voice engine: reply text plus voice identity.
#[derive(Debug, Clone)]
pub struct VoiceRequest {
    pub session_id: SessionId,
    pub turn_id: TurnId,
    pub voice_id: String,
    pub text: String,
}

/// Input to the embodiment engine: speech artifact plus avatar identity.
#[derive(Debug, Clone)]
pub struct EmbodimentRequest {
    pub session_id: SessionId,
    pub turn_id: TurnId,
    pub avatar_id: String,
    pub speech: ArtifactReference,
}

/// Extracts transcript and affect from user audio/video.
#[async_trait]
pub trait PerceptionEngine: Send + Sync {
    async fn analyze(&self, request: PerceptionRequest) -> Result<PerceptionSummary, StageError>;

    /// Readiness probe; `false` means the engine should not receive turns.
    async fn health(&self) -> bool;
}

/// Produces a persona-aligned reply conditioned on perceived state and history.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<ReplyText, StageError>;

    async fn health(&self) -> bool;
}

/// Renders reply text to speech audio in the configured voice.
#[async_trait]
pub trait VoiceEngine: Send + Sync {
    async fn synthesize(&self, request: VoiceRequest) -> Result<ArtifactReference, StageError>;

    async fn health(&self) -> bool;
}

/// Renders synced avatar video from speech audio.
///
/// Rendering is asynchronous upstream; implementations submit a job and poll
/// for completion, so a single `render` call may span tens of seconds.
#[async_trait]
pub trait EmbodimentEngine: Send + Sync {
    async fn render(&self, request: EmbodimentRequest)
        -> Result<ArtifactReference, StageError>;

    async fn health(&self) -> bool;
}
