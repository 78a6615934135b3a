//! Core types and seam traits for the ECA backend
//!
//! Defines the domain model (sessions, turns, messages, artifact references)
//! and the traits the pipeline controller is wired against: the four stage
//! engines, the artifact store gateway and the conversation state store.
//! Implementations live in their own crates; everything here is IO-free.

pub mod artifact;
pub mod error;
pub mod message;
pub mod session;
pub mod traits;
pub mod turn;

pub use artifact::{ArtifactKind, ArtifactReference};
pub use error::{ArtifactError, StageError, StateError};
pub use message::{Message, MessageRole};
pub use session::{ProviderConfig, SessionRecord};
pub use traits::{
    ArtifactStore, EmbodimentEngine, EmbodimentRequest, GenerationEngine, GenerationRequest,
    PerceptionEngine, PerceptionRequest, StateStore, VoiceEngine, VoiceRequest,
};
pub use turn::{
    FailureReason, PerceptionSummary, ReplyText, SessionId, Stage, StageTiming, Turn,
    TurnFailure, TurnId, TurnInput, TurnStatus,
};
