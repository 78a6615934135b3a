//! Seam traits the pipeline controller is constructed against

pub mod engines;
pub mod stores;

pub use engines::{
    EmbodimentEngine, EmbodimentRequest, GenerationEngine, GenerationRequest, PerceptionEngine,
    PerceptionRequest, VoiceEngine, VoiceRequest,
};
pub use stores::{ArtifactStore, StateStore};
