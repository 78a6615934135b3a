//! HTTP adapters for the four capability engines
//!
//! Each adapter wraps one engine service behind the matching `eca-core`
//! trait. Adapters own transport concerns end to end: per-stage timeouts,
//! bounded retries with jitter for transient failures, failure
//! classification into `StageError`, and (for embodiment) the job poll
//! loop. The controller never sees a raw HTTP error.

mod embodiment;
mod generation;
mod http;
mod perception;
pub mod retry;
mod voice;

pub use embodiment::HttpEmbodimentEngine;
pub use generation::HttpGenerationEngine;
pub use perception::HttpPerceptionEngine;
pub use voice::HttpVoiceEngine;

use std::sync::Arc;

use eca_config::EnginesConfig;
use eca_core::{
    EmbodimentEngine, GenerationEngine, PerceptionEngine, StageError, VoiceEngine,
};

/// All four engine adapters, built together from one config block.
#[derive(Clone)]
pub struct EngineSet {
    pub perception: Arc<dyn PerceptionEngine>,
    pub generation: Arc<dyn GenerationEngine>,
    pub voice: Arc<dyn VoiceEngine>,
    pub embodiment: Arc<dyn EmbodimentEngine>,
}

impl EngineSet {
    pub fn from_config(config: &EnginesConfig) -> Result<Self, StageError> {
        Ok(Self {
            perception: Arc::new(HttpPerceptionEngine::new(&config.perception)?),
            generation: Arc::new(HttpGenerationEngine::new(&config.generation)?),
            voice: Arc::new(HttpVoiceEngine::new(&config.voice)?),
            embodiment: Arc::new(HttpEmbodimentEngine::new(config)?),
        })
    }
}
