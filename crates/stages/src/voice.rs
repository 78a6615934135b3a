//! Voice engine adapter
//!
//! Synthesizes reply text to speech audio. The engine writes the audio to
//! the shared artifact store and returns its key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use eca_config::EngineConfig;
use eca_core::{
    ArtifactKind, ArtifactReference, Stage, StageError, VoiceEngine, VoiceRequest,
};

use crate::http::StageHttp;

pub struct HttpVoiceEngine {
    http: StageHttp,
}

impl HttpVoiceEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, StageError> {
        Ok(Self {
            http: StageHttp::new(Stage::Voice, config)?,
        })
    }
}

#[async_trait]
impl VoiceEngine for HttpVoiceEngine {
    async fn synthesize(&self, request: VoiceRequest) -> Result<ArtifactReference, StageError> {
        let body = SynthesizeRequest {
            session_id: request.session_id.to_string(),
            turn_id: request.turn_id.to_string(),
            voice_id: &request.voice_id,
            text: &request.text,
        };

        let result: SynthesizeResult = self.http.post_process(&body).await?;
        if result.audio_key.is_empty() {
            return Err(StageError::fatal(
                Stage::Voice,
                "engine returned an empty audio key",
            ));
        }

        Ok(ArtifactReference::new(
            ArtifactKind::SpeechAudio,
            result.audio_key,
            request.turn_id,
        ))
    }

    async fn health(&self) -> bool {
        self.http.health().await
    }
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    session_id: String,
    turn_id: String,
    voice_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SynthesizeResult {
    audio_key: String,
}
