//! Perception engine adapter
//!
//! Sends the user's input media for transcript and affect extraction.
//! Perception runs the heaviest models of the four stages; the configured
//! timeout is expected to be minutes, not seconds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use eca_config::EngineConfig;
use eca_core::{PerceptionEngine, PerceptionRequest, PerceptionSummary, Stage, StageError};

use crate::http::StageHttp;

pub struct HttpPerceptionEngine {
    http: StageHttp,
}

impl HttpPerceptionEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, StageError> {
        Ok(Self {
            http: StageHttp::new(Stage::Perception, config)?,
        })
    }
}

#[async_trait]
impl PerceptionEngine for HttpPerceptionEngine {
    async fn analyze(&self, request: PerceptionRequest) -> Result<PerceptionSummary, StageError> {
        let body = AnalyzeRequest {
            session_id: request.session_id.to_string(),
            turn_id: request.turn_id.to_string(),
            input_bucket: request.input.kind.bucket(),
            input_artifact_key: &request.input.key,
        };

        let result: AnalyzeResult = self.http.post_process(&body).await?;
        tracing::debug!(
            turn_id = %request.turn_id,
            transcript_len = result.transcript.len(),
            "perception complete"
        );

        Ok(PerceptionSummary::new(result.transcript, result.affect))
    }

    async fn health(&self) -> bool {
        self.http.health().await
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    session_id: String,
    turn_id: String,
    input_bucket: &'static str,
    input_artifact_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResult {
    transcript: String,
    /// Prose affect description, e.g. "The user appears calm."
    affect: String,
}
