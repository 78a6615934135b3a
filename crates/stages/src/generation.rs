//! Generation engine adapter
//!
//! Conditions the reply on the perceived transcript and affect plus recent
//! history. The engine produces two texts: the raw content answer and the
//! persona-adapted reply that continues down the pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use eca_config::EngineConfig;
use eca_core::{GenerationEngine, GenerationRequest, ReplyText, Stage, StageError};

use crate::http::StageHttp;

pub struct HttpGenerationEngine {
    http: StageHttp,
}

impl HttpGenerationEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, StageError> {
        Ok(Self {
            http: StageHttp::new(Stage::Generation, config)?,
        })
    }
}

#[async_trait]
impl GenerationEngine for HttpGenerationEngine {
    async fn generate(&self, request: GenerationRequest) -> Result<ReplyText, StageError> {
        let body = GenerateRequest {
            session_id: request.session_id.to_string(),
            turn_id: request.turn_id.to_string(),
            model: &request.model,
            transcript: &request.perception.transcript,
            affect: &request.perception.affect,
            history: request
                .history
                .iter()
                .map(|m| HistoryEntry {
                    role: m.role.as_str(),
                    text: &m.text,
                })
                .collect(),
        };

        let result: GenerateResult = self.http.post_process(&body).await?;
        if result.text.trim().is_empty() {
            return Err(StageError::stage_failure(
                Stage::Generation,
                "engine returned an empty reply",
            ));
        }

        Ok(ReplyText {
            raw: result.raw_content_response,
            text: result.text,
        })
    }

    async fn health(&self) -> bool {
        self.http.health().await
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    session_id: String,
    turn_id: String,
    model: &'a str,
    transcript: &'a str,
    affect: &'a str,
    history: Vec<HistoryEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct HistoryEntry<'a> {
    role: &'static str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResult {
    /// First-pass content answer, kept for audit
    raw_content_response: Option<String>,
    /// Persona-adapted reply spoken by the avatar
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_result_with_raw_parses() {
        let json = r#"{"raw_content_response":"Paris is the capital.","text":"Oh, that's Paris!"}"#;
        let result: GenerateResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.raw_content_response.as_deref(), Some("Paris is the capital."));
        assert_eq!(result.text, "Oh, that's Paris!");
    }

    #[test]
    fn generate_result_without_raw_parses() {
        let json = r#"{"text":"Hello!"}"#;
        let result: GenerateResult = serde_json::from_str(json).unwrap();
        assert!(result.raw_content_response.is_none());
    }

    #[test]
    fn history_serializes_role_strings() {
        let body = GenerateRequest {
            session_id: "s".to_string(),
            turn_id: "t".to_string(),
            model: "gpt-4o-mini",
            transcript: "hi",
            affect: "The user appears calm.",
            history: vec![
                HistoryEntry { role: "user", text: "hi" },
                HistoryEntry { role: "agent", text: "hello" },
            ],
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains(r#""role":"user""#));
        assert!(json.contains(r#""role":"agent""#));
    }
}
