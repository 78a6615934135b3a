//! Shared HTTP plumbing for the stage adapters
//!
//! One wire contract for every engine: `POST {base}/process` with a
//! JSON body, `{ "status": "ok" | "error", "result": ..., "error_code":
//! ... }` back. Transport failures are classified here; engine-reported
//! errors surface as `StageFailure`.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use eca_config::EngineConfig;
use eca_core::{Stage, StageError};

use crate::retry::{with_retries, RetryPolicy};

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ProcessResponse<T> {
    pub status: String,
    pub result: Option<T>,
    pub error_code: Option<String>,
}

pub(crate) struct StageHttp {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    stage: Stage,
    retry: RetryPolicy,
}

impl StageHttp {
    pub fn new(stage: Stage, config: &EngineConfig) -> Result<Self, StageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StageError::fatal(stage, format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            stage,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            },
        })
    }

    /// POST the stage request and unwrap the engine envelope. Transient
    /// transport failures are retried within the configured budget; an
    /// engine-reported error is returned as-is without retry.
    pub async fn post_process<Req, Res>(&self, body: &Req) -> Result<Res, StageError>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let url = format!("{}/process", self.base_url);
        let envelope: ProcessResponse<Res> =
            with_retries(self.retry, || self.request_json(&url, Some(body))).await?;
        self.unwrap_envelope(envelope)
    }

    /// GET a JSON document under the engine base URL, with retries.
    pub async fn get_json<Res>(&self, path: &str) -> Result<Res, StageError>
    where
        Res: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        with_retries(self.retry, || self.request_json::<(), Res>(&url, None)).await
    }

    pub fn unwrap_envelope<Res>(&self, envelope: ProcessResponse<Res>) -> Result<Res, StageError> {
        match envelope.status.as_str() {
            "ok" => envelope.result.ok_or_else(|| {
                StageError::fatal(self.stage, "engine returned ok without a result")
            }),
            "error" => Err(StageError::stage_failure(
                self.stage,
                envelope
                    .error_code
                    .unwrap_or_else(|| "unspecified engine error".to_string()),
            )),
            other => Err(StageError::fatal(
                self.stage,
                format!("unknown engine status: {}", other),
            )),
        }
    }

    /// Readiness probe; any 2xx from `/health` counts.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(stage = %self.stage, error = %e, "engine health probe failed");
                false
            }
        }
    }

    async fn request_json<Req, Res>(
        &self,
        url: &str,
        body: Option<&Req>,
    ) -> Result<Res, StageError>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let mut request = match body {
            Some(body) => self.client.post(url).json(body),
            None => self.client.get(url),
        };
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(self.classify_status(status, detail));
        }

        response
            .json()
            .await
            .map_err(|e| StageError::fatal(self.stage, format!("malformed engine response: {}", e)))
    }

    fn classify(&self, err: reqwest::Error) -> StageError {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            StageError::transient(self.stage, err.to_string())
        } else {
            StageError::stage_failure(self.stage, err.to_string())
        }
    }

    fn classify_status(&self, status: StatusCode, detail: String) -> StageError {
        let detail = format!("HTTP {}: {}", status, detail);
        if status.is_server_error() {
            StageError::transient(self.stage, detail)
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            StageError::fatal(self.stage, detail)
        } else {
            StageError::stage_failure(self.stage, detail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            base_url: "http://perception-engine:8000/".to_string(),
            api_key: None,
            timeout_secs: 5,
            max_retries: 0,
            initial_backoff_ms: 1,
        }
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let http = StageHttp::new(Stage::Perception, &config()).unwrap();
        assert_eq!(http.base_url, "http://perception-engine:8000");
    }

    #[test]
    fn ok_envelope_unwraps_result() {
        let http = StageHttp::new(Stage::Generation, &config()).unwrap();
        let envelope: ProcessResponse<serde_json::Value> =
            serde_json::from_str(r#"{"status":"ok","result":{"text":"hi"}}"#).unwrap();
        let result = http.unwrap_envelope(envelope).unwrap();
        assert_eq!(result["text"], "hi");
    }

    #[test]
    fn error_envelope_is_stage_failure() {
        let http = StageHttp::new(Stage::Voice, &config()).unwrap();
        let envelope: ProcessResponse<serde_json::Value> =
            serde_json::from_str(r#"{"status":"error","error_code":"voice_not_found"}"#).unwrap();
        let err = http.unwrap_envelope(envelope).unwrap_err();
        assert!(matches!(err, StageError::StageFailure { stage: Stage::Voice, .. }));
        assert!(err.to_string().contains("voice_not_found"));
    }

    #[test]
    fn ok_without_result_is_fatal() {
        let http = StageHttp::new(Stage::Embodiment, &config()).unwrap();
        let envelope: ProcessResponse<serde_json::Value> =
            serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        let err = http.unwrap_envelope(envelope).unwrap_err();
        assert!(matches!(err, StageError::Fatal { .. }));
    }

    #[test]
    fn server_errors_classify_transient() {
        let http = StageHttp::new(Stage::Perception, &config()).unwrap();
        let err = http.classify_status(StatusCode::BAD_GATEWAY, "upstream down".to_string());
        assert!(matches!(err, StageError::Transient { .. }));
    }

    #[test]
    fn auth_errors_classify_fatal() {
        let http = StageHttp::new(Stage::Perception, &config()).unwrap();
        let err = http.classify_status(StatusCode::UNAUTHORIZED, String::new());
        assert!(matches!(err, StageError::Fatal { .. }));
    }

    #[test]
    fn client_errors_classify_stage_failure() {
        let http = StageHttp::new(Stage::Perception, &config()).unwrap();
        let err = http.classify_status(StatusCode::UNPROCESSABLE_ENTITY, String::new());
        assert!(matches!(err, StageError::StageFailure { .. }));
    }
}
