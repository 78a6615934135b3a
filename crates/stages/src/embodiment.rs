//! Embodiment engine adapter
//!
//! Rendering is asynchronous upstream: `POST /process` submits a job and
//! returns its id, then the adapter polls `GET /status/{job_id}` until the
//! job completes, fails, or the poll deadline passes. A single `render`
//! call can legitimately take tens of seconds.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use eca_config::EnginesConfig;
use eca_core::{
    ArtifactKind, ArtifactReference, EmbodimentEngine, EmbodimentRequest, Stage, StageError,
};

use crate::http::StageHttp;

pub struct HttpEmbodimentEngine {
    http: StageHttp,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl HttpEmbodimentEngine {
    pub fn new(config: &EnginesConfig) -> Result<Self, StageError> {
        Ok(Self {
            http: StageHttp::new(Stage::Embodiment, &config.embodiment)?,
            poll_interval: Duration::from_secs(config.embodiment_poll_interval_secs),
            poll_timeout: Duration::from_secs(config.embodiment_poll_timeout_secs),
        })
    }

    async fn poll_job(&self, job_id: &str) -> Result<String, StageError> {
        let deadline = Instant::now() + self.poll_timeout;
        loop {
            let status: JobStatus = self
                .http
                .get_json(&format!("/status/{}", job_id))
                .await?;

            match status.status.as_str() {
                "completed" => {
                    return status.video_key.filter(|k| !k.is_empty()).ok_or_else(|| {
                        StageError::fatal(
                            Stage::Embodiment,
                            "job completed without a video key",
                        )
                    });
                }
                "failed" => {
                    return Err(StageError::stage_failure(
                        Stage::Embodiment,
                        status
                            .error_code
                            .unwrap_or_else(|| "rendering job failed".to_string()),
                    ));
                }
                "processing" | "queued" => {
                    tracing::trace!(job_id, "rendering job still in progress");
                }
                other => {
                    return Err(StageError::fatal(
                        Stage::Embodiment,
                        format!("unknown job status: {}", other),
                    ));
                }
            }

            // Deadline is enforced before waiting so the job cannot overshoot
            // the budget by a whole poll interval.
            if Instant::now() >= deadline {
                return Err(StageError::stage_failure(
                    Stage::Embodiment,
                    format!("rendering job {} timed out", job_id),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl EmbodimentEngine for HttpEmbodimentEngine {
    async fn render(
        &self,
        request: EmbodimentRequest,
    ) -> Result<ArtifactReference, StageError> {
        let body = RenderRequest {
            session_id: request.session_id.to_string(),
            turn_id: request.turn_id.to_string(),
            avatar_id: &request.avatar_id,
            audio_key: &request.speech.key,
        };

        let submitted: RenderSubmitted = self.http.post_process(&body).await?;
        tracing::debug!(
            turn_id = %request.turn_id,
            job_id = %submitted.job_id,
            "rendering job submitted"
        );

        let video_key = self.poll_job(&submitted.job_id).await?;
        Ok(ArtifactReference::new(
            ArtifactKind::AvatarVideo,
            video_key,
            request.turn_id,
        ))
    }

    async fn health(&self) -> bool {
        self.http.health().await
    }
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    session_id: String,
    turn_id: String,
    avatar_id: &'a str,
    audio_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct RenderSubmitted {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    status: String,
    video_key: Option<String>,
    error_code: Option<String>,
}
