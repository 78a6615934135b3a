//! Turn pipeline controller
//!
//! Owns the turn state machine. `advance` performs exactly one transition:
//! it invokes the current stage's adapter (unless the stage's result is
//! already on the turn record), writes the outcome onto the turn, and
//! compare-and-swap persists before anything downstream may begin. The
//! CAS is the commit point; losing it means another driver owns the turn
//! and this one stops.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};

use eca_config::PipelineConfig;
use eca_core::{
    ArtifactStore, EmbodimentRequest, FailureReason, GenerationRequest, Message, MessageRole,
    PerceptionRequest, PerceptionSummary, ProviderConfig, Stage, StageError, StateError,
    StateStore, Turn, TurnFailure, TurnId, TurnStatus, VoiceRequest,
};
use eca_stages::EngineSet;

use crate::delivery::{DeliveryEvent, DeliveryHub, StageStatus};

/// Affect placeholder for turns submitted as text, where there is no media
/// for the perception engine to analyze.
const TEXT_INPUT_AFFECT: &str = "The user sent a text message; vocal affect is unavailable.";

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Another driver advanced the turn first; this one must stop.
    #[error("lost turn ownership: {0}")]
    Conflict(String),

    #[error("state store error: {0}")]
    State(StateError),

    #[error("controller is shutting down")]
    Shutdown,
}

impl From<StateError> for PipelineError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::StatusConflict { .. } => Self::Conflict(err.to_string()),
            other => Self::State(other),
        }
    }
}

pub struct TurnController {
    engines: EngineSet,
    artifacts: Arc<dyn ArtifactStore>,
    state: Arc<dyn StateStore>,
    delivery: Arc<DeliveryHub>,
    config: PipelineConfig,
    turn_permits: Arc<Semaphore>,
    cancels: DashMap<TurnId, watch::Sender<bool>>,
}

impl TurnController {
    pub fn new(
        engines: EngineSet,
        artifacts: Arc<dyn ArtifactStore>,
        state: Arc<dyn StateStore>,
        delivery: Arc<DeliveryHub>,
        config: PipelineConfig,
    ) -> Self {
        let turn_permits = Arc::new(Semaphore::new(config.max_concurrent_turns));
        Self {
            engines,
            artifacts,
            state,
            delivery,
            config,
            turn_permits,
            cancels: DashMap::new(),
        }
    }

    /// All four engines plus both stores must be reachable before new
    /// turns are accepted.
    pub async fn ready(&self) -> bool {
        let (perception, generation, voice, embodiment, artifacts, state) = tokio::join!(
            self.engines.perception.health(),
            self.engines.generation.health(),
            self.engines.voice.health(),
            self.engines.embodiment.health(),
            self.artifacts.health(),
            self.state.health(),
        );
        perception && generation && voice && embodiment && artifacts && state
    }

    /// Request cancellation of an in-flight turn. Observed at the next
    /// suspension point. Returns false when the turn is not being driven
    /// by this controller.
    pub fn cancel(&self, turn_id: TurnId) -> bool {
        match self.cancels.get(&turn_id) {
            Some(sender) => sender.send(true).is_ok(),
            None => false,
        }
    }

    /// Drive a turn from its current status to a terminal one, then
    /// persist transcript messages and deliver the result.
    pub async fn run_turn(
        &self,
        turn: Turn,
        providers: &ProviderConfig,
    ) -> Result<Turn, PipelineError> {
        let _permit = self
            .turn_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Shutdown)?;

        let turn_id = turn.id;
        let started = Instant::now();
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        self.cancels.insert(turn_id, cancel_tx);

        let result = self.drive(turn, providers, &mut cancel_rx).await;
        self.cancels.remove(&turn_id);

        let turn = result?;
        self.finish(&turn).await;

        metrics::histogram!("eca_turn_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        metrics::counter!("eca_turns_total", "status" => turn.status.as_str()).increment(1);

        Ok(turn)
    }

    async fn drive(
        &self,
        mut turn: Turn,
        providers: &ProviderConfig,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Turn, PipelineError> {
        while !turn.status.is_terminal() {
            turn = self.advance(turn, providers, cancel).await?;
        }
        Ok(turn)
    }

    /// Perform exactly one state machine transition.
    pub async fn advance(
        &self,
        mut turn: Turn,
        providers: &ProviderConfig,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Turn, PipelineError> {
        match turn.status {
            TurnStatus::Created => self.start(turn).await,
            TurnStatus::Perceiving => self.perceive(turn, cancel).await,
            TurnStatus::Generating => self.generate(turn, providers, cancel).await,
            TurnStatus::Synthesizing => self.synthesize(turn, providers, cancel).await,
            TurnStatus::Embodying => self.embody(turn, providers, cancel).await,
            _ => {
                // Terminal; nothing to advance.
                turn.updated_at = chrono::Utc::now();
                Ok(turn)
            }
        }
    }

    async fn start(&self, mut turn: Turn) -> Result<Turn, PipelineError> {
        if turn.input.has_media() {
            self.transition(&mut turn, TurnStatus::Created, TurnStatus::Perceiving)
                .await?;
        } else {
            // Text-only input skips perception entirely.
            if turn.perception.is_none() {
                let text = turn.input.text.clone().unwrap_or_default();
                turn.perception = Some(PerceptionSummary::new(text, TEXT_INPUT_AFFECT));
            }
            self.transition(&mut turn, TurnStatus::Created, TurnStatus::Generating)
                .await?;
        }
        Ok(turn)
    }

    async fn perceive(
        &self,
        mut turn: Turn,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Turn, PipelineError> {
        if turn.perception.is_some() {
            // Result already committed; re-drive skips the adapter.
            self.progress(&turn, Stage::Perception, StageStatus::Skipped);
            self.transition(&mut turn, TurnStatus::Perceiving, TurnStatus::Generating)
                .await?;
            return Ok(turn);
        }

        let Some(input) = turn.input.artifact.clone() else {
            return self
                .fail(turn, TurnStatus::Perceiving, FailureReason::Fatal, "perceiving turn has no input artifact")
                .await;
        };

        self.progress(&turn, Stage::Perception, StageStatus::Started);
        turn.enter_stage(Stage::Perception);

        let request = PerceptionRequest {
            session_id: turn.session_id,
            turn_id: turn.id,
            input,
        };
        let outcome = with_cancel(
            Stage::Perception,
            cancel,
            self.engines.perception.analyze(request),
        )
        .await;
        turn.exit_stage(Stage::Perception);

        match outcome {
            Ok(summary) => {
                turn.perception = Some(summary);
                self.progress(&turn, Stage::Perception, StageStatus::Completed);
                self.transition(&mut turn, TurnStatus::Perceiving, TurnStatus::Generating)
                    .await?;
                Ok(turn)
            }
            Err(StageError::StageFailure { detail, .. }) => {
                // Fallback: continue with unknown emotional context.
                tracing::warn!(turn_id = %turn.id, detail = %detail, "perception failed, using neutral context");
                let text = turn.input.text.clone().unwrap_or_default();
                turn.perception = Some(PerceptionSummary::neutral(text));
                turn.degraded = true;
                self.progress(&turn, Stage::Perception, StageStatus::Fallback);
                self.transition(&mut turn, TurnStatus::Perceiving, TurnStatus::Generating)
                    .await?;
                Ok(turn)
            }
            Err(err) => self.fail_on(turn, TurnStatus::Perceiving, err).await,
        }
    }

    async fn generate(
        &self,
        mut turn: Turn,
        providers: &ProviderConfig,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Turn, PipelineError> {
        if turn.reply.is_some() {
            self.progress(&turn, Stage::Generation, StageStatus::Skipped);
            self.transition(&mut turn, TurnStatus::Generating, TurnStatus::Synthesizing)
                .await?;
            return Ok(turn);
        }

        let Some(perception) = turn.perception.clone() else {
            return self
                .fail(turn, TurnStatus::Generating, FailureReason::Fatal, "generating turn has no perception summary")
                .await;
        };

        let history = self
            .state
            .list_history(turn.session_id, self.config.history_limit)
            .await?;

        self.progress(&turn, Stage::Generation, StageStatus::Started);
        turn.enter_stage(Stage::Generation);

        let request = GenerationRequest {
            session_id: turn.session_id,
            turn_id: turn.id,
            model: providers.model.clone(),
            perception,
            history,
        };
        let outcome = with_cancel(
            Stage::Generation,
            cancel,
            self.engines.generation.generate(request),
        )
        .await;
        turn.exit_stage(Stage::Generation);

        match outcome {
            Ok(reply) => {
                turn.reply = Some(reply);
                self.progress(&turn, Stage::Generation, StageStatus::Completed);
                self.transition(&mut turn, TurnStatus::Generating, TurnStatus::Synthesizing)
                    .await?;
                Ok(turn)
            }
            // No reply means nothing downstream can run; the turn fails.
            Err(err) => self.fail_on(turn, TurnStatus::Generating, err).await,
        }
    }

    async fn synthesize(
        &self,
        mut turn: Turn,
        providers: &ProviderConfig,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Turn, PipelineError> {
        if turn.speech.is_some() {
            self.progress(&turn, Stage::Voice, StageStatus::Skipped);
            self.transition(&mut turn, TurnStatus::Synthesizing, TurnStatus::Embodying)
                .await?;
            return Ok(turn);
        }

        let Some(reply) = turn.reply.clone() else {
            return self
                .fail(turn, TurnStatus::Synthesizing, FailureReason::Fatal, "synthesizing turn has no reply text")
                .await;
        };

        self.progress(&turn, Stage::Voice, StageStatus::Started);
        turn.enter_stage(Stage::Voice);

        let request = VoiceRequest {
            session_id: turn.session_id,
            turn_id: turn.id,
            voice_id: providers.voice_id.clone(),
            text: reply.text,
        };
        let outcome = with_cancel(Stage::Voice, cancel, self.engines.voice.synthesize(request)).await;
        turn.exit_stage(Stage::Voice);

        match outcome {
            Ok(speech) => {
                turn.speech = Some(speech);
                self.progress(&turn, Stage::Voice, StageStatus::Completed);
                self.transition(&mut turn, TurnStatus::Synthesizing, TurnStatus::Embodying)
                    .await?;
                Ok(turn)
            }
            Err(StageError::StageFailure { detail, .. }) => {
                // Text-only fallback; embodiment has no audio to render.
                tracing::warn!(turn_id = %turn.id, detail = %detail, "voice failed, delivering text-only");
                turn.degraded = true;
                self.progress(&turn, Stage::Voice, StageStatus::Fallback);
                self.transition(&mut turn, TurnStatus::Synthesizing, TurnStatus::Degraded)
                    .await?;
                Ok(turn)
            }
            Err(err) => self.fail_on(turn, TurnStatus::Synthesizing, err).await,
        }
    }

    async fn embody(
        &self,
        mut turn: Turn,
        providers: &ProviderConfig,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Turn, PipelineError> {
        let terminal = if turn.degraded {
            TurnStatus::Degraded
        } else {
            TurnStatus::Completed
        };

        if turn.video.is_some() {
            self.progress(&turn, Stage::Embodiment, StageStatus::Skipped);
            self.transition(&mut turn, TurnStatus::Embodying, terminal).await?;
            return Ok(turn);
        }

        let Some(speech) = turn.speech.clone() else {
            return self
                .fail(turn, TurnStatus::Embodying, FailureReason::Fatal, "embodying turn has no speech artifact")
                .await;
        };

        self.progress(&turn, Stage::Embodiment, StageStatus::Started);
        turn.enter_stage(Stage::Embodiment);

        let request = EmbodimentRequest {
            session_id: turn.session_id,
            turn_id: turn.id,
            avatar_id: providers.avatar_id.clone(),
            speech,
        };
        let outcome = with_cancel(
            Stage::Embodiment,
            cancel,
            self.engines.embodiment.render(request),
        )
        .await;
        turn.exit_stage(Stage::Embodiment);

        match outcome {
            Ok(video) => {
                turn.video = Some(video);
                self.progress(&turn, Stage::Embodiment, StageStatus::Completed);
                self.transition(&mut turn, TurnStatus::Embodying, terminal).await?;
                Ok(turn)
            }
            Err(StageError::StageFailure { detail, .. }) => {
                // Audio-only fallback.
                tracing::warn!(turn_id = %turn.id, detail = %detail, "embodiment failed, delivering audio-only");
                turn.degraded = true;
                self.progress(&turn, Stage::Embodiment, StageStatus::Fallback);
                self.transition(&mut turn, TurnStatus::Embodying, TurnStatus::Degraded)
                    .await?;
                Ok(turn)
            }
            Err(err) => self.fail_on(turn, TurnStatus::Embodying, err).await,
        }
    }

    /// CAS-persist a status transition. This is the commit point: nothing
    /// downstream of a stage runs until its transition is stored.
    async fn transition(
        &self,
        turn: &mut Turn,
        expected: TurnStatus,
        next: TurnStatus,
    ) -> Result<(), PipelineError> {
        turn.status = next;
        turn.updated_at = chrono::Utc::now();
        self.state.update_turn(expected, turn).await?;
        tracing::debug!(
            turn_id = %turn.id,
            session_id = %turn.session_id,
            from = %expected,
            to = %next,
            "turn transition committed"
        );
        Ok(())
    }

    async fn fail_on(
        &self,
        turn: Turn,
        expected: TurnStatus,
        err: StageError,
    ) -> Result<Turn, PipelineError> {
        let reason = match &err {
            StageError::Cancelled { .. } => FailureReason::Cancelled,
            StageError::Fatal { .. } => FailureReason::Fatal,
            _ => FailureReason::Stage,
        };
        self.fail(turn, expected, reason, err.to_string()).await
    }

    async fn fail(
        &self,
        mut turn: Turn,
        expected: TurnStatus,
        reason: FailureReason,
        detail: impl Into<String>,
    ) -> Result<Turn, PipelineError> {
        let detail = detail.into();
        tracing::warn!(
            turn_id = %turn.id,
            session_id = %turn.session_id,
            ?reason,
            detail = %detail,
            "turn failed"
        );
        turn.failure = Some(TurnFailure::new(reason, detail));
        self.transition(&mut turn, expected, TurnStatus::Failed).await?;
        Ok(turn)
    }

    /// Persist transcript messages and deliver the final event. Runs after
    /// the terminal status is already durable, so failures here are logged
    /// and swallowed: a reconnecting client re-synchronizes from the store.
    async fn finish(&self, turn: &Turn) {
        let delivered = turn.status != TurnStatus::Failed;

        if delivered {
            if let Some(text) = turn.user_text() {
                let message = Message::new(
                    turn.session_id,
                    turn.id,
                    turn.seq,
                    MessageRole::User,
                    text,
                );
                if let Err(e) = self.state.append_message(&message).await {
                    tracing::warn!(turn_id = %turn.id, error = %e, "failed to append user message");
                }
            }
            if let Some(reply) = &turn.reply {
                let message = Message::new(
                    turn.session_id,
                    turn.id,
                    turn.seq,
                    MessageRole::Agent,
                    reply.text.clone(),
                );
                if let Err(e) = self.state.append_message(&message).await {
                    tracing::warn!(turn_id = %turn.id, error = %e, "failed to append agent message");
                }
            }
        }

        // A failed turn delivers the apologetic fallback and no media, even
        // when earlier stages already produced artifacts.
        let (transcript, speech, video) = if delivered {
            (
                turn.reply
                    .as_ref()
                    .map(|r| r.text.clone())
                    .unwrap_or_else(|| self.config.failure_reply.clone()),
                turn.speech.clone(),
                turn.video.clone(),
            )
        } else {
            (self.config.failure_reply.clone(), None, None)
        };

        self.delivery.publish(
            turn.session_id,
            DeliveryEvent::TurnResult {
                turn_id: turn.id,
                seq: turn.seq,
                transcript,
                speech,
                video,
                degraded: turn.degraded,
                failed: !delivered,
            },
        );
    }

    fn progress(&self, turn: &Turn, stage: Stage, status: StageStatus) {
        self.delivery.publish(
            turn.session_id,
            DeliveryEvent::StageProgress {
                turn_id: turn.id,
                seq: turn.seq,
                stage,
                status,
            },
        );
    }
}

/// Race a stage call against the turn's cancellation signal. The signal is
/// observed at this suspension point; an already-cancelled turn never
/// reaches the adapter.
async fn with_cancel<T, F>(
    stage: Stage,
    cancel: &mut watch::Receiver<bool>,
    operation: F,
) -> Result<T, StageError>
where
    F: std::future::Future<Output = Result<T, StageError>>,
{
    if *cancel.borrow() {
        return Err(StageError::Cancelled { stage });
    }
    tokio::select! {
        result = operation => result,
        _ = cancel.wait_for(|cancelled| *cancelled) => Err(StageError::Cancelled { stage }),
    }
}
