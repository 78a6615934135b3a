//! End-to-end turn flow against stub engines
//!
//! Exercises the controller's stage ordering, fallback table, idempotent
//! re-drive, CAS ownership, and cancellation using in-memory stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use eca_artifacts::InMemoryArtifactStore;
use eca_config::{ArtifactStoreConfig, PipelineConfig};
use eca_core::{
    ArtifactKind, ArtifactReference, ArtifactStore, EmbodimentEngine, EmbodimentRequest,
    GenerationEngine, GenerationRequest, MessageRole, PerceptionEngine, PerceptionRequest,
    PerceptionSummary, ProviderConfig, ReplyText, SessionId, Stage, StageError, StateStore, Turn,
    TurnInput, TurnStatus, VoiceEngine, VoiceRequest,
};
use eca_pipeline::{DeliveryEvent, DeliveryHub, PipelineError, TurnController};
use eca_stages::retry::{with_retries, RetryPolicy};
use eca_stages::EngineSet;
use eca_state::InMemoryStateStore;

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Ok,
    StageFail,
    /// Every attempt times out; the stage exhausts its retry budget
    Timeout,
    /// Succeed only after a long delay; used to park a stage for cancellation
    Slow,
}

#[derive(Clone)]
struct StubState {
    order: Arc<Mutex<Vec<Stage>>>,
    calls: Arc<AtomicUsize>,
    mode: Mode,
}

impl StubState {
    fn record(&self, stage: Stage) -> Result<(), StageError> {
        self.order.lock().push(stage);
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            Mode::StageFail => Err(StageError::stage_failure(stage, "stub rejection")),
            Mode::Timeout => Err(StageError::transient(stage, "stub deadline exceeded")),
            _ => Ok(()),
        }
    }

    async fn maybe_stall(&self) {
        if self.mode == Mode::Slow {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
}

struct StubPerception(StubState);

#[async_trait]
impl PerceptionEngine for StubPerception {
    async fn analyze(&self, _req: PerceptionRequest) -> Result<PerceptionSummary, StageError> {
        if self.0.mode == Mode::Timeout {
            // Run the timeouts through the real retry loop, as the HTTP
            // adapter would, so exhaustion escalates the way it does live.
            let policy = RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::from_millis(1),
            };
            let state = &self.0;
            return with_retries(policy, move || async move {
                state.record(Stage::Perception)?;
                Ok(PerceptionSummary::new(
                    "what is the capital of france",
                    "The user appears curious.",
                ))
            })
            .await;
        }
        self.0.record(Stage::Perception)?;
        self.0.maybe_stall().await;
        Ok(PerceptionSummary::new(
            "what is the capital of france",
            "The user appears curious.",
        ))
    }

    async fn health(&self) -> bool {
        true
    }
}

struct StubGeneration(StubState);

#[async_trait]
impl GenerationEngine for StubGeneration {
    async fn generate(&self, _req: GenerationRequest) -> Result<ReplyText, StageError> {
        self.0.record(Stage::Generation)?;
        self.0.maybe_stall().await;
        Ok(ReplyText {
            raw: Some("Paris is the capital of France.".to_string()),
            text: "Oh, that's Paris!".to_string(),
        })
    }

    async fn health(&self) -> bool {
        true
    }
}

struct StubVoice(StubState);

#[async_trait]
impl VoiceEngine for StubVoice {
    async fn synthesize(&self, req: VoiceRequest) -> Result<ArtifactReference, StageError> {
        self.0.record(Stage::Voice)?;
        self.0.maybe_stall().await;
        Ok(ArtifactReference::new(
            ArtifactKind::SpeechAudio,
            "aa".repeat(32),
            req.turn_id,
        ))
    }

    async fn health(&self) -> bool {
        true
    }
}

struct StubEmbodiment(StubState);

#[async_trait]
impl EmbodimentEngine for StubEmbodiment {
    async fn render(&self, req: EmbodimentRequest) -> Result<ArtifactReference, StageError> {
        self.0.record(Stage::Embodiment)?;
        self.0.maybe_stall().await;
        Ok(ArtifactReference::new(
            ArtifactKind::AvatarVideo,
            "bb".repeat(32),
            req.turn_id,
        ))
    }

    async fn health(&self) -> bool {
        true
    }
}

struct Harness {
    controller: Arc<TurnController>,
    state: Arc<InMemoryStateStore>,
    delivery: Arc<DeliveryHub>,
    order: Arc<Mutex<Vec<Stage>>>,
    calls: [Arc<AtomicUsize>; 4],
}

impl Harness {
    fn new(modes: [Mode; 4]) -> Self {
        let order = Arc::new(Mutex::new(Vec::new()));
        let calls: [Arc<AtomicUsize>; 4] = Default::default();
        let stub = |i: usize| StubState {
            order: order.clone(),
            calls: calls[i].clone(),
            mode: modes[i],
        };

        let engines = EngineSet {
            perception: Arc::new(StubPerception(stub(0))),
            generation: Arc::new(StubGeneration(stub(1))),
            voice: Arc::new(StubVoice(stub(2))),
            embodiment: Arc::new(StubEmbodiment(stub(3))),
        };

        let artifacts: Arc<dyn ArtifactStore> =
            Arc::new(InMemoryArtifactStore::new(ArtifactStoreConfig::default()));
        let state = Arc::new(InMemoryStateStore::new());
        let delivery = Arc::new(DeliveryHub::new());
        let controller = Arc::new(TurnController::new(
            engines,
            artifacts,
            state.clone() as Arc<dyn StateStore>,
            delivery.clone(),
            PipelineConfig::default(),
        ));

        Self {
            controller,
            state,
            delivery,
            order,
            calls,
        }
    }

    async fn media_turn(&self, session_id: SessionId, seq: u64) -> Turn {
        let input = ArtifactReference::new(ArtifactKind::InputMedia, "cc".repeat(32), Default::default());
        let turn = Turn::new(session_id, seq, TurnInput::media(input));
        self.state.create_turn(&turn).await.unwrap();
        turn
    }

    fn providers() -> ProviderConfig {
        ProviderConfig {
            model: "gpt-4o-mini".to_string(),
            voice_id: "voice-1".to_string(),
            avatar_id: "avatar-1".to_string(),
        }
    }
}

fn all_ok() -> [Mode; 4] {
    [Mode::Ok, Mode::Ok, Mode::Ok, Mode::Ok]
}

#[tokio::test]
async fn happy_path_runs_all_stages_in_order() {
    let h = Harness::new(all_ok());
    let session = SessionId::new();
    let turn = h.media_turn(session, 1).await;

    let done = h.controller.run_turn(turn, &Harness::providers()).await.unwrap();

    assert_eq!(done.status, TurnStatus::Completed);
    assert!(!done.degraded);
    assert!(done.speech.is_some());
    assert!(done.video.is_some());
    assert_eq!(
        *h.order.lock(),
        vec![Stage::Perception, Stage::Generation, Stage::Voice, Stage::Embodiment]
    );

    // Both transcript entries landed under the turn's sequence number.
    let history = h.state.list_history(session, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text, "what is the capital of france");
    assert_eq!(history[1].text, "Oh, that's Paris!");
}

#[tokio::test]
async fn happy_path_delivers_result_with_media() {
    let h = Harness::new(all_ok());
    let session = SessionId::new();
    let mut events = h.delivery.subscribe(session);
    let turn = h.media_turn(session, 1).await;

    h.controller.run_turn(turn, &Harness::providers()).await.unwrap();

    let result = loop {
        match events.recv().await.unwrap() {
            DeliveryEvent::TurnResult {
                transcript,
                speech,
                video,
                degraded,
                failed,
                ..
            } => break (transcript, speech, video, degraded, failed),
            DeliveryEvent::StageProgress { .. } => continue,
        }
    };
    assert_eq!(result.0, "Oh, that's Paris!");
    assert!(result.1.is_some());
    assert!(result.2.is_some());
    assert!(!result.3);
    assert!(!result.4);
}

#[tokio::test]
async fn perception_failure_degrades_with_neutral_context() {
    let h = Harness::new([Mode::StageFail, Mode::Ok, Mode::Ok, Mode::Ok]);
    let session = SessionId::new();
    let turn = h.media_turn(session, 1).await;

    let done = h.controller.run_turn(turn, &Harness::providers()).await.unwrap();

    assert_eq!(done.status, TurnStatus::Degraded);
    assert!(done.degraded);
    let perception = done.perception.unwrap();
    assert!(!perception.perceived);
    // The rest of the pipeline still ran.
    assert!(done.reply.is_some());
    assert!(done.speech.is_some());
    assert!(done.video.is_some());
}

#[tokio::test]
async fn perception_retry_exhaustion_degrades_turn() {
    let h = Harness::new([Mode::Timeout, Mode::Ok, Mode::Ok, Mode::Ok]);
    let session = SessionId::new();
    let turn = h.media_turn(session, 1).await;

    let done = h.controller.run_turn(turn, &Harness::providers()).await.unwrap();

    assert_eq!(done.status, TurnStatus::Degraded);
    assert!(!done.perception.unwrap().perceived);
    assert_eq!(
        h.calls[0].load(Ordering::SeqCst),
        3,
        "initial attempt plus two retries"
    );
    // Exhaustion falls back like any perception failure; the rest ran.
    assert!(done.reply.is_some());
    assert!(done.speech.is_some());
    assert!(done.video.is_some());
}

#[tokio::test]
async fn degraded_media_turn_appends_no_empty_user_message() {
    let h = Harness::new([Mode::StageFail, Mode::Ok, Mode::Ok, Mode::Ok]);
    let session = SessionId::new();
    let turn = h.media_turn(session, 1).await;

    let done = h.controller.run_turn(turn, &Harness::providers()).await.unwrap();
    assert_eq!(done.status, TurnStatus::Degraded);

    // The transcript is unknown, so only the agent reply joins history.
    let history = h.state.list_history(session, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, MessageRole::Agent);
    assert!(history.iter().all(|m| !m.text.is_empty()));
}

#[tokio::test]
async fn generation_failure_fails_turn_without_downstream_calls() {
    let h = Harness::new([Mode::Ok, Mode::StageFail, Mode::Ok, Mode::Ok]);
    let session = SessionId::new();
    let mut events = h.delivery.subscribe(session);
    let turn = h.media_turn(session, 1).await;

    let done = h.controller.run_turn(turn, &Harness::providers()).await.unwrap();

    assert_eq!(done.status, TurnStatus::Failed);
    assert_eq!(h.calls[2].load(Ordering::SeqCst), 0, "voice must not run");
    assert_eq!(h.calls[3].load(Ordering::SeqCst), 0, "embodiment must not run");

    // Failed turns deliver the apologetic fallback with no media.
    let result = loop {
        match events.recv().await.unwrap() {
            DeliveryEvent::TurnResult {
                transcript,
                speech,
                video,
                failed,
                ..
            } => break (transcript, speech, video, failed),
            _ => continue,
        }
    };
    assert_eq!(result.0, PipelineConfig::default().failure_reply);
    assert!(result.1.is_none());
    assert!(result.2.is_none());
    assert!(result.3);

    // Nothing joined the transcript.
    let history = h.state.list_history(session, 10).await.unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn voice_failure_delivers_text_only_and_skips_embodiment() {
    let h = Harness::new([Mode::Ok, Mode::Ok, Mode::StageFail, Mode::Ok]);
    let turn = h.media_turn(SessionId::new(), 1).await;

    let done = h.controller.run_turn(turn, &Harness::providers()).await.unwrap();

    assert_eq!(done.status, TurnStatus::Degraded);
    assert!(done.reply.is_some());
    assert!(done.speech.is_none());
    assert!(done.video.is_none());
    assert_eq!(h.calls[3].load(Ordering::SeqCst), 0, "embodiment must not run");
}

#[tokio::test]
async fn embodiment_failure_delivers_audio_only() {
    let h = Harness::new([Mode::Ok, Mode::Ok, Mode::Ok, Mode::StageFail]);
    let turn = h.media_turn(SessionId::new(), 1).await;

    let done = h.controller.run_turn(turn, &Harness::providers()).await.unwrap();

    assert_eq!(done.status, TurnStatus::Degraded);
    assert!(done.speech.is_some());
    assert!(done.video.is_none());
}

#[tokio::test]
async fn text_only_turn_skips_perception() {
    let h = Harness::new(all_ok());
    let session = SessionId::new();
    let turn = Turn::new(session, 1, TurnInput::text("hello there"));
    h.state.create_turn(&turn).await.unwrap();

    let done = h.controller.run_turn(turn, &Harness::providers()).await.unwrap();

    assert_eq!(done.status, TurnStatus::Completed);
    assert_eq!(h.calls[0].load(Ordering::SeqCst), 0, "perception must not run");
    assert_eq!(done.perception.unwrap().transcript, "hello there");
}

#[tokio::test]
async fn advance_skips_stages_whose_results_already_exist() {
    let h = Harness::new(all_ok());
    let session = SessionId::new();
    let input = ArtifactReference::new(ArtifactKind::InputMedia, "cc".repeat(32), Default::default());
    let mut turn = Turn::new(session, 1, TurnInput::media(input));
    // Simulate a crash after perception and generation committed.
    turn.perception = Some(PerceptionSummary::new("hi", "The user appears calm."));
    turn.reply = Some(ReplyText::new("hello!"));
    turn.status = TurnStatus::Perceiving;
    h.state.create_turn(&turn).await.unwrap();

    let (_tx, mut cancel) = watch::channel(false);
    let providers = Harness::providers();

    let turn = h.controller.advance(turn, &providers, &mut cancel).await.unwrap();
    assert_eq!(turn.status, TurnStatus::Generating);
    let turn = h.controller.advance(turn, &providers, &mut cancel).await.unwrap();
    assert_eq!(turn.status, TurnStatus::Synthesizing);

    assert_eq!(h.calls[0].load(Ordering::SeqCst), 0, "perception already satisfied");
    assert_eq!(h.calls[1].load(Ordering::SeqCst), 0, "generation already satisfied");
}

#[tokio::test]
async fn stale_driver_loses_cas_and_stops() {
    let h = Harness::new(all_ok());
    let session = SessionId::new();
    let turn = h.media_turn(session, 1).await;

    // A competing driver advances the stored turn first.
    let mut winner = turn.clone();
    winner.status = TurnStatus::Perceiving;
    h.state.update_turn(TurnStatus::Created, &winner).await.unwrap();

    let (_tx, mut cancel) = watch::channel(false);
    let result = h
        .controller
        .advance(turn, &Harness::providers(), &mut cancel)
        .await;
    assert!(matches!(result, Err(PipelineError::Conflict(_))));
}

#[tokio::test]
async fn cancel_mid_embodiment_fails_turn_and_retains_speech() {
    let h = Harness::new([Mode::Ok, Mode::Ok, Mode::Ok, Mode::Slow]);
    let session = SessionId::new();
    let mut events = h.delivery.subscribe(session);
    let turn = h.media_turn(session, 1).await;
    let turn_id = turn.id;

    let controller = h.controller.clone();
    let providers = Harness::providers();
    let task = tokio::spawn(async move { controller.run_turn(turn, &providers).await });

    // Wait for the embodiment stage to start, then cancel.
    loop {
        match events.recv().await.unwrap() {
            DeliveryEvent::StageProgress {
                stage: Stage::Embodiment,
                status: eca_pipeline::StageStatus::Started,
                ..
            } => break,
            _ => continue,
        }
    }
    assert!(h.controller.cancel(turn_id));

    let done = task.await.unwrap().unwrap();
    assert_eq!(done.status, TurnStatus::Failed);
    assert_eq!(
        done.failure.as_ref().unwrap().reason,
        eca_core::FailureReason::Cancelled
    );

    // Speech from the completed voice stage is retained on the record...
    let stored = h.state.get_turn(turn_id).await.unwrap().unwrap();
    assert!(stored.speech.is_some());

    // ...but not delivered.
    let result = loop {
        match events.recv().await.unwrap() {
            DeliveryEvent::TurnResult { speech, video, failed, .. } => break (speech, video, failed),
            _ => continue,
        }
    };
    assert!(result.0.is_none());
    assert!(result.1.is_none());
    assert!(result.2);
}

#[tokio::test]
async fn controller_reports_ready_with_healthy_stack() {
    let h = Harness::new(all_ok());
    assert!(h.controller.ready().await);
}
